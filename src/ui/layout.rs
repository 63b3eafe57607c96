use crate::app::{App, AppView, Panel};
use crate::settings::SettingsField;
use netgauge::speedtest::Phase;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

// Color Palette - Elegant & Minimal
const ACCENT: Color = Color::Rgb(100, 149, 237);      // Cornflower blue
const SUCCESS: Color = Color::Rgb(134, 194, 156);     // Soft green
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);        // Soft blue
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);        // Soft amber
const FAIL: Color = Color::Rgb(220, 120, 120);        // Soft red
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => {
            let chunks = Layout::vertical([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(area);

            draw_header(frame, chunks[0], app);
            if app.expanded {
                draw_expanded(frame, chunks[1], app);
            } else {
                draw_panels(frame, chunks[1], app);
            }
            draw_status_line(frame, chunks[2], app);
            draw_help(frame, chunks[3], app);
        }
        AppView::Settings => draw_settings_view(frame, area, app),
    }
}

// Panels
fn draw_panels(frame: &mut Frame, area: Rect, app: &App) {
    let panels = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(area);

    draw_throughput_panel(frame, panels[0], app, Panel::Download, false);
    draw_throughput_panel(frame, panels[1], app, Panel::Upload, false);
    draw_ping_panel(frame, panels[2], app, false);
}

// Expanded views
fn draw_expanded(frame: &mut Frame, area: Rect, app: &App) {
    match app.selected_panel {
        Panel::Ping => draw_ping_panel(frame, area, app, true),
        panel => draw_throughput_panel(frame, area, app, panel, true),
    }
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(inner);

    // Title
    frame.render_widget(
        Paragraph::new("netgauge")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        chunks[0],
    );

    // Status
    let (status, color) = match app.phase() {
        Phase::Idle => ("Ready", TEXT_MUTED),
        Phase::Latency => ("Measuring latency...", WARN),
        Phase::Download => ("Testing download...", SUCCESS),
        Phase::Upload => ("Testing upload...", INFO),
        Phase::Done => ("Complete", ACCENT),
        Phase::Error => ("Failed", FAIL),
    };
    frame.render_widget(
        Paragraph::new(status)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        chunks[1],
    );

    // Phase indicator
    frame.render_widget(
        Paragraph::new(phase_line(app.phase())).alignment(Alignment::Right),
        chunks[2],
    );
}

fn phase_line(phase: Phase) -> Line<'static> {
    let stages = [
        (Phase::Latency, "ping"),
        (Phase::Download, "down"),
        (Phase::Upload, "up"),
    ];

    let mut spans = Vec::new();
    for (i, (stage, label)) in stages.iter().enumerate() {
        let complete = match phase {
            Phase::Download => *stage == Phase::Latency,
            Phase::Upload => *stage != Phase::Upload,
            Phase::Done => true,
            _ => false,
        };

        let style = if phase == *stage {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if complete {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };

        spans.push(Span::styled(*label, style));
        if i < stages.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

fn draw_throughput_panel(frame: &mut Frame, area: Rect, app: &App, panel: Panel, expanded: bool) {
    let (title, color, dim, speed, progress, samples, note) = match panel {
        Panel::Upload => (
            "Upload",
            INFO,
            INFO_DIM,
            app.state.upload.as_ref().map_or(0.0, |r| r.mbps()),
            upload_progress(app),
            <&[f64]>::default(),
            app.state
                .upload
                .as_ref()
                .filter(|r| r.is_degraded())
                .map(|_| "best effort"),
        ),
        _ => (
            "Download",
            SUCCESS,
            SUCCESS_DIM,
            current_download_speed(app),
            download_progress(app),
            app.download_samples.as_slice(),
            None,
        ),
    };

    let selected = expanded || app.selected_panel == panel;
    let block = panel_block(title, color, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    // Speed value
    let mut headline = vec![Span::styled(
        format_speed(speed),
        Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
    )];
    if expanded {
        let (avg, max, min) = stats(samples);
        headline.extend([
            separator(),
            muted(format!("avg {}", format_speed(avg))),
            separator(),
            muted(format!("max {}", format_speed(max))),
            separator(),
            muted(format!("min {}", format_speed(min))),
        ]);
    }
    if let Some(note) = note {
        headline.extend([separator(), Span::styled(note, Style::default().fg(WARN))]);
    }
    frame.render_widget(
        Paragraph::new(Line::from(headline)).alignment(Alignment::Center),
        chunks[0],
    );

    // Progress bar
    draw_progress_bar(frame, chunks[1], progress, color, dim);

    // Chart
    draw_chart(frame, chunks[2], samples, color, expanded.then_some("Mbps"));
}

fn draw_ping_panel(frame: &mut Frame, area: Rect, app: &App, expanded: bool) {
    let selected = expanded || app.selected_panel == Panel::Ping;
    let block = panel_block("Latency", WARN, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    let samples = &app.state.latency_samples_ms;
    let (mean, jitter) = match &app.state.latency {
        Some(result) => (Some(result.mean_ms()), Some(result.jitter_ms())),
        None => (samples.last().copied(), None),
    };

    // Value
    let mut headline = vec![Span::styled(
        mean.map_or_else(|| "—".to_string(), |ms| format!("{ms:.0} ms")),
        Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
    )];
    if expanded {
        let (_, max, min) = stats(samples);
        headline.extend([
            separator(),
            muted(format!("max {max:.0}")),
            separator(),
            muted(format!("min {min:.0}")),
            separator(),
            muted(format!("{} samples", samples.len())),
        ]);
    }
    frame.render_widget(
        Paragraph::new(Line::from(headline)).alignment(Alignment::Center),
        chunks[0],
    );

    // Jitter
    let jitter = jitter.map_or_else(|| "jitter —".to_string(), |ms| format!("jitter {ms:.1} ms"));
    frame.render_widget(
        Paragraph::new(jitter)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    // Chart
    draw_chart(frame, chunks[2], samples, WARN, expanded.then_some("ms"));
}

fn panel_block(title: &str, color: Color, selected: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if selected { BORDER_ACTIVE } else { BORDER }))
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(if selected { color } else { TEXT_SECONDARY }),
        ))
}

fn separator() -> Span<'static> {
    Span::styled("  ·  ", Style::default().fg(TEXT_MUTED))
}

fn muted(text: String) -> Span<'static> {
    Span::styled(text, Style::default().fg(TEXT_MUTED))
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

/// Line chart of `data`. With a `unit`, also draws the average and y labels.
fn draw_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color, unit: Option<&str>) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (min_val, max_val) = data_range(data);
    let range = (max_val - min_val).max(0.1);
    let y_min = (min_val - range * 0.1).max(0.0);
    let y_max = max_val + range * 0.1;

    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let avg_line = [(0.0, avg), (data.len() as f64, avg)];

    let mut datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points)];

    let mut y_axis = Axis::default().bounds([y_min, y_max]);
    if let Some(unit) = unit {
        datasets.push(
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(TEXT_MUTED))
                .data(&avg_line),
        );
        y_axis = y_axis.style(Style::default().fg(BORDER)).labels(vec![
            Span::styled(format!("{y_min:.0}"), Style::default().fg(TEXT_MUTED)),
            Span::styled(format!("{y_max:.0} {unit}"), Style::default().fg(TEXT_MUTED)),
        ]);
    }

    let chart = Chart::new(datasets)
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(y_axis);

    frame.render_widget(chart, area);
}

fn draw_status_line(frame: &mut Frame, area: Rect, app: &App) {
    let message = app.state.error.as_deref().or(app.notice.as_deref());
    if let Some(message) = message {
        frame.render_widget(
            Paragraph::new(message)
                .style(Style::default().fg(FAIL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

// Settings
fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    // Header
    let header_block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header_block.inner(chunks[0]);
    frame.render_widget(header_block, chunks[0]);

    frame.render_widget(
        Paragraph::new("Settings")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        header_inner,
    );

    // Settings content
    let content_area = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content_area);
    frame.render_widget(block, content_area);

    let rows = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Min(0),
    ])
    .split(inner);

    let settings = &app.settings;
    let entries = [
        (SettingsField::PingCount, "Ping samples", settings.ping_count.to_string()),
        (SettingsField::DownloadSize, "Download size", format!("{} MiB", settings.download_size_mb)),
        (SettingsField::Streams, "Streams", settings.streams.to_string()),
        (SettingsField::UploadSize, "Upload size", format!("{} MiB", settings.upload_size_mb)),
    ];
    for (row, (field, label, value)) in rows.iter().zip(entries) {
        draw_setting_row(frame, *row, label, &value, app.selected_setting == field);
    }

    // Help
    frame.render_widget(
        Paragraph::new("↑↓ select · ←→ adjust · enter done")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let chunks = Layout::horizontal([Constraint::Length(16), Constraint::Min(10)]).split(area);

    let label_style = if selected {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(TEXT_SECONDARY)
    };
    frame.render_widget(Paragraph::new(format!(" {label}")).style(label_style), chunks[0]);

    let (value_text, value_style) = if selected {
        (format!("< {value} >"), Style::default().fg(TEXT_PRIMARY))
    } else {
        (value.to_string(), Style::default().fg(TEXT_MUTED))
    };
    frame.render_widget(Paragraph::new(value_text).style(value_style), chunks[1]);
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.expanded {
        "esc close · q quit"
    } else if app.phase().accepts_start() {
        "enter start · r reset · s settings · tab select · space expand · q quit"
    } else {
        "tab select · space expand · esc stop · r reset · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

// Helpers
fn current_download_speed(app: &App) -> f64 {
    match &app.state.download {
        Some(result) => result.mbps(),
        None => app.download_samples.last().copied().unwrap_or(0.0),
    }
}

fn download_progress(app: &App) -> f64 {
    match app.phase() {
        Phase::Download => app.state.progress,
        _ if app.state.download.is_some() => 1.0,
        _ => 0.0,
    }
}

fn upload_progress(app: &App) -> f64 {
    if app.state.upload.is_some() {
        1.0
    } else {
        0.0
    }
}

fn data_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    (if min == f64::MAX { 0.0 } else { min }, if max == f64::MIN { 0.0 } else { max })
}

fn stats(data: &[f64]) -> (f64, f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let (min, max) = data_range(data);
    (avg, max, min)
}

pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.1} Mbps", mbps)
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "—".to_string()
    }
}
