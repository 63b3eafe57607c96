mod app;
mod settings;
mod ui;

use anyhow::{bail, Result};
use app::{poll_event, App, AppAction};
use clap::Parser;
use crossterm::event::Event;
use netgauge::speedtest::{Phase, RunState};
use netgauge::{MeasurementConfig, TestController};
use ratatui::DefaultTerminal;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use ui::{draw_ui, format_speed};

#[derive(Parser)]
#[command(
    name = "netgauge",
    about = "Measure latency, jitter, download and upload speed over plain HTTP",
    version,
    long_about = None
)]
struct Cli {
    /// TOML file overriding the default endpoints and byte budgets
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single test without the terminal UI
    #[arg(long)]
    headless: bool,

    /// Print the headless result as JSON
    #[arg(long, requires = "headless")]
    json: bool,

    /// Write logs to this file (the terminal UI never logs to the screen)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = match &cli.config {
        Some(path) => MeasurementConfig::load(path)?,
        None => MeasurementConfig::default(),
    };

    if cli.headless {
        return run_headless(config, cli.json).await;
    }

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, config).await;

    ratatui::restore();
    result
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if cli.headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn run_headless(config: MeasurementConfig, json: bool) -> Result<()> {
    let controller = TestController::new(config)?;
    let mut handle = controller.start()?;

    let state = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            controller.stop();
            handle.await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_summary(&state);
    }

    if state.phase == Phase::Error {
        bail!(state.error.unwrap_or_else(|| "speed test failed".to_string()));
    }
    Ok(())
}

fn print_summary(state: &RunState) {
    if let Some(latency) = &state.latency {
        println!("Latency   {:.0} ms", latency.mean_ms());
        println!("Jitter    {:.1} ms", latency.jitter_ms());
    }
    if let Some(download) = &state.download {
        println!("Download  {}", format_speed(download.mbps()));
    }
    if let Some(upload) = &state.upload {
        let note = if upload.is_degraded() { " (best effort)" } else { "" };
        println!("Upload    {}{}", format_speed(upload.mbps()), note);
    }
    if state.phase == Phase::Idle {
        println!("Stopped");
    }
}

async fn run_app(terminal: &mut DefaultTerminal, config: MeasurementConfig) -> Result<()> {
    let mut app = App::new(config)?;

    loop {
        app.tick();
        terminal.draw(|frame| draw_ui(frame, &app))?;

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => app.start_test(),
                    AppAction::CancelTest => app.cancel_test(),
                    AppAction::Reset => app.reset(),
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.controller.stop();
    Ok(())
}
