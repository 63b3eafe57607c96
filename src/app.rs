use crate::settings::{Settings, SettingsField};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use netgauge::config::MeasurementConfig;
use netgauge::speedtest::{Phase, RunState, TestController};
use std::time::{Duration, Instant};

/// Minimum spacing between two throughput chart samples.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
const MAX_SAMPLES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

pub struct App {
    pub controller: TestController,
    /// Last snapshot read from the controller; what the UI draws.
    pub state: RunState,
    pub should_quit: bool,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,
    pub notice: Option<String>,

    // Settings
    base_config: MeasurementConfig,
    pub settings: Settings,
    pub selected_setting: SettingsField,

    // Download throughput samples (Mbps) for the chart
    pub download_samples: Vec<f64>,
    last_sample: Option<(Instant, u64)>,
}

impl App {
    pub fn new(config: MeasurementConfig) -> Result<Self> {
        let controller = TestController::new(config.clone())?;
        Ok(Self {
            controller,
            state: RunState::default(),
            should_quit: false,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            notice: None,
            settings: Settings::from_config(&config),
            base_config: config,
            selected_setting: SettingsField::PingCount,
            download_samples: Vec::new(),
            last_sample: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Pulls a fresh snapshot and derives a throughput sample from the byte
    /// counter delta.
    pub fn tick(&mut self) {
        self.state = self.controller.snapshot();
        if self.state.phase != Phase::Download {
            self.last_sample = None;
            return;
        }

        let now = Instant::now();
        let bytes = self.state.downloaded_bytes;
        match self.last_sample {
            None => self.last_sample = Some((now, bytes)),
            Some((at, prev)) => {
                let interval = now.duration_since(at);
                if interval >= SAMPLE_INTERVAL {
                    let delta = bytes.saturating_sub(prev);
                    let mbps = (delta as f64 * 8.0) / interval.as_secs_f64() / 1_000_000.0;
                    self.download_samples.push(mbps);
                    if self.download_samples.len() > MAX_SAMPLES {
                        self.download_samples.remove(0);
                    }
                    self.last_sample = Some((now, bytes));
                }
            }
        }
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        let idle = self.phase().accepts_start();
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if idle {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Char('r') => Some(AppAction::Reset),
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if idle {
                    Some(AppAction::StartTest)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !idle {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.apply_settings();
                self.view = AppView::Main;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
                None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
                None
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.settings.decrease(self.selected_setting);
                None
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.settings.increase(self.selected_setting);
                None
            }
            _ => None,
        }
    }

    /// The controller's config is fixed, so new settings mean a new controller.
    fn apply_settings(&mut self) {
        let config = self.settings.apply(&self.base_config);
        if &config == self.controller.config() {
            return;
        }
        match TestController::new(config) {
            Ok(controller) => {
                self.controller = controller;
                self.clear_samples();
                self.notice = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected settings");
                self.notice = Some(e.to_string());
                self.settings = Settings::from_config(self.controller.config());
            }
        }
    }

    pub fn start_test(&mut self) {
        self.clear_samples();
        self.expanded = false;
        self.notice = None;
        if let Err(e) = self.controller.start() {
            tracing::warn!(error = %e, "Could not start speed test");
            self.notice = Some(e.to_string());
        }
    }

    pub fn cancel_test(&mut self) {
        self.controller.stop();
    }

    pub fn reset(&mut self) {
        self.controller.reset();
        self.clear_samples();
        self.expanded = false;
        self.notice = None;
    }

    fn clear_samples(&mut self) {
        self.download_samples.clear();
        self.last_sample = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
    Reset,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
