//! Sequences latency, download and upload stages and owns the run state the
//! presentation layer reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;

use super::{
    build_client, CancelToken, DownloadTest, LatencyResult, LatencyTest, Phase,
    ThroughputResult, TransferProgress, UploadTest,
};
use crate::config::MeasurementConfig;
use crate::error::{Result, SpeedTestError};

/// Snapshot of a run. `progress` is only meaningful during [`Phase::Download`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    pub phase: Phase,
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub latency_samples_ms: Vec<f64>,
    pub error: Option<String>,
    pub latency: Option<LatencyResult>,
    pub download: Option<ThroughputResult>,
    pub upload: Option<ThroughputResult>,
}

#[derive(Clone)]
pub struct TestController {
    inner: Arc<Inner>,
}

struct Inner {
    config: MeasurementConfig,
    client: reqwest::Client,
    state: Mutex<RunState>,
    progress: Mutex<Arc<TransferProgress>>,
    active: Mutex<Option<CancelToken>>,
    /// Bumped on every start and reset; writes from an older run are dropped.
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TestController {
    /// Fails with `ConfigInvalid` before any network I/O.
    pub fn new(config: MeasurementConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client()?;
        Ok(Self::with_client(config, client))
    }

    /// Like [`TestController::new`] but with a caller-built client. The
    /// config must already be valid; each stage re-checks its own section.
    pub fn with_client(config: MeasurementConfig, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                state: Mutex::new(RunState::default()),
                progress: Mutex::new(Arc::new(TransferProgress::default())),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Spawns a run on the current tokio runtime. Rejected with
    /// `AlreadyRunning` unless the phase is Idle, Done or Error.
    pub fn start(&self) -> Result<JoinHandle<RunState>> {
        let inner = &self.inner;
        let mut active = lock(&inner.active);
        if active.is_some() {
            return Err(SpeedTestError::AlreadyRunning);
        }

        let progress = Arc::new(TransferProgress::default());
        let generation = {
            let mut state = lock(&inner.state);
            if !state.phase.accepts_start() {
                return Err(SpeedTestError::AlreadyRunning);
            }
            *state = RunState {
                phase: Phase::Latency,
                ..RunState::default()
            };
            *lock(&inner.progress) = Arc::clone(&progress);
            inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let token = CancelToken::new();
        *active = Some(token.clone());
        drop(active);

        tracing::info!(generation, "Speed test started");
        let inner = Arc::clone(inner);
        Ok(tokio::spawn(async move {
            inner.run(token, generation, progress).await
        }))
    }

    /// Starts a run and waits for it to finish.
    pub async fn run_to_completion(&self) -> Result<RunState> {
        self.start()?
            .await
            .map_err(|e| SpeedTestError::Worker(e.to_string()))
    }

    /// Cancels the in-flight run, if any. The run settles in `Idle`.
    pub fn stop(&self) -> bool {
        match lock(&self.inner.active).as_ref() {
            Some(token) => {
                token.cancel("stopped by user");
                true
            }
            None => false,
        }
    }

    /// Cancels any in-flight run and returns every field to its initial value.
    pub fn reset(&self) {
        let inner = &self.inner;
        let mut active = lock(&inner.active);
        if let Some(token) = active.take() {
            token.cancel("reset");
        }
        let mut state = lock(&inner.state);
        inner.generation.fetch_add(1, Ordering::SeqCst);
        *state = RunState::default();
        *lock(&inner.progress) = Arc::new(TransferProgress::default());
        tracing::debug!("Controller reset");
    }

    pub fn snapshot(&self) -> RunState {
        let mut state = lock(&self.inner.state).clone();
        if state.phase == Phase::Download {
            let progress = lock(&self.inner.progress).clone();
            state.progress = progress.fraction();
            state.downloaded_bytes = progress.bytes();
        }
        state
    }

    pub fn phase(&self) -> Phase {
        lock(&self.inner.state).phase
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.active).is_some()
    }

    /// Download fraction in `[0, 1]`; `None` outside the download phase.
    pub fn progress(&self) -> Option<f64> {
        if self.phase() == Phase::Download {
            Some(lock(&self.inner.progress).fraction())
        } else {
            None
        }
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.state).error.clone()
    }

    pub fn latency(&self) -> Option<LatencyResult> {
        lock(&self.inner.state).latency.clone()
    }

    pub fn download(&self) -> Option<ThroughputResult> {
        lock(&self.inner.state).download.clone()
    }

    pub fn upload(&self) -> Option<ThroughputResult> {
        lock(&self.inner.state).upload.clone()
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.inner.config
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        token: CancelToken,
        generation: u64,
        progress: Arc<TransferProgress>,
    ) -> RunState {
        match self.sequence(&token, generation, &progress).await {
            Ok(()) => {
                tracing::info!("Speed test complete");
                self.finish(generation, |s| s.phase = Phase::Done);
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(reason = token.reason().unwrap_or("cancelled"), "Speed test stopped");
                self.finish(generation, |s| {
                    s.phase = Phase::Idle;
                    s.progress = progress.fraction();
                    s.downloaded_bytes = progress.bytes();
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Speed test failed");
                self.finish(generation, |s| {
                    s.phase = Phase::Error;
                    s.error = Some(e.to_string());
                });
            }
        }

        lock(&self.state).clone()
    }

    /// Writes the terminal phase and releases the run slot in one critical
    /// section, so a reader never sees `Done` while `start()` is still refused.
    fn finish(&self, generation: u64, f: impl FnOnce(&mut RunState)) {
        let mut active = lock(&self.active);
        let mut state = lock(&self.state);
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        f(&mut state);
        *active = None;
    }

    async fn sequence(
        &self,
        token: &CancelToken,
        generation: u64,
        progress: &Arc<TransferProgress>,
    ) -> Result<()> {
        let mut latency_test = LatencyTest::new(self.client.clone(), self.config.latency.clone());
        let latency = latency_test
            .run(token, |ms| {
                self.update(generation, |s| s.latency_samples_ms.push(ms));
            })
            .await?;
        self.update(generation, |s| {
            s.latency = Some(latency);
            s.phase = Phase::Download;
        });

        let download = DownloadTest::new(self.client.clone(), self.config.download.clone())
            .with_progress(Arc::clone(progress))
            .run(token)
            .await?;
        self.update(generation, |s| {
            s.progress = progress.fraction();
            s.downloaded_bytes = progress.bytes();
            s.download = Some(download);
            s.phase = Phase::Upload;
        });

        let upload = UploadTest::new(self.client.clone(), self.config.upload.clone())
            .run(token)
            .await?;
        self.update(generation, |s| s.upload = Some(upload));
        Ok(())
    }

    /// Applies `f` unless a reset or a newer run has superseded `generation`.
    fn update(&self, generation: u64, f: impl FnOnce(&mut RunState)) -> bool {
        let mut state = lock(&self.state);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        f(&mut state);
        true
    }
}
