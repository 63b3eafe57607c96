pub mod cancel;
pub mod controller;
pub mod download;
pub mod payload;
pub mod ping;
pub mod upload;

use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::RequestBuilder;
use serde::Serialize;

use crate::error::Result;

pub use cancel::CancelToken;
pub use controller::{RunState, TestController};
pub use download::{DownloadTest, TransferProgress};
pub use ping::LatencyTest;
pub use upload::UploadTest;

/// Floor applied to elapsed time so an instant transfer cannot divide by zero.
const MIN_ELAPSED_SECS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Latency,
    Download,
    Upload,
    Done,
    Error,
}

impl Phase {
    /// Whether a new run may begin from this phase.
    pub fn accepts_start(self) -> bool {
        matches!(self, Phase::Idle | Phase::Done | Phase::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Phase::Latency | Phase::Download | Phase::Upload)
    }
}

/// Per-probe round-trip samples. The first sample is kept but excluded from
/// the derived statistics since it carries DNS/TLS warm-up cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyResult {
    samples_ms: Vec<f64>,
    mean_ms: f64,
    jitter_ms: f64,
}

impl LatencyResult {
    pub fn from_samples(samples_ms: Vec<f64>) -> Self {
        let retained = samples_ms.get(1..).unwrap_or_default();
        let divisor = retained.len().max(1) as f64;
        let mean_ms = retained.iter().sum::<f64>() / divisor;
        let jitter_ms = retained.iter().map(|s| (s - mean_ms).abs()).sum::<f64>() / divisor;
        Self {
            samples_ms,
            mean_ms,
            jitter_ms,
        }
    }

    pub fn samples_ms(&self) -> &[f64] {
        &self.samples_ms
    }

    pub fn retained_ms(&self) -> &[f64] {
        self.samples_ms.get(1..).unwrap_or_default()
    }

    pub fn mean_ms(&self) -> f64 {
        self.mean_ms
    }

    /// Mean absolute deviation of the retained samples.
    pub fn jitter_ms(&self) -> f64 {
        self.jitter_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputResult {
    bytes: u64,
    elapsed_secs: f64,
    bits_per_second: f64,
    degraded: bool,
}

impl ThroughputResult {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        Self {
            bytes,
            elapsed_secs,
            bits_per_second: rate_bps(bytes, elapsed_secs),
            degraded: false,
        }
    }

    /// Marks a best-effort result whose transfer did not complete cleanly.
    pub fn into_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs)
    }

    pub fn bits_per_second(&self) -> f64 {
        self.bits_per_second
    }

    pub fn mbps(&self) -> f64 {
        self.bits_per_second / 1_000_000.0
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// `bytes * 8 / seconds`, with `seconds` floored to avoid division by zero.
pub fn rate_bps(bytes: u64, elapsed_secs: f64) -> f64 {
    (bytes as f64 * 8.0) / elapsed_secs.max(MIN_ELAPSED_SECS)
}

pub fn build_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

/// Asks every cache on the path to stay out of the measurement.
pub(crate) fn no_store(request: RequestBuilder) -> RequestBuilder {
    request
        .header(CACHE_CONTROL, "no-store, no-cache")
        .header(PRAGMA, "no-cache")
}
