//! Measurement configuration.
//!
//! Fixed when a [`TestController`](crate::speedtest::TestController) is built.
//! Every field has a default so a TOML file only needs the keys it overrides:
//!
//! ```toml
//! [download]
//! total_bytes = 52428800
//! parallel = 4
//! endpoints = ["https://speed.cloudflare.com/__down?bytes={bytes}"]
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeedTestError};

const MIB: u64 = 1024 * 1024;

/// Placeholder substituted with the requested byte count.
pub const BYTES_PLACEHOLDER: &str = "{bytes}";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub latency: LatencyConfig,
    pub download: DownloadConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    pub samples: usize,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            samples: 6,
            endpoint: "https://httpbin.org/get".to_string(),
            timeout_ms: 5_000,
            min_delay_ms: 60,
            max_delay_ms: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub total_bytes: u64,
    pub parallel: usize,
    pub endpoints: Vec<EndpointTemplate>,
    pub chunk_cap: u64,
    pub request_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How many times a stream may cycle through every endpoint before giving up.
    pub max_failover_rounds: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            total_bytes: 30 * MIB,
            parallel: 3,
            endpoints: vec![
                EndpointTemplate::new("https://speed.cloudflare.com/__down?bytes={bytes}"),
                EndpointTemplate::new("https://httpbin.org/bytes/{bytes}"),
            ],
            chunk_cap: 2 * MIB,
            request_timeout_ms: 60_000,
            retry_backoff_ms: 50,
            max_backoff_ms: 2_000,
            max_failover_rounds: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub total_bytes: u64,
    pub endpoint: String,
    pub request_timeout_ms: u64,
    /// Surface a failed upload as an error instead of a degraded result.
    pub strict: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            total_bytes: 4 * MIB,
            endpoint: "https://httpbin.org/post".to_string(),
            request_timeout_ms: 60_000,
            strict: false,
        }
    }
}

/// A download URL with a `{bytes}` placeholder for the chunk size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointTemplate(String);

impl EndpointTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, bytes: u64) -> String {
        self.0.replace(BYTES_PLACEHOLDER, &bytes.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl MeasurementConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: MeasurementConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SpeedTestError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded measurement config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.latency.validate()?;
        self.download.validate()?;
        self.upload.validate()
    }
}

impl LatencyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(SpeedTestError::invalid("latency sample count must be at least 1"));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(SpeedTestError::invalid(format!(
                "latency delay range is inverted ({}..{} ms)",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        check_url("latency endpoint", &self.endpoint)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.total_bytes == 0 {
            return Err(SpeedTestError::invalid("download byte budget must be greater than 0"));
        }
        if self.parallel == 0 {
            return Err(SpeedTestError::invalid("download parallelism must be at least 1"));
        }
        if self.per_stream_bytes() == 0 {
            return Err(SpeedTestError::invalid(format!(
                "download budget of {} bytes is too small for {} streams",
                self.total_bytes, self.parallel
            )));
        }
        if self.chunk_cap == 0 {
            return Err(SpeedTestError::invalid("download chunk cap must be greater than 0"));
        }
        if self.max_failover_rounds == 0 {
            return Err(SpeedTestError::invalid("max_failover_rounds must be at least 1"));
        }
        if self.endpoints.is_empty() {
            return Err(SpeedTestError::invalid("at least one download endpoint is required"));
        }
        for template in &self.endpoints {
            if !template.as_str().contains(BYTES_PLACEHOLDER) {
                return Err(SpeedTestError::invalid(format!(
                    "download endpoint {template} has no {BYTES_PLACEHOLDER} placeholder"
                )));
            }
            check_url("download endpoint", &template.render(1))?;
        }
        Ok(())
    }

    /// Bytes each stream transfers. The division remainder is not measured.
    pub fn per_stream_bytes(&self) -> u64 {
        match self.parallel {
            0 => 0,
            n => self.total_bytes / n as u64,
        }
    }

    /// Bytes the download stage actually sets out to transfer.
    pub fn measured_bytes(&self) -> u64 {
        self.per_stream_bytes() * self.parallel as u64
    }

    /// Consecutive failures a single stream tolerates.
    pub fn max_consecutive_failures(&self) -> u32 {
        (self.endpoints.len() as u32).saturating_mul(self.max_failover_rounds)
    }

    /// Exponential backoff after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms.max(self.retry_backoff_ms));
        Duration::from_millis(ms)
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.total_bytes == 0 {
            return Err(SpeedTestError::invalid("upload byte budget must be greater than 0"));
        }
        if usize::try_from(self.total_bytes).is_err() {
            return Err(SpeedTestError::invalid("upload byte budget does not fit in memory"));
        }
        check_url("upload endpoint", &self.endpoint)
    }
}

fn check_url(what: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| SpeedTestError::invalid(format!("{what} {raw:?} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(SpeedTestError::invalid(format!(
            "{what} {raw:?} uses unsupported scheme {scheme}"
        ))),
    }
}
