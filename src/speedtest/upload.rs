use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;

use super::{no_store, payload, CancelToken, ThroughputResult};
use crate::config::UploadConfig;
use crate::error::{Result, SpeedTestError};

/// Single timed POST of a random payload. No chunking, no retry.
pub struct UploadTest {
    client: reqwest::Client,
    config: UploadConfig,
}

impl UploadTest {
    pub fn new(client: reqwest::Client, config: UploadConfig) -> Self {
        Self { client, config }
    }

    /// A transport failure still yields a rate measured up to the failure,
    /// flagged as degraded, unless `config.strict` is set.
    pub async fn run(&self, token: &CancelToken) -> Result<ThroughputResult> {
        self.config.validate()?;
        token.check()?;

        let len = usize::try_from(self.config.total_bytes)
            .map_err(|_| SpeedTestError::invalid("upload byte budget does not fit in memory"))?;
        let data = payload::generate(len)?;
        let size = data.len() as u64;

        let request = no_store(self.client.post(&self.config.endpoint))
            .header(CONTENT_TYPE, "application/octet-stream")
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .body(data);

        tracing::debug!(endpoint = %self.config.endpoint, bytes = size, "Starting upload");
        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(token.to_error()),
            sent = request.send() => match sent {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(format!("status {}", response.status())),
                Err(e) => Err(e.to_string()),
            },
        };
        let elapsed = start.elapsed();
        let result = ThroughputResult::new(size, elapsed);

        match outcome {
            Ok(()) => {
                tracing::info!(
                    bytes = size,
                    elapsed_ms = elapsed.as_millis() as u64,
                    mbps = result.mbps(),
                    "Upload measured"
                );
                Ok(result)
            }
            Err(reason) if self.config.strict => {
                tracing::error!(%reason, "Upload failed");
                Err(SpeedTestError::UploadFailed(reason))
            }
            Err(reason) => {
                tracing::warn!(%reason, mbps = result.mbps(), "Upload failed; reporting best-effort rate");
                Ok(result.into_degraded())
            }
        }
    }
}
