use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinSet;

use super::{no_store, CancelToken, ThroughputResult};
use crate::config::{DownloadConfig, EndpointTemplate};
use crate::error::{Result, SpeedTestError};

/// Byte counter shared by every stream of one download stage.
///
/// Streams only ever add to it, so `fraction()` never goes backwards while
/// the stage runs.
#[derive(Debug, Default)]
pub struct TransferProgress {
    bytes: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            bytes: AtomicU64::new(0),
            total: AtomicU64::new(total),
        }
    }

    pub fn add(&self, n: u64) -> u64 {
        self.bytes.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Received bytes over the stage budget, clamped to `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => (self.bytes() as f64 / total as f64).min(1.0),
        }
    }

    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }
}

/// Everything a stream needs, shared across the stage.
struct StreamContext {
    client: reqwest::Client,
    config: DownloadConfig,
    progress: Arc<TransferProgress>,
    token: CancelToken,
}

enum ChunkError {
    Cancelled,
    /// `received` bytes arrived (and were counted) before the request broke.
    Failed { received: u64, reason: String },
}

/// Parallel multi-endpoint download. Each stream walks the endpoint list on
/// failure so one dead mirror does not stall the stage.
pub struct DownloadTest {
    client: reqwest::Client,
    config: DownloadConfig,
    progress: Arc<TransferProgress>,
}

impl DownloadTest {
    pub fn new(client: reqwest::Client, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            progress: Arc::new(TransferProgress::default()),
        }
    }

    /// Publishes bytes into `progress` instead of a private counter.
    pub fn with_progress(mut self, progress: Arc<TransferProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Arc<TransferProgress> {
        Arc::clone(&self.progress)
    }

    pub async fn run(&self, token: &CancelToken) -> Result<ThroughputResult> {
        self.config.validate()?;
        token.check()?;

        let per_stream = self.config.per_stream_bytes();
        self.progress.set_total(self.config.measured_bytes());

        // Stage-local token: a failing stream can stop its siblings without
        // marking the whole run as cancelled.
        let stage = token.child();
        let ctx = Arc::new(StreamContext {
            client: self.client.clone(),
            config: self.config.clone(),
            progress: Arc::clone(&self.progress),
            token: stage.clone(),
        });

        tracing::debug!(
            streams = self.config.parallel,
            per_stream,
            endpoints = self.config.endpoints.len(),
            "Starting download streams"
        );

        let start = Instant::now();
        let mut workers = JoinSet::new();
        for id in 0..self.config.parallel {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { run_stream(&ctx, id, per_stream).await });
        }

        while let Some(joined) = workers.join_next().await {
            let failure = match joined {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e,
                Err(e) => SpeedTestError::Worker(e.to_string()),
            };
            stage.cancel("sibling stream failed");
            workers.shutdown().await;
            if token.is_cancelled() {
                return Err(token.to_error());
            }
            tracing::error!(error = %failure, "Download stage failed");
            return Err(failure);
        }

        let elapsed = start.elapsed();
        let result = ThroughputResult::new(self.progress.bytes(), elapsed);
        tracing::info!(
            bytes = result.bytes(),
            elapsed_ms = elapsed.as_millis() as u64,
            mbps = result.mbps(),
            "Download measured"
        );
        Ok(result)
    }
}

/// One stream: pull `budget` bytes in capped chunks, failing over to the
/// next endpoint template whenever a request breaks.
async fn run_stream(ctx: &StreamContext, id: usize, budget: u64) -> Result<u64> {
    let endpoints = &ctx.config.endpoints;
    let max_failures = ctx.config.max_consecutive_failures();

    let mut remaining = budget;
    let mut received_total = 0u64;
    let mut cursor = 0usize;
    let mut failures = 0u32;

    while remaining > 0 {
        ctx.token.check()?;

        let chunk = remaining.min(ctx.config.chunk_cap);
        let template = &endpoints[cursor % endpoints.len()];

        match fetch_chunk(ctx, template, chunk).await {
            Ok(received) => {
                remaining = remaining.saturating_sub(received);
                received_total += received;
                failures = 0;
            }
            Err(ChunkError::Cancelled) => return Err(ctx.token.to_error()),
            Err(ChunkError::Failed { received, reason }) => {
                // Partial bytes count towards the total, but the retry asks
                // for the same budget again.
                received_total += received;
                failures += 1;
                cursor += 1;
                tracing::warn!(
                    stream = id,
                    endpoint = %template,
                    failures,
                    %reason,
                    "Download request failed; failing over"
                );

                if failures >= max_failures {
                    return Err(SpeedTestError::EndpointUnavailable(format!(
                        "stream {id} gave up after {failures} consecutive failures (last: {reason})"
                    )));
                }

                let delay = ctx.config.backoff(failures);
                tokio::select! {
                    biased;
                    _ = ctx.token.cancelled() => return Err(ctx.token.to_error()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::debug!(stream = id, bytes = received_total, "Download stream finished");
    Ok(received_total)
}

async fn fetch_chunk(
    ctx: &StreamContext,
    template: &EndpointTemplate,
    chunk: u64,
) -> std::result::Result<u64, ChunkError> {
    let url = template.render(chunk);
    let request = no_store(ctx.client.get(&url))
        .timeout(Duration::from_millis(ctx.config.request_timeout_ms));

    let response = tokio::select! {
        biased;
        _ = ctx.token.cancelled() => return Err(ChunkError::Cancelled),
        sent = request.send() => sent.map_err(|e| ChunkError::Failed {
            received: 0,
            reason: e.to_string(),
        })?,
    };

    if !response.status().is_success() {
        return Err(ChunkError::Failed {
            received: 0,
            reason: format!("status {}", response.status()),
        });
    }

    let mut stream = response.bytes_stream();
    let mut received = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return Err(ChunkError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(bytes)) => {
                let n = bytes.len() as u64;
                received += n;
                ctx.progress.add(n);
            }
            Some(Err(e)) => {
                return Err(ChunkError::Failed {
                    received,
                    reason: e.to_string(),
                })
            }
            None => break,
        }
    }

    if received == 0 {
        return Err(ChunkError::Failed {
            received: 0,
            reason: "empty response body".to_string(),
        });
    }
    Ok(received)
}
