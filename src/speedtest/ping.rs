use std::time::{Duration, Instant};

use rand::Rng;

use super::{no_store, CancelToken, LatencyResult};
use crate::config::LatencyConfig;
use crate::error::{Result, SpeedTestError};

/// Sequential round-trip sampler. Probes never overlap so one RTT cannot
/// queue behind another.
pub struct LatencyTest {
    client: reqwest::Client,
    config: LatencyConfig,
    samples: Vec<f64>,
}

impl LatencyTest {
    pub fn new(client: reqwest::Client, config: LatencyConfig) -> Self {
        Self {
            client,
            config,
            samples: Vec::new(),
        }
    }

    /// Takes `config.samples` probes. A failed or timed-out probe still
    /// records the time spent waiting on it; only cancellation ends the run early.
    pub async fn run<F>(&mut self, token: &CancelToken, mut on_sample: F) -> Result<LatencyResult>
    where
        F: FnMut(f64),
    {
        self.config.validate()?;
        self.samples.clear();

        for i in 0..self.config.samples {
            token.check()?;

            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(token.to_error()),
                outcome = self.probe() => outcome,
            };
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            if let Err(e) = outcome {
                tracing::debug!(probe = i, error = %e, "Latency probe failed; keeping elapsed time");
            }
            tracing::debug!(probe = i, elapsed_ms, "Latency sample");
            self.samples.push(elapsed_ms);
            on_sample(elapsed_ms);

            if i + 1 < self.config.samples {
                let delay = self.next_delay();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(token.to_error()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let result = LatencyResult::from_samples(self.samples.clone());
        tracing::info!(
            mean_ms = result.mean_ms(),
            jitter_ms = result.jitter_ms(),
            samples = result.samples_ms().len(),
            "Latency measured"
        );
        Ok(result)
    }

    async fn probe(&self) -> Result<()> {
        let response = no_store(self.client.get(&self.config.endpoint))
            .timeout(self.config.timeout())
            .send()
            .await
            .map_err(|e| SpeedTestError::ProbeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SpeedTestError::ProbeFailed(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Randomized pause between probes so consecutive requests are not coalesced.
    fn next_delay(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.config.min_delay_ms..=self.config.max_delay_ms);
        Duration::from_millis(ms)
    }
}
