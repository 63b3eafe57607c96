//! Stage-level tests: latency sampler, download orchestrator, upload.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{client, TestServer, KIB};
use netgauge::speedtest::{CancelToken, DownloadTest, LatencyTest, UploadTest};
use netgauge::SpeedTestError;

#[tokio::test]
async fn test_latency_keeps_every_sample() {
    let server = TestServer::spawn().await;
    let mut config = server.config().latency;
    config.samples = 5;

    let mut seen = Vec::new();
    let result = LatencyTest::new(client(), config)
        .run(&CancelToken::new(), |ms| seen.push(ms))
        .await
        .unwrap();

    assert_eq!(result.samples_ms().len(), 5);
    assert_eq!(result.retained_ms().len(), 4);
    assert_eq!(seen, result.samples_ms());
    assert!(result.mean_ms() > 0.0);
    assert!(result.jitter_ms() >= 0.0);
    assert_eq!(server.hits.pings.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_latency_records_failed_probes() {
    let server = TestServer::spawn().await;
    let mut config = server.config().latency;
    config.samples = 3;
    config.endpoint = server.url("/no-such-route");

    let result = LatencyTest::new(client(), config)
        .run(&CancelToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(result.samples_ms().len(), 3);
    assert!(result.samples_ms().iter().all(|&ms| ms >= 0.0));
}

#[tokio::test]
async fn test_latency_stops_during_delay() {
    let server = TestServer::spawn().await;
    let mut config = server.config().latency;
    config.samples = 50;
    config.min_delay_ms = 10_000;
    config.max_delay_ms = 10_000;

    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel("stopped by user");
    });

    let started = Instant::now();
    let err = LatencyTest::new(client(), config)
        .run(&token, |_| {})
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(server.hits.pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_download_progress_is_monotonic_and_completes() {
    let server = TestServer::spawn().await;
    let config = server.config().download;
    let measured = config.measured_bytes();

    let test = DownloadTest::new(client(), config);
    let progress = test.progress();
    let done = Arc::new(AtomicBool::new(false));

    let watcher = {
        let progress = Arc::clone(&progress);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut readings = Vec::new();
            while !done.load(Ordering::SeqCst) {
                readings.push(progress.fraction());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            readings
        })
    };

    let result = test.run(&CancelToken::new()).await.unwrap();
    done.store(true, Ordering::SeqCst);
    let readings = watcher.await.unwrap();

    assert!(readings.windows(2).all(|w| w[0] <= w[1]));
    assert!((progress.fraction() - 1.0).abs() < 1e-9);
    assert_eq!(result.bytes(), measured);
    assert!(result.bits_per_second() > 0.0);
    assert!(!result.is_degraded());
}

#[tokio::test]
async fn test_download_fails_over_to_second_endpoint() {
    let server = TestServer::spawn().await;
    let mut config = server.config().download;
    config.endpoints = vec![server.template("fail"), server.template("bytes")];
    let measured = config.measured_bytes();
    let streams = config.parallel;

    let result = DownloadTest::new(client(), config)
        .run(&CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.bytes(), measured);
    assert_eq!(server.hits.bytes_served(), measured);
    // Each stream hits the dead endpoint once, then stays on the good one.
    assert_eq!(server.hits.failures(), streams);
}

#[tokio::test]
async fn test_download_treats_empty_body_as_failure() {
    let server = TestServer::spawn().await;
    let mut config = server.config().download;
    config.endpoints = vec![server.template("empty"), server.template("bytes")];
    let measured = config.measured_bytes();
    let streams = config.parallel;

    let result = DownloadTest::new(client(), config)
        .run(&CancelToken::new())
        .await
        .unwrap();

    assert_eq!(server.hits.failures(), streams);
    assert_eq!(result.bytes(), measured);
    assert_eq!(server.hits.bytes_served(), measured);
}

#[tokio::test]
async fn test_download_retries_full_budget_after_partial_body() {
    let server = TestServer::spawn().await;
    let mut config = server.config().download;
    config.parallel = 1;
    config.total_bytes = 64 * KIB;
    config.chunk_cap = 64 * KIB;
    config.endpoints = vec![server.template("trunc"), server.template("bytes")];

    let test = DownloadTest::new(client(), config);
    let progress = test.progress();
    let result = test.run(&CancelToken::new()).await.unwrap();

    assert_eq!(server.hits.failures(), 1);
    // The retry asks for the whole chunk again, not what was left over.
    assert_eq!(server.hits.byte_requests(), vec![64 * KIB]);
    // Partial bytes still crossed the wire and count towards the rate.
    assert_eq!(result.bytes(), 32 * KIB + 64 * KIB);
    assert_eq!(progress.fraction(), 1.0);
}

#[tokio::test]
async fn test_download_gives_up_after_retry_bound() {
    let server = TestServer::spawn().await;
    let mut config = server.config().download;
    config.endpoints = vec![server.template("fail")];
    config.parallel = 1;
    config.max_failover_rounds = 3;
    config.retry_backoff_ms = 1;
    config.max_backoff_ms = 4;

    let err = DownloadTest::new(client(), config)
        .run(&CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SpeedTestError::EndpointUnavailable(_)));
    assert_eq!(server.hits.failures(), 3);
}

#[tokio::test]
async fn test_download_cancel_aborts_in_flight_streams() {
    let server = TestServer::spawn().await;
    let mut config = server.config().download;
    config.endpoints = vec![server.template("slow")];
    config.parallel = 2;
    config.total_bytes = 4 * 1024 * KIB;
    config.retry_backoff_ms = 250;
    let backoff = Duration::from_millis(config.retry_backoff_ms);

    let test = DownloadTest::new(client(), config);
    let progress = test.progress();
    let token = CancelToken::new();
    let run = {
        let token = token.clone();
        tokio::spawn(async move { test.run(&token).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(progress.bytes() > 0);

    let cancelled_at = Instant::now();
    token.cancel("stopped by user");
    let err = tokio::time::timeout(backoff * 2, run)
        .await
        .expect("download did not stop in time")
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(cancelled_at.elapsed() < backoff * 2);

    let settled = progress.bytes();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(progress.bytes(), settled);
}

#[tokio::test]
async fn test_download_cancel_during_backoff() {
    let server = TestServer::spawn().await;
    let mut config = server.config().download;
    config.endpoints = vec![server.template("fail")];
    config.retry_backoff_ms = 10_000;
    config.max_backoff_ms = 10_000;

    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel("stopped by user");
    });

    let started = Instant::now();
    let err = DownloadTest::new(client(), config)
        .run(&token)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_upload_sends_whole_payload() {
    let server = TestServer::spawn().await;
    let config = server.config().upload;
    let size = config.total_bytes;

    let result = UploadTest::new(client(), config)
        .run(&CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.bytes(), size);
    assert_eq!(server.hits.bytes_uploaded(), size);
    assert!(!result.is_degraded());
    assert!(result.bits_per_second() > 0.0);
}

#[tokio::test]
async fn test_upload_failure_is_best_effort_by_default() {
    let server = TestServer::spawn().await;
    let mut config = server.config().upload;
    config.endpoint = server.url("/upload-fail");

    let result = UploadTest::new(client(), config)
        .run(&CancelToken::new())
        .await
        .unwrap();

    assert!(result.is_degraded());
    assert!(result.bits_per_second() > 0.0);
}

#[tokio::test]
async fn test_strict_upload_failure_is_an_error() {
    let server = TestServer::spawn().await;
    let mut config = server.config().upload;
    config.endpoint = server.url("/upload-fail");
    config.strict = true;

    let err = UploadTest::new(client(), config)
        .run(&CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SpeedTestError::UploadFailed(_)));
}
