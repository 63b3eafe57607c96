//! Local HTTP fixture standing in for the public speed test endpoints.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use netgauge::config::EndpointTemplate;
use netgauge::MeasurementConfig;

pub const KIB: u64 = 1024;

#[derive(Debug, Default)]
pub struct Hits {
    pub pings: AtomicUsize,
    pub failures: AtomicUsize,
    pub bytes_served: AtomicU64,
    pub bytes_uploaded: AtomicU64,
    /// Sizes asked of the `/bytes` route, in arrival order.
    pub byte_requests: Mutex<Vec<u64>>,
}

impl Hits {
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::SeqCst)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::SeqCst)
    }

    pub fn byte_requests(&self) -> Vec<u64> {
        self.byte_requests.lock().unwrap().clone()
    }
}

pub struct TestServer {
    pub base: String,
    pub hits: Arc<Hits>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let hits = Arc::new(Hits::default());
        let app = Router::new()
            .route("/ping", get(ping))
            .route("/bytes/{n}", get(serve_bytes))
            .route("/fail/{n}", get(fail))
            .route("/slow/{n}", get(slow))
            .route("/empty/{n}", get(empty))
            .route("/trunc/{n}", get(truncated))
            .route("/upload", post(accept_upload))
            .route("/upload-fail", post(reject_upload))
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&hits));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn template(&self, route: &str) -> EndpointTemplate {
        EndpointTemplate::new(format!("{}/{}/{{bytes}}", self.base, route))
    }

    /// Small, fast config pointed at this server.
    pub fn config(&self) -> MeasurementConfig {
        let mut config = MeasurementConfig::default();
        config.latency.endpoint = self.url("/ping");
        config.latency.min_delay_ms = 1;
        config.latency.max_delay_ms = 5;
        config.download.total_bytes = 768 * KIB;
        config.download.parallel = 3;
        config.download.chunk_cap = 64 * KIB;
        config.download.endpoints = vec![self.template("bytes")];
        config.download.retry_backoff_ms = 5;
        config.download.max_backoff_ms = 20;
        config.upload.total_bytes = 256 * KIB;
        config.upload.endpoint = self.url("/upload");
        config
    }
}

/// Direct client so tests never route through an ambient proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn ping(State(hits): State<Arc<Hits>>) -> &'static str {
    hits.pings.fetch_add(1, Ordering::SeqCst);
    "pong"
}

async fn serve_bytes(State(hits): State<Arc<Hits>>, Path(n): Path<usize>) -> Vec<u8> {
    hits.bytes_served.fetch_add(n as u64, Ordering::SeqCst);
    hits.byte_requests.lock().unwrap().push(n as u64);
    vec![0x5a; n]
}

async fn fail(State(hits): State<Arc<Hits>>) -> StatusCode {
    hits.failures.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}

/// 200 with nothing in it.
async fn empty(State(hits): State<Arc<Hits>>) -> StatusCode {
    hits.failures.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

/// Sends half of the requested bytes, then breaks the connection.
async fn truncated(State(hits): State<Arc<Hits>>, Path(n): Path<usize>) -> Body {
    hits.failures.fetch_add(1, Ordering::SeqCst);
    let half = vec![0x5a; n / 2];
    let stream = futures::stream::iter([
        Ok(half),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "truncated")),
    ]);
    Body::from_stream(stream)
}

/// Trickles 1 KiB every 20 ms and never finishes.
async fn slow() -> Body {
    let stream = futures::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok::<_, std::io::Error>(vec![0u8; 1024]), ()))
    });
    Body::from_stream(stream)
}

async fn accept_upload(State(hits): State<Arc<Hits>>, body: Bytes) -> StatusCode {
    hits.bytes_uploaded.fetch_add(body.len() as u64, Ordering::SeqCst);
    StatusCode::OK
}

async fn reject_upload() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}
