//! HTTP service used by the integration tests.
use axum::{
    body::Bytes,
    debug_handler,
    extract::Path,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Response header carrying the number of bytes `/upload` received.
pub const UPLOAD_LENGTH: &str = "x-upload-length";

pub fn router() -> Router {
    Router::new()
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/delay/normal/:mean_ms/:std_ms", get(normal_delay))
        .route("/status/:code", get(status).post(status))
        .route("/limited/:max_tps/key/:key", get(limited))
        .route("/upload", post(upload))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve(listener).await
}

/// Serves on an already bound listener, e.g. one on an ephemeral port.
pub async fn serve(listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    debug!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router()).await?;
    Ok(())
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) {
    counter!("mock-service.requests", "route" => "delay").increment(1);
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
pub async fn normal_delay(Path((mean_ms, std_ms)): Path<(f64, f64)>) -> Result<(), StatusCode> {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    let normal = Normal::new(mean_ms, std_ms).map_err(|_| StatusCode::BAD_REQUEST)?;
    let sample = normal.sample(&mut rand::thread_rng()).max(0.);
    histogram!("mock-service.delay_ms").record(sample);
    tokio::time::sleep(Duration::from_secs_f64(sample / 1000.)).await;
    Ok(())
}

#[debug_handler]
pub async fn status(Path(code): Path<u16>) -> StatusCode {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub length: usize,
    pub content_type: Option<String>,
}

#[debug_handler]
pub async fn upload(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    counter!("mock-service.upload_bytes").increment(body.len() as u64);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    (
        [(UPLOAD_LENGTH, body.len().to_string())],
        Json(UploadSummary {
            length: body.len(),
            content_type,
        }),
    )
}

lazy_static! {
    static ref LIMITED_MAP: Arc<RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

/// Answers 429 once `key` goes over `max_tps`.
#[debug_handler]
pub async fn limited(Path((max_tps, key)): Path<(u32, String)>) -> StatusCode {
    TPS_MEASURE.fetch_add(1, Ordering::Relaxed);
    let Some(max_tps) = NonZeroU32::new(max_tps) else {
        return StatusCode::BAD_REQUEST;
    };

    let read = LIMITED_MAP
        .read()
        .ok()
        .and_then(|map| map.get(&key).cloned());
    let limiter = match read {
        Some(limiter) => limiter,
        None => {
            let limiter = Arc::new(rate_limiter(max_tps));
            if let Ok(mut map) = LIMITED_MAP.write() {
                map.entry(key).or_insert_with(|| limiter.clone()).clone()
            } else {
                limiter
            }
        }
    };

    match limiter.check() {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::TOO_MANY_REQUESTS,
    }
}

/** Utils **/

pub fn rate_limiter(tps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(tps))
}

/** TPS Printer **/

static TPS_MEASURE: AtomicU64 = AtomicU64::new(0);

pub async fn tps_measure_task() {
    loop {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let transactions = TPS_MEASURE.swap(0, Ordering::Relaxed);
        gauge!("mock-service.tps").set(transactions as f64);
        println!("{transactions} TPS");
    }
}
