//! Metrics endpoint handler for Prometheus scraping.
//!
//! Runs one orchestrated collection (usually a cache replay) on the
//! blocking pool, appends the exporter's own registry families and encodes
//! everything in the text exposition format.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::sample::samples_to_families;
use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    CollectionFailed,
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        let message = match self {
            MetricsError::CollectionFailed => "Failed to collect metrics",
            MetricsError::EncodingFailed => "Failed to encode metrics",
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing /metrics request");

    // The orchestrator blocks on the pinned worker; keep that off the
    // async workers.
    let collector = state.collector.clone();
    let samples = tokio::task::spawn_blocking(move || collector.collect())
        .await
        .map_err(|err| {
            error!(err = %err, "collection task failed");
            MetricsError::CollectionFailed
        })?;

    state.scrape_duration.set(start.elapsed().as_secs_f64());

    let mut families = samples_to_families(&samples);
    families.extend(state.registry.gather());

    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    let encoder = TextEncoder::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }

    debug!(
        "Metrics request completed: {} samples, {} bytes, {:.3}ms",
        samples.len(),
        buffer.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}
