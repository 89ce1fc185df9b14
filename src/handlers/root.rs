//! Root endpoint handler for the landing page.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");
    let uptime_secs = state.start_time.elapsed().as_secs();

    let html = format!(
        r#"<html>
<head><title>Cosanet Exporter {version}</title></head>
<body>
    <h1>Cosanet Exporter {version}</h1>
    <p>Version: {version}</p>
    <p>Uptime: {uptime_secs}s</p>
    <p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#
    );

    Html(html)
}
