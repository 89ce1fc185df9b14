//! Application state shared with the HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use prometheus::{Gauge, Registry};

use crate::collector::NetnsCollector;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    /// Registry holding the exporter's own metrics; collected samples are
    /// appended to its families at encoding time.
    pub registry: Registry,
    pub scrape_duration: Gauge,
    pub collector: Arc<NetnsCollector>,
    /// Server start time for the landing page uptime.
    pub start_time: Instant,
}
