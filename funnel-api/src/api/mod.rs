//! HTTP API handlers for funnel-api

pub mod analytics;
pub mod buildinfo;
pub mod crm;
pub mod dashboard;
pub mod health;
pub mod sse;
pub mod track;
pub mod voice;

use funnel_common::TimeRange;
use serde::Deserialize;

pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use sse::event_stream;
pub use voice::voice_socket;

/// `?range=7d|14d|30d|90d` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub range: Option<String>,
}

impl RangeQuery {
    /// Requested range, or `default` when absent; unknown tokens mean 7 days
    pub fn resolve(&self, default: TimeRange) -> TimeRange {
        self.range
            .as_deref()
            .map(TimeRange::parse_lenient)
            .unwrap_or(default)
    }
}
