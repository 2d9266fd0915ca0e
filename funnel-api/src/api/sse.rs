//! Server-Sent Events for dashboards
//!
//! Streams `QueryInvalidated`, `LeadRecorded` and `ClickRecorded` events so
//! open dashboards refetch what a mutation made stale.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /api/events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    funnel_common::sse::create_event_sse_stream("funnel-api", &state.event_bus)
}
