//! Event types and EventBus
//!
//! Events are broadcast in-process and streamed to dashboards over SSE so
//! they can refetch the queries a mutation invalidated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Funnel event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FunnelEvent {
    /// Cached query results for `scope` are stale and must be refetched
    QueryInvalidated {
        scope: String,
        timestamp: DateTime<Utc>,
    },

    /// A landing page captured an email
    LeadRecorded {
        session_id: String,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// A visitor clicked the outbound call-to-action
    ClickRecorded {
        session_id: String,
        utm_source: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl FunnelEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            FunnelEvent::QueryInvalidated { .. } => "QueryInvalidated",
            FunnelEvent::LeadRecorded { .. } => "LeadRecorded",
            FunnelEvent::ClickRecorded { .. } => "ClickRecorded",
        }
    }
}

/// Broadcast bus for [`FunnelEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FunnelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FunnelEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: FunnelEvent,
    ) -> Result<usize, broadcast::error::SendError<FunnelEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FunnelEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
