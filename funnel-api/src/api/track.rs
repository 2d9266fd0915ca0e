//! Landing page event ingestion
//!
//! Each request describes one page load (session token, page URL, browser
//! details). Requests without a session token get a fresh one, returned in
//! the response so the page can reuse it for its lead and click events.

use axum::{
    extract::State,
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use funnel_common::tracking::{TrackingSession, Visit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ApiJson, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VisitRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Full page URL or path with query string
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub screen_width: Option<u32>,
    #[serde(default)]
    pub screen_height: Option<u32>,
}

impl VisitRequest {
    fn into_visit(self, headers: &HeaderMap) -> Visit {
        let header_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut visit = Visit::from_url(self.session_id, self.page_url.as_deref().unwrap_or("/"));
        visit.referrer = self.referrer;
        visit.user_agent = self.user_agent.or(header_agent);
        visit.screen = self.screen_width.zip(self.screen_height);
        visit
    }
}

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    #[serde(flatten)]
    pub visit: VisitRequest,
    pub email: String,
    /// Form that captured the email; stored exactly as given
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct CustomEventRequest {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub session_id: String,
    pub id: i64,
}

fn open_session(state: &AppState, request: VisitRequest, headers: &HeaderMap) -> TrackingSession {
    TrackingSession::new(Arc::clone(&state.tracker), request.into_visit(headers))
}

/// POST /api/track/pageview
pub async fn track_pageview(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<VisitRequest>,
) -> ApiResult<(StatusCode, Json<TrackResponse>)> {
    let session = open_session(&state, request, &headers);
    let id = session.start().await?.map_or(0, |pageview| pageview.id);
    Ok((
        StatusCode::CREATED,
        Json(TrackResponse {
            session_id: session.session_id().to_string(),
            id,
        }),
    ))
}

/// POST /api/track/lead
pub async fn track_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LeadRequest>,
) -> ApiResult<(StatusCode, Json<TrackResponse>)> {
    let session = open_session(&state, request.visit, &headers);
    let lead = session.lead(&request.email, &request.source).await?;
    Ok((
        StatusCode::CREATED,
        Json(TrackResponse {
            session_id: session.session_id().to_string(),
            id: lead.id,
        }),
    ))
}

/// POST /api/track/click
pub async fn track_click(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<VisitRequest>,
) -> ApiResult<(StatusCode, Json<TrackResponse>)> {
    let session = open_session(&state, request, &headers);
    let click = session.click().await?;
    Ok((
        StatusCode::CREATED,
        Json(TrackResponse {
            session_id: session.session_id().to_string(),
            id: click.id,
        }),
    ))
}

/// POST /api/track/event
///
/// Pixel-only; nothing is stored.
pub async fn track_event(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CustomEventRequest>,
) -> ApiResult<StatusCode> {
    if request.name.trim().is_empty() {
        return Err(crate::error::ApiError::BadRequest("event name is required".to_string()));
    }
    state.tracker.track_custom(&request.name, request.params);
    Ok(StatusCode::ACCEPTED)
}
