//! Aggregation endpoints
//!
//! All accept `?range=7d|14d|30d|90d` (default and fallback: 7d) except the
//! email summary and the activity feed, which have fixed windows.

use axum::{
    extract::{Query, State},
    Json,
};
use funnel_common::analytics::{
    ConversionAnalytics, ConversionDayRow, DmCampaignSummary, EmailSignupSummary, FunnelStage,
    PerformanceSummary, RecentActivityItem, TrafficDayRow, TrafficSourceRow,
};
use funnel_common::TimeRange;

use super::RangeQuery;
use crate::error::ApiResult;
use crate::AppState;

/// GET /api/analytics/conversion
pub async fn conversion(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<ConversionAnalytics>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.conversion_analytics(range).await?))
}

/// GET /api/analytics/funnel
pub async fn funnel(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<FunnelStage>>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.conversion_funnel(range).await?))
}

/// GET /api/analytics/traffic-sources
pub async fn traffic_sources(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<TrafficSourceRow>>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.traffic_sources(range).await?))
}

/// GET /api/analytics/traffic-over-time
pub async fn traffic_over_time(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<TrafficDayRow>>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.traffic_over_time(range).await?))
}

/// GET /api/analytics/conversion-over-time
pub async fn conversion_over_time(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<ConversionDayRow>>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.conversion_over_time(range).await?))
}

/// GET /api/analytics/dm-campaigns
pub async fn dm_campaigns(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<DmCampaignSummary>>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.dm_campaign_summary(range).await?))
}

/// GET /api/analytics/performance
pub async fn performance(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<PerformanceSummary>> {
    let range = query.resolve(TimeRange::Week);
    Ok(Json(state.analytics.performance_summary(range).await?))
}

/// GET /api/analytics/email-summary
pub async fn email_summary(State(state): State<AppState>) -> ApiResult<Json<EmailSignupSummary>> {
    Ok(Json(state.analytics.email_signup_summary().await?))
}

/// GET /api/analytics/recent-activity
pub async fn recent_activity(State(state): State<AppState>) -> ApiResult<Json<Vec<RecentActivityItem>>> {
    Ok(Json(state.analytics.recent_activity().await?))
}
