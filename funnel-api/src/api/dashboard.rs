//! Dashboard CRUD endpoints
//!
//! Lists come from the dashboard's query cache; every successful mutation
//! is announced on `/api/events` as `QueryInvalidated`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use funnel_common::dashboard::DEFAULT_CONVERSION_RANGE;
use funnel_common::db::{
    Conversion, ConversionInsert, ConversionPatch, DmCampaign, DmCampaignInsert, DmCampaignPatch,
    PostStatus, RedgifsAsset, RedgifsAssetInsert, RedgifsAssetPatch, ScheduledPost,
    ScheduledPostInsert, ScheduledPostPatch,
};
use serde::Deserialize;

use super::RangeQuery;
use crate::error::{ApiJson, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: PostStatus,
    #[serde(default)]
    pub posted_url: Option<String>,
}

// ========================================
// Scheduled posts
// ========================================

pub async fn list_scheduled_posts(State(state): State<AppState>) -> ApiResult<Json<Vec<ScheduledPost>>> {
    Ok(Json(state.dashboard.scheduled_posts().await?))
}

pub async fn create_scheduled_post(
    State(state): State<AppState>,
    ApiJson(post): ApiJson<ScheduledPostInsert>,
) -> ApiResult<(StatusCode, Json<ScheduledPost>)> {
    let stored = state.dashboard.add_scheduled_post(post).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_scheduled_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<ScheduledPostPatch>,
) -> ApiResult<Json<ScheduledPost>> {
    Ok(Json(state.dashboard.update_scheduled_post(id, patch).await?))
}

/// PUT /api/scheduled-posts/:id/status
pub async fn set_scheduled_post_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(request): ApiJson<StatusRequest>,
) -> ApiResult<Json<ScheduledPost>> {
    let stored = state
        .dashboard
        .set_post_status(id, request.status, request.posted_url)
        .await?;
    Ok(Json(stored))
}

pub async fn delete_scheduled_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.dashboard.delete_scheduled_post(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ========================================
// RedGifs gallery
// ========================================

pub async fn list_redgifs(State(state): State<AppState>) -> ApiResult<Json<Vec<RedgifsAsset>>> {
    Ok(Json(state.dashboard.redgifs_assets().await?))
}

pub async fn create_redgifs(
    State(state): State<AppState>,
    ApiJson(asset): ApiJson<RedgifsAssetInsert>,
) -> ApiResult<(StatusCode, Json<RedgifsAsset>)> {
    let stored = state.dashboard.add_redgifs_asset(asset).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_redgifs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<RedgifsAssetPatch>,
) -> ApiResult<Json<RedgifsAsset>> {
    Ok(Json(state.dashboard.update_redgifs_asset(id, patch).await?))
}

pub async fn delete_redgifs(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.dashboard.delete_redgifs_asset(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ========================================
// DM campaigns
// ========================================

pub async fn list_dm_campaigns(State(state): State<AppState>) -> ApiResult<Json<Vec<DmCampaign>>> {
    Ok(Json(state.dashboard.dm_campaigns().await?))
}

pub async fn create_dm_campaign(
    State(state): State<AppState>,
    ApiJson(campaign): ApiJson<DmCampaignInsert>,
) -> ApiResult<(StatusCode, Json<DmCampaign>)> {
    let stored = state.dashboard.add_dm_campaign(campaign).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_dm_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<DmCampaignPatch>,
) -> ApiResult<Json<DmCampaign>> {
    Ok(Json(state.dashboard.update_dm_campaign(id, patch).await?))
}

pub async fn delete_dm_campaign(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.dashboard.delete_dm_campaign(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ========================================
// Conversion batches
// ========================================

/// GET /api/conversions?range= (default 30d)
pub async fn list_conversions(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Conversion>>> {
    let range = query.resolve(DEFAULT_CONVERSION_RANGE);
    Ok(Json(state.dashboard.conversions(range).await?))
}

pub async fn create_conversion(
    State(state): State<AppState>,
    ApiJson(batch): ApiJson<ConversionInsert>,
) -> ApiResult<(StatusCode, Json<Conversion>)> {
    let stored = state.dashboard.add_conversion(batch).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_conversion(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(patch): ApiJson<ConversionPatch>,
) -> ApiResult<Json<Conversion>> {
    Ok(Json(state.dashboard.update_conversion(id, patch).await?))
}

pub async fn delete_conversion(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.dashboard.delete_conversion(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
