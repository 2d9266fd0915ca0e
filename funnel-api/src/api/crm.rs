//! Email CRM proxy endpoints

use axum::{extract::State, Json};
use funnel_common::crm::ContactStatus;
use serde::{Deserialize, Serialize};

use crate::error::{ApiJson, ApiResult};
use crate::AppState;

fn default_source() -> String {
    "brand_bridge".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub status: ContactStatus,
}

#[derive(Debug, Serialize)]
pub struct CrmResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// POST /api/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SubscribeRequest>,
) -> ApiResult<Json<CrmResponse>> {
    let outcome = state.crm.subscribe(&request.email, &request.source).await?;
    Ok(Json(CrmResponse {
        status: "success",
        message: outcome.message(),
    }))
}

/// POST /api/update-status
pub async fn update_status(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpdateStatusRequest>,
) -> ApiResult<Json<CrmResponse>> {
    state.crm.update_status(&request.email, request.status).await?;
    Ok(Json(CrmResponse {
        status: "success",
        message: "Contact status updated",
    }))
}
