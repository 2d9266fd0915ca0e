//! Error types for funnel-api
//!
//! Every handler error renders as `{"error": {"code", "message"}}` with a
//! status derived from the underlying failure.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use funnel_common::crm::CrmError;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Required service setting is missing (500)
    #[error("Server configuration error: {0}")]
    Misconfigured(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// funnel-common error
    #[error(transparent)]
    Common(#[from] funnel_common::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<CrmError> for ApiError {
    fn from(err: CrmError) -> Self {
        ApiError::Common(err.into())
    }
}

fn crm_status(err: &CrmError) -> (StatusCode, &'static str) {
    match err {
        CrmError::MissingEmail | CrmError::InvalidEmail | CrmError::Rejected(_) => {
            (StatusCode::BAD_REQUEST, "CRM_REJECTED")
        }
        CrmError::NotConfigured => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        CrmError::Unavailable { .. } | CrmError::Transport(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "CRM_UNAVAILABLE")
        }
        CrmError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "CRM_TIMEOUT"),
    }
}

impl ApiError {
    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        use funnel_common::Error as E;

        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Misconfigured(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Common(err) => match err {
                E::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                E::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                E::Backend { .. } | E::Http(_) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR"),
                E::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
                E::Crm(crm) => crm_status(crm),
                E::Json(_) | E::Io(_) | E::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Misconfigured(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Common(funnel_common::Error::Crm(crm)) => crm.to_string(),
            ApiError::Common(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", self);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.message(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor whose rejections use the error envelope
///
/// A malformed body, wrong content type or missing field answers 400
/// `BAD_REQUEST` instead of axum's plain-text rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_to_statuses() {
        let cases = [
            (funnel_common::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (funnel_common::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                funnel_common::Error::Backend { status: 503, message: "x".into() },
                StatusCode::BAD_GATEWAY,
            ),
            (funnel_common::Error::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_and_code().0, status);
        }
    }

    #[test]
    fn test_crm_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(CrmError::Timeout).status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(CrmError::Unavailable { status: 502 }).status_and_code().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(CrmError::Rejected("nope".into())).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_crm_message_is_unprefixed() {
        let err = ApiError::from(CrmError::Rejected("email is not valid".into()));
        assert_eq!(err.message(), "email is not valid");
    }
}
