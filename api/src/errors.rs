use crate::metrics_defs::API_ERRORS;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use gateway::GatewayError;
use serde::Serialize;
use shared::counter;
use std::time::Duration;
use vault::VaultError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing or malformed bearer token")]
    Unauthorized,

    #[error("invalid GitHub personal access token")]
    InvalidToken,

    #[error("user {0} is not registered")]
    UserNotFound(String),

    #[error("Too many requests from this IP, please try again later.")]
    TooManyRequests { retry_after: Duration },

    #[error(transparent)]
    Upstream(#[from] GatewayError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
    #[serde(rename = "resetAt", skip_serializing_if = "Option::is_none")]
    reset_at: Option<DateTime<Utc>>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::UserNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(e) => upstream_status(e),
            ApiError::Vault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn upstream_status(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::NonTransient { status, .. }
            if matches!(
                *status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ) =>
        {
            *status
        }
        GatewayError::Transient { status: None, .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::NonTransient { .. }
        | GatewayError::Transient { .. }
        | GatewayError::Decode(_) => StatusCode::BAD_GATEWAY,
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        counter!(API_ERRORS, "status" => status.as_str().to_string()).increment(1);

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let reset_at = match &self {
            ApiError::Upstream(GatewayError::RateLimited { reset_at }) => *reset_at,
            _ => None,
        };
        let retry_after_secs = match &self {
            ApiError::Upstream(GatewayError::RateLimited {
                reset_at: Some(reset_at),
            }) => Some((*reset_at - Utc::now()).num_seconds().max(0)),
            ApiError::Upstream(GatewayError::UpstreamUnavailable { retry_after, .. })
            | ApiError::TooManyRequests { retry_after } => Some(whole_seconds(*retry_after)),
            _ => None,
        };
        // Crypto failure details stay in the logs
        let message = match &self {
            ApiError::Vault(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let mut response = (
            status,
            Json(ApiErrorResponse {
                error: message,
                reset_at,
            }),
        )
            .into_response();

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

// Rounded up to whole seconds
fn whole_seconds(duration: Duration) -> i64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}
