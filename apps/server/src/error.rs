use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use payflow_events::EventBusError;
use serde_json::json;
use std::borrow::Cow;
use tracing::{error, warn};

/// Failures surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Event bus error{}: {source}", format_context(.context))]
    Events {
        #[source]
        source: EventBusError,
        context: Option<Cow<'static, str>>,
    },
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Events { source, .. } if source.is_transport() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Events { source: EventBusError::Closed { .. }, .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            Self::Events { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub(crate) trait ApiErrorExt<T> {
    fn context(self, context: &'static str) -> Result<T, ApiError>;
}

impl<T> ApiErrorExt<T> for Result<T, EventBusError> {
    fn context(self, context: &'static str) -> Result<T, ApiError> {
        self.map_err(|source| ApiError::Events { source, context: Some(context.into()) })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
