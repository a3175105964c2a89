//! Rejections returned by the delivery endpoint.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hookrelay_protocol::ErrorReply;
use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0} header is not set")]
    MissingHeader(&'static str),

    #[error("{0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl HubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingHeader(_) | Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        warn!("Rejected delivery: {}", self);

        let body = ErrorReply {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
