// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure kinds surfaced by a contribution query.
///
/// `Clone` because a single coalesced computation hands the same outcome to
/// every caller waiting on that address.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContributionError {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("ledger node unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("malformed transfer record: {0}")]
    MalformedRecord(String),
}

impl ContributionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ContributionError::InvalidAddress(_) => "invalid_address",
            ContributionError::UpstreamUnavailable(_) => "upstream_unavailable",
            ContributionError::MalformedRecord(_) => "malformed_record",
        }
    }
}

impl From<reqwest::Error> for ContributionError {
    fn from(e: reqwest::Error) -> Self {
        ContributionError::UpstreamUnavailable(e.to_string())
    }
}

impl IntoResponse for ContributionError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            message: String,
        }

        let status = match self {
            ContributionError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            ContributionError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ContributionError::MalformedRecord(_) => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!(%self, "contribution query failed");
        (
            status,
            Json(ErrorResponse {
                error: self.kind(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
