//! Error types and their HTTP renderings.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Body sent when the admin backend cannot be reached.
pub const UPSTREAM_STARTING_MESSAGE: &str =
    "The admin service is starting up. Please retry in a few seconds.";

/// Startup configuration failures. All of these are fatal before bind.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("external origin is not set (use --external-origin, EXTERNAL_ORIGIN or APP_URL)")]
    MissingExternalOrigin,

    #[error("invalid external origin {value:?}: {reason}")]
    InvalidExternalOrigin { value: String, reason: String },

    #[error("invalid upstream address {value:?}: expected host:port")]
    InvalidUpstream { value: String },

    #[error("invalid port {value:?}")]
    InvalidPort { value: String },

    #[error("invalid MIME override {value:?}: expected .ext=type")]
    InvalidMimeOverride { value: String },

    #[error("failed to build upstream HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failures while serving a file from the asset root.
#[derive(Debug, Error)]
pub enum StaticError {
    #[error("Server Error: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path contains a parent or root segment")]
    Traversal,

    #[error("path resolves outside the asset root")]
    OutsideRoot,
}

impl StaticError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Read { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Traversal => StatusCode::BAD_REQUEST,
            Self::OutsideRoot => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for StaticError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Read { .. } => self.to_string(),
            Self::Traversal => "Bad Request".to_string(),
            Self::OutsideRoot => "Not Found".to_string(),
        };
        (self.status(), body).into_response()
    }
}

/// Failures reaching the admin backend.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {upstream} unavailable: {source}")]
    Unavailable {
        upstream: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {upstream} sent no response within {timeout:?}")]
    Timeout { upstream: String, timeout: Duration },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), UPSTREAM_STARTING_MESSAGE).into_response()
    }
}
