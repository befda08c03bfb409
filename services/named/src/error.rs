//! Classified errors
//!
//! Every collaborator (Fasit, OpenAM, the policy repository, SSH) reports
//! failures as a [`ProvisionError`]. Callers match on [`ErrorKind`] rather
//! than inspecting message strings, and the HTTP layer uses the carried status
//! code directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use thiserror::Error;

/// Boxed lower-level error kept for logging
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid request field, zone mismatch, invalid policy file
    Validation,
    /// Environment, application or registry resource absent
    NotFound,
    /// Non-2xx from a remote system, transport failure, script failure
    Upstream,
    /// Credentials rejected while resolving a secret
    Unauthorized,
}

impl ErrorKind {
    /// Status code used when none is given explicitly
    pub fn default_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Upstream => 502,
            ErrorKind::Unauthorized => 401,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Upstream => write!(f, "upstream"),
            ErrorKind::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

/// A failure with a kind, a human-readable message and an HTTP-style status
#[derive(Debug, Error)]
#[error("{}", render(.message, .cause, .status_code))]
pub struct ProvisionError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: u16,
    /// URL of the remote endpoint that failed, when known
    pub endpoint: Option<String>,
    #[source]
    pub cause: Option<Cause>,
}

fn render(message: &str, cause: &Option<Cause>, status_code: &u16) -> String {
    match cause {
        Some(cause) => format!("{}: {} ({})", message, cause, status_code),
        None => format!("{} ({})", message, status_code),
    }
}

impl ProvisionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: kind.default_status(),
            endpoint: None,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Override the default status code of the kind
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Wrap this error in an outer message, keeping kind, status and endpoint
    pub fn context(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            message: message.into(),
            status_code: self.status_code,
            endpoint: self.endpoint.clone(),
            cause: Some(Box::new(self)),
        }
    }
}

impl IntoResponse for ProvisionError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, format!("{}\n", self)).into_response()
    }
}

/// Result alias used throughout the crate
pub type ProvisionResult<T> = Result<T, ProvisionError>;
