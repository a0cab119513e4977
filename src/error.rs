use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

// Failure talking to the token store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected store reply: {0}")]
    Reply(String),

    #[error("window of {0} seconds is out of range")]
    Window(u64),
}

impl StoreError {
    // Label used in logs and metrics, clients never see it
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Redis(_) => "redis",
            StoreError::Timeout(_) => "timeout",
            StoreError::Reply(_) => "reply",
            StoreError::Window(_) => "window",
        }
    }
}

/// Every way a request can be turned away by the gate.
///
/// Each variant is terminal for the request. The status code is fixed per
/// variant; the message goes to the client as plain text.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid path, are you using the right middleware? path={path}")]
    MalformedRequest { path: String },

    #[error("token table {table:?} does not exist")]
    UnknownTable { table: String },

    #[error("token is not a member of table {table:?}")]
    InvalidToken { table: String },

    #[error("request limit exceeded: {count} requests in window, limit is {limit}")]
    RateLimited { count: u64, limit: u64 },

    #[error("token store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// Outcome of running one request through the gate. `Ok(())` means the
/// request may be forwarded.
pub type Decision = Result<(), GateError>;

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::MalformedRequest { .. } => StatusCode::FORBIDDEN,
            GateError::UnknownTable { .. } => StatusCode::NOT_FOUND,
            GateError::InvalidToken { .. } => StatusCode::UNAUTHORIZED,
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Outcome label for the decisions counter
    pub fn outcome(&self) -> &'static str {
        match self {
            GateError::MalformedRequest { .. } => "malformed_request",
            GateError::UnknownTable { .. } => "unknown_table",
            GateError::InvalidToken { .. } => "invalid_token",
            GateError::RateLimited { .. } => "rate_limited",
            GateError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status(), format!("{}\n", self)).into_response()
    }
}

// Failures of the forwarding handler behind the gate
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no healthy upstream available")]
    NoHealthyUpstream,

    #[error("request body too large or unreadable: {0}")]
    Body(String),

    #[error("upstream {url} failed: {source}")]
    Upstream {
        url: String,
        source: reqwest::Error,
    },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match self {
            ProxyError::NoHealthyUpstream => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Body(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        };
        (status, format!("{}\n", self)).into_response()
    }
}
