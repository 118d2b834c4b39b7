//! Session error kinds.
//!
//! Every variant here is fatal for the session that raised it and nothing
//! else. Non-fatal conditions (codec mismatches, pattern cache misses) never
//! reach this type; they degrade to identity or to a transparent rebuild.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::rewrite::PatternError;

/// Boxed error carried by socket-level failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that terminate a single client↔origin session.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A header value nests deeper than the traversal allows.
    #[error("header `{name}` nests deeper than {limit} levels")]
    HeaderDepthExceeded { name: String, limit: usize },

    /// No usable origin host could be derived from the request.
    #[error("no usable target host: {0}")]
    TargetUnresolved(String),

    #[error("inbound leg idle for longer than {0:?}")]
    InboundTimeout(Duration),

    #[error("outbound leg idle for longer than {0:?}")]
    OutboundTimeout(Duration),

    /// The client side failed. `None` means the client simply went away.
    #[error("inbound socket error")]
    InboundSocketError(#[source] Option<BoxError>),

    /// Connecting to or exchanging headers with the origin failed.
    #[error("outbound socket error")]
    OutboundSocketError(#[source] Option<BoxError>),

    /// The origin's response body failed mid-stream.
    #[error("outbound stream error")]
    OutboundStreamError(#[source] Option<BoxError>),

    /// The other leg already tore the session down.
    #[error("session already aborted")]
    SessionAborted,

    #[error("failed to compile host pattern: {0}")]
    Pattern(#[from] PatternError),
}

impl ProxyError {
    /// Short, stable label used for metrics and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::HeaderDepthExceeded { .. } => "header_depth_exceeded",
            ProxyError::TargetUnresolved(_) => "target_unresolved",
            ProxyError::InboundTimeout(_) => "inbound_timeout",
            ProxyError::OutboundTimeout(_) => "outbound_timeout",
            ProxyError::InboundSocketError(_) => "inbound_socket_error",
            ProxyError::OutboundSocketError(_) => "outbound_socket_error",
            ProxyError::OutboundStreamError(_) => "outbound_stream_error",
            ProxyError::SessionAborted => "session_aborted",
            ProxyError::Pattern(_) => "pattern",
        }
    }

    /// The underlying error object, when the trigger was a genuine error
    /// rather than a timeout or a plain hang-up.
    pub fn detail(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            ProxyError::InboundSocketError(source)
            | ProxyError::OutboundSocketError(source)
            | ProxyError::OutboundStreamError(source) => source.as_deref(),
            ProxyError::Pattern(e) => Some(e),
            _ => None,
        }
    }

    /// Status returned to the client when the failure happens before the
    /// response head has been written.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::HeaderDepthExceeded { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ProxyError::TargetUnresolved(_) => StatusCode::BAD_REQUEST,
            ProxyError::InboundTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ProxyError::OutboundTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Pattern(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}
