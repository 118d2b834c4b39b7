//! Response assembly for the client.
//!
//! # Responsibilities
//! - Decide whether an origin body can be rewritten as text
//! - Map session errors to a status when no head was sent yet
//!
//! # Design Decisions
//! - Compressed bodies pass through untouched; the proxy never inflates
//! - Error responses close the client connection

use axum::{
    body::Body,
    http::{header, HeaderValue, Response},
    response::IntoResponse,
};

use crate::error::ProxyError;
use crate::rewrite::HeaderSet;

const TEXTUAL_SUBTYPES: &[&str] = &["json", "javascript", "ecmascript", "xml", "html", "css", "x-www-form-urlencoded"];

/// Textual content type with no content coding.
pub fn is_rewritable(headers: &HeaderSet) -> bool {
    let identity = headers
        .first_text("content-encoding")
        .map(|coding| coding.trim().is_empty() || coding.trim().eq_ignore_ascii_case("identity"))
        .unwrap_or(true);
    identity && headers.first_text("content-type").is_some_and(is_textual)
}

pub fn is_textual(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    kind == "text" || TEXTUAL_SUBTYPES.iter().any(|t| subtype.contains(t))
}

/// Status, canonical reason as body, `Connection: close`.
pub fn error_response(err: &ProxyError) -> Response<Body> {
    let status = err.status_code();
    let mut response = (status, status.canonical_reason().unwrap_or("Error")).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
