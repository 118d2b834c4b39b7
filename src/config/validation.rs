//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that configured headers are representable on the wire
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::path::Path;

use axum::http::{HeaderName, HeaderValue};
use serde::Serialize;
use thiserror::Error;

use crate::codec::BaseDomain;
use crate::config::schema::{AdditionalHeaders, HeaderDirective, ProxyConfig, UpstreamMode};

/// One semantic problem, with the config path it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = BaseDomain::parse(&config.base_host) {
        errors.push(ValidationError::new("base_host", e.to_string()));
    }

    if config.listeners.is_empty() {
        errors.push(ValidationError::new("listeners", "at least one listener is required"));
    }
    for (i, listener) in config.listeners.iter().enumerate() {
        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                format!("listeners[{i}].bind_address"),
                format!("`{}` is not a socket address", listener.bind_address),
            ));
        }
        if let Some(tls) = &listener.tls {
            for (field, path) in [("cert_path", &tls.cert_path), ("key_path", &tls.key_path)] {
                if !Path::new(path).is_file() {
                    errors.push(ValidationError::new(
                        format!("listeners[{i}].tls.{field}"),
                        format!("`{path}` does not exist"),
                    ));
                }
            }
        }
    }

    for (field, secs) in [
        ("timeouts.inbound_idle_secs", config.timeouts.inbound_idle_secs),
        ("timeouts.outbound_idle_secs", config.timeouts.outbound_idle_secs),
    ] {
        if let Some(secs) = secs {
            if !secs.is_finite() || secs <= 0.0 {
                errors.push(ValidationError::new(field, "must be a positive number of seconds"));
            }
        }
    }

    if config.upstream.mode == UpstreamMode::Worker {
        match config.upstream.worker_host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => {}
            _ => errors.push(ValidationError::new(
                "upstream.worker_host",
                "worker mode requires a worker host",
            )),
        }
    }
    for (field, port) in [
        ("upstream.http_port", config.upstream.http_port),
        ("upstream.https_port", config.upstream.https_port),
    ] {
        if port == 0 {
            errors.push(ValidationError::new(field, "port must be non-zero"));
        }
    }

    if config.rewrite.pattern_cache_size == 0 {
        errors.push(ValidationError::new(
            "rewrite.pattern_cache_size",
            "must be greater than zero",
        ));
    }

    validate_headers("headers.request", &config.headers.request, &mut errors);
    validate_headers("headers.response", &config.headers.response, &mut errors);

    if let Err(e) = config.observability.metrics_address.parse::<SocketAddr>() {
        if config.observability.metrics_enabled {
            errors.push(ValidationError::new("observability.metrics_address", e.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_headers(section: &str, headers: &AdditionalHeaders, errors: &mut Vec<ValidationError>) {
    for (name, directive) in headers.iter() {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("{section}.{name}"),
                "invalid header name",
            ));
        }
        if let HeaderDirective::Set(value) = directive {
            if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::new(
                    format!("{section}.{name}"),
                    "invalid header value",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::schema::TlsConfig;

    #[test]
    fn default_config_is_valid() {
        let mut config = ProxyConfig::default();
        config.base_host = "cloak.example.com".to_string();
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ProxyConfig::default();
        config.base_host = "localhost".to_string();
        config.listeners[0].bind_address = "nowhere".to_string();
        config.listeners[0].tls = Some(TlsConfig {
            cert_path: "/definitely/missing/cert.pem".to_string(),
            key_path: "/definitely/missing/key.pem".to_string(),
        });
        config.timeouts.outbound_idle_secs = Some(0.0);
        config.upstream.mode = UpstreamMode::Worker;
        config.rewrite.pattern_cache_size = 0;
        config
            .headers
            .response
            .0
            .insert("bad header".to_string(), HeaderDirective::Set("x".to_string()));

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "base_host",
                "listeners[0].bind_address",
                "listeners[0].tls.cert_path",
                "listeners[0].tls.key_path",
                "timeouts.outbound_idle_secs",
                "upstream.worker_host",
                "rewrite.pattern_cache_size",
                "headers.response.bad header",
            ]
        );
    }

    #[test]
    fn header_values_must_be_wire_safe() {
        let mut config = ProxyConfig::default();
        config.base_host = "cloak.example.com".to_string();
        config
            .headers
            .request
            .0
            .insert("x-line".to_string(), HeaderDirective::Set("a\nb".to_string()));
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].message, "invalid header value");
    }
}
