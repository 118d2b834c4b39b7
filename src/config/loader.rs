//! Configuration loading from disk and the environment.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{AdditionalHeaders, ProxyConfig, TlsConfig, UpstreamMode};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Environment variable {name}: {message}")]
    Env { name: &'static str, message: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults, then the optional file, then the process environment, then
/// validation.
pub fn load_layered(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    load_layered_with(path, |name| std::env::var(name).ok())
}

/// Same as [`load_layered`], reading the environment through `lookup`.
pub fn load_layered_with<F>(path: Option<&Path>, lookup: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => ProxyConfig::default(),
    };
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply the recognized environment variables, read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(base) = get("BASE_HOST") {
        config.base_host = base;
    }

    if let Some(port) = get("LISTEN_PORT") {
        let port: u16 = port.parse().map_err(|_| ConfigError::Env {
            name: "LISTEN_PORT",
            message: format!("`{port}` is not a port number"),
        })?;
        if config.listeners.is_empty() {
            config.listeners.push(Default::default());
        }
        let listener = &mut config.listeners[0];
        listener.bind_address = match listener.bind_address.parse::<SocketAddr>() {
            Ok(mut addr) => {
                addr.set_port(port);
                addr.to_string()
            }
            Err(_) => format!("0.0.0.0:{port}"),
        };
    }

    if let Some(secs) = get("CONN_TIMEOUT_SECONDS") {
        let secs: f64 = secs.parse().map_err(|_| ConfigError::Env {
            name: "CONN_TIMEOUT_SECONDS",
            message: format!("`{secs}` is not a number"),
        })?;
        config.timeouts.inbound_idle_secs = Some(secs);
        config.timeouts.outbound_idle_secs = Some(secs);
    }

    if let Some(worker) = get("WORKER_HOST") {
        config.upstream.mode = UpstreamMode::Worker;
        config.upstream.worker_host = Some(worker);
    }

    for (name, target) in [
        ("REQUEST_ADDITIONAL_HEADERS", &mut config.headers.request),
        ("RESPONSE_ADDITIONAL_HEADERS", &mut config.headers.response),
    ] {
        if let Some(json) = get(name) {
            *target = AdditionalHeaders::from_json(&json).map_err(|e| ConfigError::Env {
                name,
                message: e.to_string(),
            })?;
        }
    }

    if let Some(profile) = get("CODEC_PROFILE") {
        config.codec.profile = profile.parse().map_err(|message| ConfigError::Env {
            name: "CODEC_PROFILE",
            message,
        })?;
    }

    match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
        (Some(cert_path), Some(key_path)) => {
            if config.listeners.is_empty() {
                config.listeners.push(Default::default());
            }
            config.listeners[0].tls = Some(TlsConfig { cert_path, key_path });
        }
        (None, None) => {}
        _ => {
            return Err(ConfigError::Env {
                name: "TLS_CERT_PATH",
                message: "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
            })
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::codec::CodecProfile;
    use crate::config::schema::HeaderDirective;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = ProxyConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("BASE_HOST", "cloak.example.net"),
                ("LISTEN_PORT", "9000"),
                ("CONN_TIMEOUT_SECONDS", "2.5"),
                ("WORKER_HOST", "relay.example.dev"),
                ("RESPONSE_ADDITIONAL_HEADERS", r#"{"x-frame-options": null, "x-by": "cloak"}"#),
                ("CODEC_PROFILE", "hex"),
            ]),
        )
        .unwrap();

        assert_eq!(config.base_host, "cloak.example.net");
        assert_eq!(config.listeners[0].bind_address, "0.0.0.0:9000");
        assert_eq!(config.timeouts.inbound_idle_secs, Some(2.5));
        assert_eq!(config.timeouts.outbound_idle_secs, Some(2.5));
        assert_eq!(config.upstream.mode, UpstreamMode::Worker);
        assert_eq!(config.codec.profile, CodecProfile::Hex);
        assert_eq!(
            config.headers.response.0.get("x-frame-options"),
            Some(&HeaderDirective::Remove)
        );
    }

    #[test]
    fn malformed_environment_is_reported() {
        let mut config = ProxyConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("LISTEN_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "LISTEN_PORT", .. }));

        let err = apply_env_overrides(&mut config, env(&[("TLS_KEY_PATH", "key.pem")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn missing_base_host_fails_validation() {
        let err = load_layered_with(None, env(&[])).unwrap_err();
        let ConfigError::Validation(errors) = err else {
            panic!("expected validation failure, got {err}");
        };
        assert_eq!(errors[0].field, "base_host");
        assert_eq!(errors[0].message, "base domain is empty");

        let config = load_layered_with(None, env(&[("BASE_HOST", "cloak.example.com")])).unwrap();
        assert_eq!(config.base_host, "cloak.example.com");
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("origin-cloak-good-{}.toml", std::process::id()));
        fs::File::create(&good)
            .and_then(|mut f| writeln!(f, r#"base_host = "cloak.example.com""#))
            .unwrap();
        let config = load_config(&good).unwrap();
        assert_eq!(config.base_host, "cloak.example.com");

        let bad = dir.join(format!("origin-cloak-bad-{}.toml", std::process::id()));
        fs::File::create(&bad)
            .and_then(|mut f| writeln!(f, r#"base_host = "nodots""#))
            .unwrap();
        assert!(matches!(load_config(&bad), Err(ConfigError::Validation(_))));

        let _ = fs::remove_file(good);
        let _ = fs::remove_file(bad);
    }
}
