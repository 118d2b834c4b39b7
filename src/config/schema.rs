//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecProfile;
use crate::rewrite::pattern::DEFAULT_CACHE_SIZE;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Public domain every origin host is encoded under. No default: it must
    /// come from the file or `BASE_HOST`.
    pub base_host: String,

    /// Listeners (bind address, optional TLS).
    pub listeners: Vec<ListenerConfig>,

    /// Hostname codec selection.
    pub codec: CodecConfig,

    /// Where outbound requests are sent.
    pub upstream: UpstreamConfig,

    /// Idle timeouts for both legs.
    pub timeouts: TimeoutConfig,

    /// Which parts of the traffic are rewritten.
    pub rewrite: RewriteConfig,

    /// Static header overrides.
    pub headers: HeadersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_host: String::new(),
            listeners: vec![ListenerConfig::default()],
            codec: CodecConfig::default(),
            upstream: UpstreamConfig::default(),
            timeouts: TimeoutConfig::default(),
            rewrite: RewriteConfig::default(),
            headers: HeadersConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CodecConfig {
    pub profile: CodecProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamMode {
    /// Connect to the origin (or its forward proxy) directly.
    #[default]
    Direct,
    /// Hand every request to a relay worker as `?proxyUrl=`.
    Worker,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub mode: UpstreamMode,

    /// Relay worker host, used when no `CF-Worker` header is present.
    pub worker_host: Option<String>,

    /// Origin port for plain requests.
    pub http_port: u16,

    /// Origin port for secure requests.
    pub https_port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            mode: UpstreamMode::Direct,
            worker_host: None,
            http_port: 80,
            https_port: 443,
        }
    }
}

/// Per-leg idle timeouts in seconds. `None` disables the timer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub inbound_idle_secs: Option<f64>,
    pub outbound_idle_secs: Option<f64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            inbound_idle_secs: None,
            outbound_idle_secs: Some(1.0),
        }
    }
}

impl TimeoutConfig {
    pub fn inbound_idle(&self) -> Option<Duration> {
        self.inbound_idle_secs.and_then(secs_to_duration)
    }

    pub fn outbound_idle(&self) -> Option<Duration> {
        self.outbound_idle_secs.and_then(secs_to_duration)
    }
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok().filter(|d| !d.is_zero())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Rewrite origin hosts in textual response bodies.
    pub response_body: bool,

    /// Decode public hosts in textual request bodies.
    pub request_body: bool,

    /// Maximum number of compiled origin patterns kept.
    pub pattern_cache_size: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            response_body: true,
            request_body: false,
            pattern_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Applied to the outbound request after decoding.
    pub request: AdditionalHeaders,

    /// Applied to the client response after post-processing.
    pub response: AdditionalHeaders,
}

/// What to do with one configured header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Option<RawDirective>", into = "Option<String>")]
pub enum HeaderDirective {
    Set(String),
    Remove,
}

/// Accepted spellings: a string sets the header; `null`, `false`, `""`
/// and `0` remove it. Other scalars are set as their text form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawDirective {
    Text(String),
    Flag(bool),
    Integer(i64),
    Float(f64),
}

impl From<Option<RawDirective>> for HeaderDirective {
    fn from(raw: Option<RawDirective>) -> Self {
        match raw {
            None | Some(RawDirective::Flag(false)) | Some(RawDirective::Integer(0)) => {
                HeaderDirective::Remove
            }
            Some(RawDirective::Text(text)) if text.is_empty() => HeaderDirective::Remove,
            Some(RawDirective::Text(text)) => HeaderDirective::Set(text),
            Some(RawDirective::Flag(true)) => HeaderDirective::Set("true".to_string()),
            Some(RawDirective::Integer(n)) => HeaderDirective::Set(n.to_string()),
            Some(RawDirective::Float(f)) if f == 0.0 => HeaderDirective::Remove,
            Some(RawDirective::Float(f)) => HeaderDirective::Set(f.to_string()),
        }
    }
}

impl From<HeaderDirective> for Option<String> {
    fn from(directive: HeaderDirective) -> Self {
        match directive {
            HeaderDirective::Set(value) => Some(value),
            HeaderDirective::Remove => None,
        }
    }
}

/// Header name to directive, applied in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AdditionalHeaders(pub BTreeMap<String, HeaderDirective>);

impl AdditionalHeaders {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderDirective)> {
        self.0.iter().map(|(name, directive)| (name.as_str(), directive))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_defaults() {
        let config: ProxyConfig = toml::from_str(r#"base_host = "cloak.example""#).unwrap();
        assert_eq!(config.base_host, "cloak.example");
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.codec.profile, CodecProfile::Dashed);
        assert_eq!(config.timeouts.outbound_idle(), Some(Duration::from_secs(1)));
        assert_eq!(config.timeouts.inbound_idle(), None);
        assert!(config.rewrite.response_body);
    }

    #[test]
    fn header_directives_accept_removal_spellings() {
        let headers = AdditionalHeaders::from_json(
            r#"{"x-set": "yes", "x-null": null, "x-false": false, "x-empty": "", "x-zero": 0, "x-num": 7}"#,
        )
        .unwrap();
        let get = |name: &str| headers.0.get(name).cloned();
        assert_eq!(get("x-set"), Some(HeaderDirective::Set("yes".into())));
        assert_eq!(get("x-null"), Some(HeaderDirective::Remove));
        assert_eq!(get("x-false"), Some(HeaderDirective::Remove));
        assert_eq!(get("x-empty"), Some(HeaderDirective::Remove));
        assert_eq!(get("x-zero"), Some(HeaderDirective::Remove));
        assert_eq!(get("x-num"), Some(HeaderDirective::Set("7".into())));
    }

    #[test]
    fn full_file_parses() {
        let config: ProxyConfig = toml::from_str(
            r#"
            base_host = "cloak.example"

            [[listeners]]
            bind_address = "127.0.0.1:8443"
            tls = { cert_path = "cert.pem", key_path = "key.pem" }

            [codec]
            profile = "hex"

            [upstream]
            mode = "worker"
            worker_host = "relay.workers.dev"

            [timeouts]
            inbound_idle_secs = 30
            outbound_idle_secs = 2.5

            [headers.response]
            "x-frame-options" = false
            "x-served-by" = "cloak"
            "#,
        )
        .unwrap();
        assert_eq!(config.codec.profile, CodecProfile::Hex);
        assert_eq!(config.upstream.mode, UpstreamMode::Worker);
        assert!(config.listeners[0].tls.is_some());
        assert_eq!(config.timeouts.inbound_idle(), Some(Duration::from_secs(30)));
        assert_eq!(config.timeouts.outbound_idle(), Some(Duration::from_millis(2500)));
        assert_eq!(
            config.headers.response.0.get("x-frame-options"),
            Some(&HeaderDirective::Remove)
        );
    }
}
