//! Hostname codec subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound (client → origin):
//!     "61pi--githu62--63om.example.com"
//!     → label matcher anchored on the base domain
//!     → HostnameCodec::decode
//!     → "api.github.com"
//!
//! Outbound (origin → client):
//!     "api.github.com"
//!     → origin pattern from the PatternCache
//!     → HostnameCodec::encode + ".<base>"
//!     → "61pi--githu62--63om.example.com"
//! ```
//!
//! # Design Decisions
//! - One profile per deployment; profiles are not interoperable
//! - Malformed labels are left untouched rather than rejected
//! - Text-level rewriting is expressed as a [`Substitution`] so headers and
//!   streamed bodies share one matcher

pub mod dashed;
pub mod domain;
pub mod hex;

use std::borrow::Cow;
use std::sync::Arc;

use regex::bytes::Captures;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dashed::DashedCodec;
pub use domain::{BaseDomain, DomainError};
pub use hex::HexCodec;

use crate::rewrite::pattern::CompiledPattern;
use crate::rewrite::substitution::{PatternError, Substitution};

/// A label that is not a valid encoding. Never fatal: callers keep the
/// original text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` is not a valid encoded label")]
pub struct CodecMismatch(pub String);

/// Encoding scheme selected for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecProfile {
    /// Whole fragment hex-escaped into one token.
    Hex,
    /// Segments hex-escaped and joined with `--`.
    #[default]
    Dashed,
}

impl CodecProfile {
    pub fn codec(self) -> Arc<dyn HostnameCodec> {
        match self {
            CodecProfile::Hex => Arc::new(HexCodec),
            CodecProfile::Dashed => Arc::new(DashedCodec),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodecProfile::Hex => "hex",
            CodecProfile::Dashed => "dashed",
        }
    }
}

impl std::str::FromStr for CodecProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hex" => Ok(CodecProfile::Hex),
            "dashed" => Ok(CodecProfile::Dashed),
            other => Err(format!("unknown codec profile `{other}`")),
        }
    }
}

/// Bidirectional transform between a hostname fragment and a label.
pub trait HostnameCodec: Send + Sync + std::fmt::Debug {
    fn profile(&self) -> CodecProfile;

    /// Encode a fragment. Total over every string.
    fn encode(&self, fragment: &str) -> String;

    /// Inverse of [`HostnameCodec::encode`] for printable ASCII fragments.
    fn decode(&self, label: &str) -> Result<String, CodecMismatch>;

    /// Regex source capturing the label (group 1) and the dot that joins it
    /// to the base domain. Repetition must be bounded.
    fn label_pattern(&self) -> &'static str;
}

/// Longest label the matchers will consider.
const MAX_LABEL_LEN: usize = 253;

/// The deployment's codec bound to its base domain.
#[derive(Debug, Clone)]
pub struct HostCodec {
    scheme: Arc<dyn HostnameCodec>,
    base: BaseDomain,
    decoder: Arc<Substitution>,
}

impl HostCodec {
    pub fn new(profile: CodecProfile, base: BaseDomain) -> Result<Self, PatternError> {
        let scheme = profile.codec();
        let source = format!(
            r"(?i-u){}{}\b",
            scheme.label_pattern(),
            regex::escape(base.as_str())
        );
        let max_len = MAX_LABEL_LEN + 1 + base.as_str().len();

        let decode_with = scheme.clone();
        let decoder = Substitution::new(&source, max_len, true, move |caps: &Captures<'_>, out: &mut Vec<u8>| {
            let decoded = caps
                .get(1)
                .and_then(|label| std::str::from_utf8(label.as_bytes()).ok())
                .and_then(|label| decode_with.decode(label).ok());
            match decoded {
                Some(fragment) => out.extend_from_slice(fragment.as_bytes()),
                None => out.extend_from_slice(&caps[0]),
            }
        })?;

        Ok(Self {
            scheme,
            base,
            decoder: Arc::new(decoder),
        })
    }

    pub fn base(&self) -> &BaseDomain {
        &self.base
    }

    pub fn profile(&self) -> CodecProfile {
        self.scheme.profile()
    }

    /// Public hostname for an origin host: `<label>.<base>`.
    pub fn encode_host(&self, host: &str) -> String {
        format!("{}.{}", self.scheme.encode(host), self.base)
    }

    /// Decode a bare label (without the base domain).
    pub fn decode_label(&self, label: &str) -> Result<String, CodecMismatch> {
        self.scheme.decode(label)
    }

    /// Replace every encoded label under the base domain with the origin
    /// host it stands for.
    pub fn decode_hosts<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.decoder.apply_str(text)
    }

    /// Replace every origin host matched by `pattern` with its public name.
    pub fn encode_hosts<'a>(&self, text: &'a str, pattern: &CompiledPattern) -> Cow<'a, str> {
        self.encoder(pattern).apply_str(text)
    }

    /// Substitution used on inbound text, shared by headers and bodies.
    pub fn decoder(&self) -> Arc<Substitution> {
        self.decoder.clone()
    }

    /// Substitution used on outbound text for one origin root.
    pub fn encoder(&self, pattern: &CompiledPattern) -> Substitution {
        let scheme = self.scheme.clone();
        let base = self.base.clone();
        pattern.substitution(move |caps: &Captures<'_>, out: &mut Vec<u8>| {
            match std::str::from_utf8(&caps[0]) {
                Ok(host) => {
                    out.extend_from_slice(scheme.encode(host).as_bytes());
                    out.push(b'.');
                    out.extend_from_slice(base.as_str().as_bytes());
                }
                Err(_) => out.extend_from_slice(&caps[0]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(profile: CodecProfile) -> HostCodec {
        HostCodec::new(profile, BaseDomain::parse("example.com").unwrap()).unwrap()
    }

    #[test]
    fn decodes_host_header_under_base() {
        let codec = codec(CodecProfile::Dashed);
        assert_eq!(codec.decode_hosts("abc--646566.example.com"), "abc.def");
        assert_eq!(codec.decode_hosts("ABC--646566.Example.COM:8443"), "ABC.def:8443");
    }

    #[test]
    fn decodes_every_label_in_free_text() {
        let codec = codec(CodecProfile::Dashed);
        let referer = "https://61pi--githu62--63om.example.com/path?next=https://6364n.example.com/";
        assert_eq!(
            codec.decode_hosts(referer),
            "https://api.github.com/path?next=https://cdn/"
        );
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let codec = codec(CodecProfile::Dashed);
        let text = "example.com and notexample.com and a--b-c.example.org";
        assert!(matches!(codec.decode_hosts(text), Cow::Borrowed(_)));
        // malformed label under the base domain stays as-is
        assert_eq!(codec.decode_hosts("a---b.example.com"), "a---b.example.com");
    }

    #[test]
    fn hex_profile_matches_single_token_labels() {
        let codec = codec(CodecProfile::Hex);
        assert_eq!(codec.decode_hosts("61pi2egithu622e63om.example.com"), "api.github.com");
        assert_eq!(codec.encode_host("api.github.com"), "61pi2egithu622e63om.example.com");
        // not a valid hex escape: left alone
        assert_eq!(codec.decode_hosts("abc.example.com"), "abc.example.com");
    }

    #[test]
    fn encode_then_decode_restores_host() {
        for profile in [CodecProfile::Hex, CodecProfile::Dashed] {
            let codec = codec(profile);
            for host in ["api.github.com", "127.0.0.1", "xn--bcher-kva.de", "a-b.c_d.io"] {
                let public = codec.encode_host(host);
                assert_eq!(codec.decode_hosts(&public), host, "{profile:?} {public}");
            }
        }
    }

    #[test]
    fn encodes_origin_hosts_with_pattern() {
        let codec = codec(CodecProfile::Dashed);
        let pattern = CompiledPattern::compile("github.com").unwrap();
        let rewritten = codec.encode_hosts("see https://api.github.com/x and github.com", &pattern);
        assert_eq!(
            rewritten,
            "see https://61pi--githu62--63om.example.com/x and githu62--63om.example.com"
        );
    }

    #[test]
    fn parses_profile_names() {
        assert_eq!("HEX".parse::<CodecProfile>().unwrap(), CodecProfile::Hex);
        assert_eq!("dashed".parse::<CodecProfile>().unwrap(), CodecProfile::Dashed);
        assert!("base64".parse::<CodecProfile>().is_err());
    }
}
