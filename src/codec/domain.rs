//! The configured base domain.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Reasons a base domain is rejected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("base domain is empty")]
    Empty,
    #[error("base domain `{0}` needs at least two labels")]
    SingleLabel(String),
    #[error("base domain `{domain}` has an invalid label `{label}`")]
    InvalidLabel { domain: String, label: String },
    #[error("base domain `{0}` is longer than 253 bytes")]
    TooLong(String),
}

/// Root domain under which every origin host is published.
///
/// Stored lower-cased without leading or trailing dots. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseDomain(Arc<str>);

impl BaseDomain {
    /// Parse and normalize a base domain.
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let domain = input.trim().trim_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return Err(DomainError::Empty);
        }
        if domain.len() > 253 {
            return Err(DomainError::TooLong(domain));
        }

        let mut labels = 0;
        for label in domain.split('.') {
            let valid = !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
            if !valid {
                return Err(DomainError::InvalidLabel {
                    domain: domain.clone(),
                    label: label.to_string(),
                });
            }
            labels += 1;
        }
        if labels < 2 {
            return Err(DomainError::SingleLabel(domain));
        }

        Ok(Self(domain.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `host` is the base domain itself or one of its subdomains.
    pub fn covers(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        if host.eq_ignore_ascii_case(&self.0) {
            return true;
        }
        host.len() > self.0.len()
            && host.as_bytes()[host.len() - self.0.len() - 1] == b'.'
            && host[host.len() - self.0.len()..].eq_ignore_ascii_case(&self.0)
    }
}

impl fmt::Display for BaseDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_dots() {
        let base = BaseDomain::parse(" .Example.COM. ").unwrap();
        assert_eq!(base.as_str(), "example.com");
    }

    #[test]
    fn rejects_bad_domains() {
        assert_eq!(BaseDomain::parse(""), Err(DomainError::Empty));
        assert!(matches!(BaseDomain::parse("localhost"), Err(DomainError::SingleLabel(_))));
        assert!(matches!(BaseDomain::parse("a..com"), Err(DomainError::InvalidLabel { .. })));
        assert!(matches!(BaseDomain::parse("-a.com"), Err(DomainError::InvalidLabel { .. })));
        assert!(matches!(BaseDomain::parse("a_b.com"), Err(DomainError::InvalidLabel { .. })));
    }

    #[test]
    fn covers_self_and_subdomains_only() {
        let base = BaseDomain::parse("example.com").unwrap();
        assert!(base.covers("example.com"));
        assert!(base.covers("WWW.Example.com"));
        assert!(base.covers("a.b.example.com."));
        assert!(!base.covers("notexample.com"));
        assert!(!base.covers("example.com.evil.net"));
    }
}
