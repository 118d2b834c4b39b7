//! Response header post-processing.
//!
//! # Responsibilities
//! - Re-scope `Set-Cookie` domains to the base domain
//! - Keep CORS and CSP working for the public origin
//! - Apply configured header overrides last

use std::borrow::Cow;

use regex::{Captures, Regex};
use url::Url;

use crate::codec::BaseDomain;
use crate::config::schema::{AdditionalHeaders, HeaderDirective};
use crate::rewrite::headers::{HeaderSet, HeaderValue};

const COOKIE_DOMAIN: &str = r"(?i)\b(domain)=[^;]*";

/// CSP directives that take no source list.
const NON_SOURCE_DIRECTIVES: &[&str] = &[
    "upgrade-insecure-requests",
    "block-all-mixed-content",
    "sandbox",
    "report-uri",
    "report-to",
    "require-trusted-types-for",
    "trusted-types",
];

#[derive(Debug, Clone)]
pub struct ResponsePostProcessor {
    base: BaseDomain,
    cookie_domain: Regex,
    additional: AdditionalHeaders,
}

impl ResponsePostProcessor {
    pub fn new(base: BaseDomain, additional: AdditionalHeaders) -> Result<Self, regex::Error> {
        Ok(Self {
            base,
            cookie_domain: Regex::new(COOKIE_DOMAIN)?,
            additional,
        })
    }

    /// `origin` is the client's origin as captured from the inbound request.
    pub fn process(&self, headers: &mut HeaderSet, origin: Option<&str>) {
        self.rewrite_cookies(headers);

        if headers.contains("access-control-allow-origin") {
            headers.insert("access-control-allow-origin", origin.unwrap_or("*"));
        }

        if let Some(origin) = origin {
            if let Some(policy) = headers.get_mut("content-security-policy") {
                for text in policy.texts_mut() {
                    *text = augment_csp(text, origin);
                }
            }
        }

        apply_additional(headers, &self.additional);
    }

    pub fn rewrite_cookies(&self, headers: &mut HeaderSet) {
        let Some(cookies) = headers.get_mut("set-cookie") else {
            return;
        };
        for cookie in cookies.texts_mut() {
            let rewritten = match self.cookie_domain.replace_all(cookie, |caps: &Captures<'_>| {
                format!("{}=.{}", &caps[1], self.base)
            }) {
                Cow::Owned(rewritten) => Some(rewritten),
                Cow::Borrowed(_) => None,
            };
            if let Some(rewritten) = rewritten {
                *cookie = rewritten;
            }
        }
    }
}

/// `Remove` deletes, `Set` overwrites.
pub fn apply_additional(headers: &mut HeaderSet, additional: &AdditionalHeaders) {
    for (name, directive) in additional.iter() {
        match directive {
            HeaderDirective::Remove => {
                headers.remove(name);
            }
            HeaderDirective::Set(value) => {
                headers.insert(name, HeaderValue::Text(value.clone()));
            }
        }
    }
}

/// The client's origin: `Origin`, else scheme/host/port of `Referer`.
pub fn request_origin(headers: &HeaderSet) -> Option<String> {
    if let Some(origin) = headers.first_text("origin").map(str::trim) {
        if !origin.is_empty() && origin != "null" {
            return Some(origin.to_string());
        }
    }
    let referer = Url::parse(headers.first_text("referer")?.trim()).ok()?;
    let origin = referer.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Append `origin` to every source-list directive that lacks it.
pub fn augment_csp(policy: &str, origin: &str) -> String {
    policy
        .split(';')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| {
            let mut tokens = directive.split_ascii_whitespace();
            let name = tokens.next().unwrap_or_default();
            let takes_sources = !NON_SOURCE_DIRECTIVES
                .iter()
                .any(|d| d.eq_ignore_ascii_case(name));
            let present = tokens.any(|t| t.eq_ignore_ascii_case(origin));
            if takes_sources && !present {
                format!("{directive} {origin}")
            } else {
                directive.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
