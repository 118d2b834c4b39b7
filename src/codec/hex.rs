//! Hex-in-subdomain profile.
//!
//! Letters `g` through `z` pass through untouched; every other byte becomes
//! its two-digit lower-case hex value. Because the surviving letters can
//! never be mistaken for hex digits, decoding is a single left-to-right scan.

use std::fmt::Write as _;

use crate::codec::{CodecMismatch, CodecProfile, HostnameCodec};

/// Matches a single `[a-z0-9]` label directly in front of the base domain.
const LABEL_PATTERN: &str = r"\b([a-z0-9]{1,253})\.";

#[derive(Debug, Clone, Copy, Default)]
pub struct HexCodec;

impl HostnameCodec for HexCodec {
    fn profile(&self) -> CodecProfile {
        CodecProfile::Hex
    }

    fn encode(&self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len() * 2);
        escape_into(fragment, &mut out);
        out
    }

    fn decode(&self, label: &str) -> Result<String, CodecMismatch> {
        unescape(label).ok_or_else(|| CodecMismatch(label.to_string()))
    }

    fn label_pattern(&self) -> &'static str {
        LABEL_PATTERN
    }
}

pub(crate) fn is_passthrough(b: u8) -> bool {
    matches!(b.to_ascii_lowercase(), b'g'..=b'z')
}

/// Append the escaped form of `text` to `out`.
pub(crate) fn escape_into(text: &str, out: &mut String) {
    for b in text.bytes() {
        if is_passthrough(b) {
            out.push(b as char);
        } else {
            let _ = write!(out, "{:02x}", b);
        }
    }
}

/// Reverse [`escape_into`]. Returns `None` when the input is not a valid
/// escape of printable ASCII.
pub(crate) fn unescape(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if is_passthrough(b) {
            out.push(b);
            i += 1;
            continue;
        }
        let hi = hex_value(b)?;
        let lo = hex_value(*bytes.get(i + 1)?)?;
        let decoded = (hi << 4) | lo;
        if !(0x21..=0x7e).contains(&decoded) {
            return None;
        }
        out.push(decoded);
        i += 2;
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
