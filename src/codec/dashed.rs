//! Dashed segment profile.
//!
//! The fragment is split on `.`, every segment is hex-escaped the same way
//! as the hex profile, and segments are joined with `--`. Escaped segments
//! never contain `-`, so the marker is unambiguous.
//!
//! A segment spelled `x…xn` would put `xn--` (the IDNA prefix) into the
//! label, so it is escaped with one extra leading `x` and unescaped on the
//! way back. Segments that are not valid escapes are kept verbatim, which is
//! what lets hand-written labels such as `abc--646566` decode to `abc.def`.

use crate::codec::hex;
use crate::codec::{CodecMismatch, CodecProfile, HostnameCodec};

pub const SEPARATOR: &str = "--";

/// Matches a dashed label directly in front of the base domain.
const LABEL_PATTERN: &str = r"\b([a-z0-9][a-z0-9-]{0,252})\.";

#[derive(Debug, Clone, Copy, Default)]
pub struct DashedCodec;

impl HostnameCodec for DashedCodec {
    fn profile(&self) -> CodecProfile {
        CodecProfile::Dashed
    }

    fn encode(&self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len() * 2);
        for (i, segment) in fragment.split('.').enumerate() {
            if i > 0 {
                out.push_str(SEPARATOR);
            }
            let start = out.len();
            hex::escape_into(segment, &mut out);
            if is_prefix_collision(&out[start..]) {
                out.insert(start, 'x');
            }
        }
        out
    }

    fn decode(&self, label: &str) -> Result<String, CodecMismatch> {
        let mut out = String::with_capacity(label.len());
        for (i, segment) in label.split(SEPARATOR).enumerate() {
            if i > 0 {
                out.push('.');
            }
            if segment.contains('-') {
                return Err(CodecMismatch(label.to_string()));
            }
            if is_escaped_prefix(segment) {
                out.push_str(&segment[1..]);
            } else {
                match hex::unescape(segment) {
                    Some(decoded) => out.push_str(&decoded),
                    None => out.push_str(segment),
                }
            }
        }
        Ok(out)
    }

    fn label_pattern(&self) -> &'static str {
        LABEL_PATTERN
    }
}

/// `xn`, `xxn`, `xxxn`, ... (case-insensitive).
fn is_prefix_collision(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2
        && bytes[bytes.len() - 1].eq_ignore_ascii_case(&b'n')
        && bytes[..bytes.len() - 1].iter().all(|b| b.eq_ignore_ascii_case(&b'x'))
}

/// An escaped collision carries at least one extra `x`.
fn is_escaped_prefix(segment: &str) -> bool {
    segment.len() >= 3 && is_prefix_collision(segment)
}
