//! Bounded pattern substitution.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use regex::bytes::{Captures, Regex};
use thiserror::Error;

/// Writes the replacement for one match into the output buffer.
pub type Replacer = dyn Fn(&Captures<'_>, &mut Vec<u8>) + Send + Sync;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error("pattern `{0}` can match the empty string")]
    EmptyMatch(String),
    #[error("pattern `{0}` needs a maximum match length of at least one byte")]
    Unbounded(String),
}

/// A byte pattern, the longest match it can produce, and its replacement.
///
/// `max_len` is a promise made by the caller: no match of `regex` is ever
/// longer. `lookahead` marks patterns that inspect the byte after a match
/// (a trailing `\b`), which costs the stream rewriter one more held byte.
#[derive(Clone)]
pub struct Substitution {
    regex: Regex,
    max_len: usize,
    lookahead: bool,
    replacer: Arc<Replacer>,
}

impl fmt::Debug for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substitution")
            .field("regex", &self.regex.as_str())
            .field("max_len", &self.max_len)
            .field("lookahead", &self.lookahead)
            .finish_non_exhaustive()
    }
}

impl Substitution {
    pub fn new<F>(source: &str, max_len: usize, lookahead: bool, replacer: F) -> Result<Self, PatternError>
    where
        F: Fn(&Captures<'_>, &mut Vec<u8>) + Send + Sync + 'static,
    {
        let regex = Regex::new(source)?;
        if regex.is_match(b"") {
            return Err(PatternError::EmptyMatch(source.to_string()));
        }
        if max_len == 0 {
            return Err(PatternError::Unbounded(source.to_string()));
        }
        Ok(Self::from_regex(regex, max_len, lookahead, replacer))
    }

    /// Replace every occurrence of `needle` with `replacement`.
    pub fn literal(needle: &str, replacement: impl Into<Vec<u8>>) -> Result<Self, PatternError> {
        if needle.is_empty() {
            return Err(PatternError::EmptyMatch(String::new()));
        }
        let replacement = replacement.into();
        let source = format!("(?-u){}", regex::escape(needle));
        Self::new(&source, needle.len(), false, move |_: &Captures<'_>, out: &mut Vec<u8>| {
            out.extend_from_slice(&replacement)
        })
    }

    pub(crate) fn from_regex<F>(regex: Regex, max_len: usize, lookahead: bool, replacer: F) -> Self
    where
        F: Fn(&Captures<'_>, &mut Vec<u8>) + Send + Sync + 'static,
    {
        Self {
            regex,
            max_len,
            lookahead,
            replacer: Arc::new(replacer),
        }
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Bytes a stream rewriter must hold back before it can be sure no
    /// pending match is still growing.
    pub fn hold(&self) -> usize {
        self.max_len - 1 + usize::from(self.lookahead)
    }

    pub(crate) fn replace_into(&self, caps: &Captures<'_>, out: &mut Vec<u8>) {
        (self.replacer)(caps, out)
    }

    /// Apply to a complete input.
    pub fn apply<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        let mut out: Option<Vec<u8>> = None;
        let mut last = 0;
        for caps in self.regex.captures_iter(input) {
            let Some(m) = caps.get(0) else { continue };
            let buf = out.get_or_insert_with(|| Vec::with_capacity(input.len()));
            buf.extend_from_slice(&input[last..m.start()]);
            self.replace_into(&caps, buf);
            last = m.end();
        }
        match out {
            None => Cow::Borrowed(input),
            Some(mut buf) => {
                buf.extend_from_slice(&input[last..]);
                Cow::Owned(buf)
            }
        }
    }

    /// Apply to a string. Falls back to the input if the replacement would
    /// not be valid UTF-8.
    pub fn apply_str<'a>(&self, input: &'a str) -> Cow<'a, str> {
        match self.apply(input.as_bytes()) {
            Cow::Borrowed(_) => Cow::Borrowed(input),
            Cow::Owned(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Cow::Owned(text),
                Err(_) => Cow::Borrowed(input),
            },
        }
    }
}
