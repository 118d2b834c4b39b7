//! Incremental substitution over chunked bodies.
//!
//! # Algorithm
//! ```text
//! pending = [ctx][unresolved tail][new chunk]
//!            ^ lookbehind only, already emitted
//!
//! for each match in pending (leftmost first):
//!     settled if start + hold < pending.len()   → replace and emit
//!     otherwise                                 → stop, wait for more bytes
//! emit every byte before pending.len() - hold
//! keep one emitted byte as context + the rest as the new tail
//! ```
//!
//! `hold` is `max_len - 1` for plain literals and `max_len` for patterns
//! that look one byte past the match. A match is settled once every byte it
//! could possibly depend on has arrived, so the output never depends on how
//! the input was split.

use std::sync::Arc;

use axum::body::Bytes;

use crate::rewrite::substitution::Substitution;

/// Streaming counterpart of [`Substitution::apply`].
#[derive(Debug)]
pub struct StreamRewriter {
    substitution: Arc<Substitution>,
    pending: Vec<u8>,
    /// Leading bytes of `pending` that were already emitted.
    context: usize,
}

impl StreamRewriter {
    pub fn new(substitution: impl Into<Arc<Substitution>>) -> Self {
        Self {
            substitution: substitution.into(),
            pending: Vec::new(),
            context: 0,
        }
    }

    /// Feed one chunk; returns whatever can be emitted now (possibly empty).
    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        if chunk.is_empty() {
            return Bytes::new();
        }
        self.pending.extend_from_slice(chunk);

        let len = self.pending.len();
        let hold = self.substitution.hold();
        let regex = self.substitution.regex();
        let mut out = Vec::with_capacity(len);
        let mut cursor = self.context;

        while cursor < len {
            let Some(caps) = regex.captures_at(&self.pending, cursor) else { break };
            let Some(m) = caps.get(0) else { break };
            if m.is_empty() || m.start() + hold >= len {
                break;
            }
            out.extend_from_slice(&self.pending[cursor..m.start()]);
            self.substitution.replace_into(&caps, &mut out);
            cursor = m.end();
        }

        let safe = len.saturating_sub(hold).max(cursor);
        out.extend_from_slice(&self.pending[cursor..safe]);

        let keep_from = safe.saturating_sub(1);
        self.pending.drain(..keep_from);
        self.context = safe - keep_from;

        Bytes::from(out)
    }

    /// End of stream: flush the tail with every remaining match applied.
    pub fn finish(&mut self) -> Bytes {
        let regex = self.substitution.regex();
        let mut out = Vec::with_capacity(self.pending.len());
        let mut cursor = self.context;

        while cursor < self.pending.len() {
            let Some(caps) = regex.captures_at(&self.pending, cursor) else { break };
            let Some(m) = caps.get(0) else { break };
            if m.is_empty() {
                break;
            }
            out.extend_from_slice(&self.pending[cursor..m.start()]);
            self.substitution.replace_into(&caps, &mut out);
            cursor = m.end();
        }
        if cursor < self.pending.len() {
            out.extend_from_slice(&self.pending[cursor..]);
        }

        self.pending.clear();
        self.context = 0;
        Bytes::from(out)
    }

    /// Unresolved bytes currently held back.
    pub fn buffered(&self) -> usize {
        self.pending.len() - self.context
    }
}
