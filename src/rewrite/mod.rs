//! Rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! Request:
//!     HeaderSet ──HeaderRewriter(decode)──→ outbound headers
//!     body ──StreamRewriter(decoder)──→ outbound body   (optional)
//!
//! Response:
//!     HeaderSet ──HeaderRewriter(encode, PatternCache[root])──→
//!               ──ResponsePostProcessor──→ client headers
//!     body ──StreamRewriter(encoder)──→ client body
//! ```
//!
//! # Design Decisions
//! - Every substitution declares its longest possible match, which bounds
//!   the bytes held back while streaming
//! - Compiled patterns are shared read-only through `Arc`

pub mod headers;
pub mod pattern;
pub mod response;
pub mod stream;
pub mod substitution;

pub use headers::{HeaderRewriter, HeaderSet, HeaderValue, MAX_HEADER_DEPTH};
pub use pattern::{CompiledPattern, PatternCache};
pub use response::{request_origin, ResponsePostProcessor};
pub use stream::StreamRewriter;
pub use substitution::{PatternError, Substitution};
