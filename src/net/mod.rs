//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listener (plain or TLS via tls.rs)
//!     → HTTP layer accepts a request
//!     → session.rs (one SessionAbortController per request)
//!         inbound leg:  client body  → guard → origin
//!         outbound leg: origin body  → guard → client
//!
//! Session States:
//!     Open → Completed | Aborted
//! ```
//!
//! # Design Decisions
//! - Both legs of a session share one failure domain
//! - Idle timeouts are per leg and never trigger a retry
//! - TLS is optional per listener and handled transparently

pub mod session;
pub mod tls;

pub use session::{Leg, SessionAbortController, SessionId, SessionState};
