//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → request.rs (request ID generation)
//!     → dispatch.rs (target resolution, outbound send)
//!     → response.rs (rewritability, error responses)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;

pub use dispatch::{DispatchController, DispatchState, Scheme};
pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
