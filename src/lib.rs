//! Transparent host-rewriting reverse proxy library.

pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod rewrite;

pub use codec::{BaseDomain, CodecProfile, HostCodec};
pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
