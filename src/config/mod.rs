//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyConfig::default()
//!     → optional TOML file (--config)
//!     → environment overrides (BASE_HOST, LISTEN_PORT, ...)
//!     → validation.rs (semantic checks, every error reported)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is evaluated once at startup; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_layered, load_layered_with, ConfigError};
pub use schema::{
    AdditionalHeaders, HeaderDirective, ListenerConfig, ProxyConfig, TlsConfig, UpstreamMode,
};
pub use validation::{validate_config, ValidationError};
