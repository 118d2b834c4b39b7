//! origin-cloak
//!
//! A transparent reverse proxy that publishes any origin under an encoded
//! subdomain of one base domain.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                     ORIGIN CLOAK                      │
//!                     │                                                       │
//!   Client Request    │  ┌──────────┐   ┌────────────┐   ┌────────────────┐  │
//!   ──────────────────┼─▶│  http    │──▶│  rewrite   │──▶│   dispatch     │──┼──▶ Origin
//!  61pi--...example.com│  │  server  │   │  decode    │   │ target/worker  │  │   api.github.com
//!                     │  └──────────┘   └────────────┘   └───────┬────────┘  │
//!                     │                                          │           │
//!   Client Response   │  ┌──────────┐   ┌────────────┐           │           │
//!   ◀─────────────────┼──│ session  │◀──│  rewrite   │◀──────────┘           │
//!                     │  │  guard   │   │ encode+post│                       │
//!                     │  └──────────┘   └────────────┘                       │
//!                     │                                                       │
//!                     │  codec · config · observability · lifecycle          │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use origin_cloak::config::load_layered;
use origin_cloak::lifecycle::{self, Shutdown};
use origin_cloak::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "origin-cloak")]
#[command(about = "Transparent host-rewriting reverse proxy", long_about = None)]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_layered(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("origin-cloak: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.observability.log_format);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_host = %config.base_host,
        profile = config.codec.profile.as_str(),
        listeners = config.listeners.len(),
        "origin-cloak starting"
    );

    match lifecycle::run(config, Shutdown::new()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
