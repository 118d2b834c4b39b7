use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use url::Url;

use origin_cloak::codec::{BaseDomain, CodecProfile, HostCodec};
use origin_cloak::config::{load_config, ConfigError};

#[derive(Parser)]
#[command(name = "cloak-cli")]
#[command(about = "Offline helper for origin-cloak hostnames and configuration", long_about = None)]
struct Cli {
    /// Base domain the labels live under.
    #[arg(short, long)]
    base: String,

    /// Codec profile.
    #[arg(short, long, default_value = "dashed")]
    profile: CodecProfile,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Public hostname for an origin host
    Encode { host: String },
    /// Origin for a public hostname or URL
    Decode { input: String },
    /// Validate a configuration file
    CheckConfig { path: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let output = match cli.command {
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Encode { host } => {
            let codec = HostCodec::new(cli.profile, BaseDomain::parse(&cli.base)?)?;
            json!({ "host": host, "public": codec.encode_host(&host.to_ascii_lowercase()) })
        }
        Commands::Decode { input } => {
            let codec = HostCodec::new(cli.profile, BaseDomain::parse(&cli.base)?)?;
            let host = Url::parse(&input)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .unwrap_or_else(|| input.clone());
            let decoded = codec.decode_hosts(&input).into_owned();
            json!({
                "input": input,
                "host": host,
                "origin": codec.decode_hosts(&host),
                "decoded": decoded,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn check_config(path: &Path) -> Value {
    match load_config(path) {
        Ok(config) => json!({ "valid": true, "base_host": config.base_host }),
        Err(ConfigError::Validation(errors)) => json!({ "valid": false, "errors": errors }),
        Err(err) => json!({ "valid": false, "errors": [{ "field": "file", "message": err.to_string() }] }),
    }
}
