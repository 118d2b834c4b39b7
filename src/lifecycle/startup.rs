//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter when enabled
//! - Build the shared server state
//! - Bind every listener before serving any traffic
//! - Run until a signal or a listener failure, then drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - One failed listener shuts the others down

use std::io;
use std::net::{AddrParseError, SocketAddr};

use axum_server::tls_rustls::RustlsConfig;
use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};

use crate::config::ProxyConfig;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::net::tls::load_tls_config;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("invalid address `{address}`: {source}")]
    Address { address: String, source: AddrParseError },
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },
    #[error("failed to load TLS material for {address}: {source}")]
    Tls { address: String, source: io::Error },
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] BuildError),
    #[error("listener failed: {0}")]
    Serve(#[from] io::Error),
    #[error("listener task failed: {0}")]
    Task(#[from] JoinError),
}

enum Bound {
    Plain(TcpListener),
    Tls(SocketAddr, RustlsConfig),
}

/// Start everything and serve until `shutdown` is triggered, a signal
/// arrives, or a listener fails.
pub async fn run(config: ProxyConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr = address.parse().map_err(|source| StartupError::Address {
            address: address.clone(),
            source,
        })?;
        metrics::init_metrics(addr)?;
    }

    let bound = bind_listeners(&config).await?;
    let server = HttpServer::new(config)?;

    let mut tasks = JoinSet::new();
    for listener in bound {
        let server = server.clone();
        let rx = shutdown.subscribe();
        match listener {
            Bound::Plain(listener) => tasks.spawn(async move { server.run(listener, rx).await }),
            Bound::Tls(addr, tls) => tasks.spawn(async move { server.run_tls(addr, tls, rx).await }),
        };
    }
    tracing::info!(listeners = tasks.len(), "Proxy ready");

    let mut stop = shutdown.subscribe();
    let mut failure = None;
    tokio::select! {
        _ = signals::shutdown_signal() => {}
        _ = stop.recv() => {}
        Some(result) = tasks.join_next() => {
            failure = flatten(result).err();
        }
    }
    shutdown.trigger();

    while let Some(result) = tasks.join_next().await {
        if let Err(err) = flatten(result) {
            tracing::error!(error = %err, "Listener stopped with an error");
            failure.get_or_insert(err);
        }
    }
    tracing::info!("Shutdown complete");

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn bind_listeners(config: &ProxyConfig) -> Result<Vec<Bound>, StartupError> {
    let mut bound = Vec::with_capacity(config.listeners.len());
    for listener in &config.listeners {
        let address = listener.bind_address.clone();
        match &listener.tls {
            None => {
                let tcp = TcpListener::bind(&address)
                    .await
                    .map_err(|source| StartupError::Bind { address, source })?;
                bound.push(Bound::Plain(tcp));
            }
            Some(tls) => {
                let addr: SocketAddr = address.parse().map_err(|source| StartupError::Address {
                    address: address.clone(),
                    source,
                })?;
                let rustls = load_tls_config(tls)
                    .await
                    .map_err(|source| StartupError::Tls { address, source })?;
                bound.push(Bound::Tls(addr, rustls));
            }
        }
    }
    Ok(bound)
}

fn flatten(result: Result<io::Result<()>, JoinError>) -> Result<(), StartupError> {
    Ok(result??)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ListenerConfig;

    #[tokio::test]
    async fn occupied_port_fails_fast() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ProxyConfig::default();
        config.listeners = vec![ListenerConfig {
            bind_address: taken.local_addr().unwrap().to_string(),
            ..ListenerConfig::default()
        }];
        let err = run(config, Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::Bind { .. }));
    }

    #[tokio::test]
    async fn trigger_stops_every_listener() {
        let mut config = ProxyConfig::default();
        config.base_host = "cloak.test".to_string();
        config.listeners = vec![
            ListenerConfig { bind_address: "127.0.0.1:0".to_string(), ..ListenerConfig::default() },
            ListenerConfig { bind_address: "127.0.0.1:0".to_string(), ..ListenerConfig::default() },
        ];
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger();
        });
        tokio::time::timeout(Duration::from_secs(5), run(config, shutdown))
            .await
            .unwrap()
            .unwrap();
    }
}
