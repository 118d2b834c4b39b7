//! Target resolution and outbound dispatch.
//!
//! # Responsibilities
//! - Derive the origin (host, port, scheme, forward proxy) from decoded
//!   inbound headers
//! - Strip routing and hop-by-hop headers before forwarding
//! - Build the outbound URL for direct or worker mode
//! - Send the request with a cached client per forward proxy
//!
//! # Design Decisions
//! - No retries; redirects are relayed, never followed
//! - Environment proxy variables are ignored; only the `Proxy` header counts
//! - Forward-proxy clients live in a bounded LRU since their keys come from
//!   clients; the direct client is built once up front
//! - A host that is still under the base domain after decoding is rejected,
//!   so the proxy never loops into itself

use std::fmt;
use std::net::Ipv6Addr;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use reqwest::redirect::Policy;
use tracing::{debug, warn};
use url::Url;

use crate::codec::BaseDomain;
use crate::config::schema::{UpstreamConfig, UpstreamMode};
use crate::error::ProxyError;
use crate::net::{SessionAbortController, SessionId, SessionState};
use crate::rewrite::HeaderSet;

/// Headers that only steer the proxy and never reach the origin.
const ROUTING_HEADERS: &[&str] = &[
    "proxy",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-for",
    "cf-worker",
];

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Per-request progress, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    HeadersRewritten,
    TargetResolved,
    OutboundSent,
    ResponseReceived,
    HeadersPostProcessed,
    Relayed,
    Completed,
    Aborted,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Received => "received",
            DispatchState::HeadersRewritten => "headers_rewritten",
            DispatchState::TargetResolved => "target_resolved",
            DispatchState::OutboundSent => "outbound_sent",
            DispatchState::ResponseReceived => "response_received",
            DispatchState::HeadersPostProcessed => "headers_post_processed",
            DispatchState::Relayed => "relayed",
            DispatchState::Completed => "completed",
            DispatchState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Aborted)
    }
}

#[derive(Debug)]
pub struct DispatchTrace {
    session: SessionId,
    state: DispatchState,
}

impl DispatchTrace {
    pub fn new(session: SessionId) -> Self {
        debug!(session_id = %session, state = DispatchState::Received.as_str(), "Dispatch started");
        Self {
            session,
            state: DispatchState::Received,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn advance(&mut self, next: DispatchState) {
        if self.state.is_terminal() {
            return;
        }
        debug!(
            session_id = %self.session,
            from = self.state.as_str(),
            to = next.as_str(),
            "Dispatch transition"
        );
        self.state = next;
    }

    /// Record the terminal state once the relayed body has finished.
    pub fn follow(mut self, session: SessionAbortController) {
        tokio::spawn(async move {
            session.closed().await;
            let terminal = match session.state() {
                SessionState::Aborted => DispatchState::Aborted,
                _ => DispatchState::Completed,
            };
            self.advance(terminal);
        });
    }
}

/// Scheme of a listener or an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-proxy clients kept around by default.
pub const DEFAULT_PROXY_CLIENTS: usize = 32;

/// Forward proxy requested through the `Proxy` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardProxy {
    pub url: Url,
    /// Talk TLS to the proxy itself.
    pub secure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub proxy: Option<ForwardProxy>,
}

impl Target {
    /// `scheme://host[:port]<path>`, port omitted when it is the default.
    pub fn url(&self, path_and_query: &str) -> Result<Url, ProxyError> {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = match self.scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        };
        let authority = if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        };
        let path = if path_and_query.starts_with('/') { path_and_query } else { "/" };
        Url::parse(&format!("{}://{authority}{path}", self.scheme))
            .map_err(|e| ProxyError::TargetUnresolved(format!("{}: {e}", self.host)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: Target,
    /// `CF-Worker` header value, when present.
    pub worker: Option<String>,
}

/// Resolve the origin from decoded inbound headers and strip the headers
/// that steered the resolution.
pub fn resolve_target(
    headers: &mut HeaderSet,
    listener: Scheme,
    base: &BaseDomain,
    upstream: &UpstreamConfig,
) -> Result<ResolvedTarget, ProxyError> {
    let raw = headers
        .first_text("x-forwarded-host")
        .or_else(|| headers.first_text("host"))
        .ok_or_else(|| ProxyError::TargetUnresolved("no host header".to_string()))?;
    let first = raw.split(',').next().unwrap_or_default().trim();
    let host = parse_host(first)
        .ok_or_else(|| ProxyError::TargetUnresolved(format!("`{first}` is not a usable host")))?;
    if base.covers(&host) {
        return Err(ProxyError::TargetUnresolved(format!(
            "`{host}` did not decode to an origin"
        )));
    }

    let scheme = match headers.first_text("x-forwarded-proto") {
        Some(proto) => {
            let proto = proto.split(',').next().unwrap_or_default().trim();
            if proto.eq_ignore_ascii_case("https") {
                Scheme::Https
            } else {
                Scheme::Http
            }
        }
        None => listener,
    };
    let port = match scheme {
        Scheme::Http => upstream.http_port,
        Scheme::Https => upstream.https_port,
    };

    let proxy = headers.first_text("proxy").and_then(|raw| {
        let parsed = Url::parse(raw.trim()).ok().and_then(|url| match url.scheme() {
            "https" => Some(ForwardProxy { url, secure: true }),
            "http" => Some(ForwardProxy { url, secure: false }),
            _ => None,
        });
        if parsed.is_none() {
            warn!(proxy = raw, "Ignoring unusable Proxy header");
        }
        parsed
    });

    let worker = headers
        .first_text("cf-worker")
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string);

    for name in ROUTING_HEADERS {
        headers.remove(name);
    }

    Ok(ResolvedTarget {
        target: Target {
            host,
            port,
            scheme,
            proxy,
        },
        worker,
    })
}

/// Host without port, lower-cased. IPv6 literals come back without brackets.
pub fn parse_host(input: &str) -> Option<String> {
    let input = input.trim();
    let host = if let Some(rest) = input.strip_prefix('[') {
        let (inner, _) = rest.split_once(']')?;
        inner.parse::<Ipv6Addr>().ok()?;
        inner
    } else if input.matches(':').count() > 1 {
        input.parse::<Ipv6Addr>().ok()?;
        input
    } else {
        input.split(':').next().unwrap_or_default()
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let valid = !host.is_empty()
        && host.len() <= 253
        && (host.contains(':')
            || host
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')));
    valid.then_some(host)
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderSet) {
    let listed: Vec<String> = headers
        .get_mut("connection")
        .map(|value| {
            value
                .texts_mut()
                .into_iter()
                .flat_map(|text| text.split(','))
                .map(|name| name.trim().to_ascii_lowercase())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();
    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP.iter().copied()) {
        headers.remove(name);
    }
}

/// Builds outbound URLs and owns the outbound clients.
pub struct DispatchController {
    upstream: UpstreamConfig,
    connect_timeout: Option<Duration>,
    direct: reqwest::Client,
    proxied: Mutex<LruCache<String, reqwest::Client>>,
}

impl fmt::Debug for DispatchController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchController")
            .field("upstream", &self.upstream)
            .field("connect_timeout", &self.connect_timeout)
            .field("proxied_clients", &self.proxied_clients())
            .finish_non_exhaustive()
    }
}

impl DispatchController {
    /// `proxy_clients` bounds how many forward-proxy clients stay cached.
    pub fn new(
        upstream: UpstreamConfig,
        connect_timeout: Option<Duration>,
        proxy_clients: usize,
    ) -> Result<Self, reqwest::Error> {
        let direct = build_client(None, connect_timeout)?;
        let capacity = NonZeroUsize::new(proxy_clients).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            upstream,
            connect_timeout,
            direct,
            proxied: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn mode(&self) -> UpstreamMode {
        self.upstream.mode
    }

    /// Where the request is actually sent.
    pub fn outbound_url(&self, resolved: &ResolvedTarget, path_and_query: &str) -> Result<Url, ProxyError> {
        let origin = resolved.target.url(path_and_query)?;
        match self.upstream.mode {
            UpstreamMode::Direct => Ok(origin),
            UpstreamMode::Worker => {
                let worker = resolved
                    .worker
                    .as_deref()
                    .or(self.upstream.worker_host.as_deref())
                    .ok_or_else(|| ProxyError::TargetUnresolved("no worker host".to_string()))?;
                let mut url = Url::parse(&format!("https://{worker}/proxy"))
                    .map_err(|e| ProxyError::TargetUnresolved(format!("worker `{worker}`: {e}")))?;
                url.query_pairs_mut().append_pair("proxyUrl", origin.as_str());
                Ok(url)
            }
        }
    }

    /// Client for the given forward proxy (or none). Proxied clients are
    /// reused until evicted.
    pub fn client_for(&self, proxy: Option<&ForwardProxy>) -> Result<reqwest::Client, ProxyError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let key = proxy.url.as_str();
        if let Some(client) = self.lock().get(key) {
            return Ok(client.clone());
        }

        let client = build_client(Some(proxy), self.connect_timeout).map_err(outbound_error)?;
        debug!(proxy = %key, secure = proxy.secure, "Built outbound client");
        let mut cache = self.lock();
        if let Some(existing) = cache.get(key) {
            return Ok(existing.clone());
        }
        cache.put(key.to_string(), client.clone());
        Ok(client)
    }

    /// Forward-proxy clients currently cached.
    pub fn proxied_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, reqwest::Client>> {
        self.proxied.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send the request under the session's outbound timeout.
    pub async fn send(
        &self,
        session: &SessionAbortController,
        method: reqwest::Method,
        url: Url,
        headers: reqwest::header::HeaderMap,
        body: Option<reqwest::Body>,
        proxy: Option<&ForwardProxy>,
    ) -> Result<reqwest::Response, ProxyError> {
        let client = self.client_for(proxy)?;
        let mut request = client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        session.await_outbound(request.send()).await
    }
}

fn build_client(
    proxy: Option<&ForwardProxy>,
    connect_timeout: Option<Duration>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().redirect(Policy::none());
    builder = match proxy {
        Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.url.as_str())?),
        None => builder.no_proxy(),
    };
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder.build()
}

fn outbound_error(err: reqwest::Error) -> ProxyError {
    ProxyError::OutboundSocketError(Some(Box::new(err)))
}
