//! HTTP server setup and the relay handler.
//!
//! # Responsibilities
//! - Create the Axum Router with the catch-all relay handler
//! - Wire up middleware (request ID, tracing)
//! - Serve plain listeners via `axum::serve`, TLS listeners via `axum-server`
//! - Drive one session per request through the rewrite pipeline
//!
//! # Data Flow
//! ```text
//! client request
//!     → decode headers → resolve target → additional request headers
//!     → DispatchController::send (outbound idle timeout)
//!     → encode headers → ResponsePostProcessor
//!     → guarded (and maybe rewritten) body → client
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::State,
    http::{Method, Request, Response, StatusCode},
    routing::any,
    Extension, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::Stream;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::codec::{BaseDomain, DomainError, HostCodec};
use crate::config::schema::TimeoutConfig;
use crate::config::ProxyConfig;
use crate::error::{BoxError, ProxyError};
use crate::http::dispatch::{
    resolve_target, strip_hop_by_hop, DispatchController, DispatchState, DispatchTrace, Scheme,
    DEFAULT_PROXY_CLIENTS,
};
use crate::http::request::{request_id, UuidRequestId};
use crate::http::response::{error_response, is_rewritable};
use crate::net::{Leg, SessionAbortController};
use crate::observability::metrics;
use crate::rewrite::response::apply_additional;
use crate::rewrite::{
    request_origin, HeaderRewriter, HeaderSet, PatternCache, PatternError, ResponsePostProcessor,
    StreamRewriter,
};

/// How long TLS listeners wait for in-flight sessions on shutdown.
const TLS_DRAIN: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid base host: {0}")]
    BaseHost(#[from] DomainError),
    #[error("failed to build host matcher: {0}")]
    Pattern(#[from] PatternError),
    #[error("failed to build cookie matcher: {0}")]
    Regex(#[from] regex::Error),
    #[error("failed to build outbound client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub codec: Arc<HostCodec>,
    pub patterns: Arc<PatternCache>,
    pub header_rewriter: HeaderRewriter,
    pub post_processor: Arc<ResponsePostProcessor>,
    pub dispatch: Arc<DispatchController>,
    pub timeouts: TimeoutConfig,
}

/// HTTP server for the proxy.
#[derive(Clone)]
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Build every shared component from the configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let base = BaseDomain::parse(&config.base_host)?;
        let codec = HostCodec::new(config.codec.profile, base.clone())?;
        let post_processor = ResponsePostProcessor::new(base, config.headers.response.clone())?;
        let dispatch = DispatchController::new(
            config.upstream.clone(),
            config.timeouts.outbound_idle(),
            DEFAULT_PROXY_CLIENTS,
        )?;

        let state = AppState {
            codec: Arc::new(codec),
            patterns: Arc::new(PatternCache::new(config.rewrite.pattern_cache_size)),
            header_rewriter: HeaderRewriter::default(),
            post_processor: Arc::new(post_processor),
            dispatch: Arc::new(dispatch),
            timeouts: config.timeouts.clone(),
            config: Arc::new(config),
        };
        Ok(Self { state })
    }

    /// Build the Axum router for a listener of the given scheme.
    pub fn router(&self, scheme: Scheme) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(self.state.clone())
            .layer(Extension(scheme))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, scheme = "http", "HTTP server starting");

        axum::serve(listener, self.router(Scheme::Http).into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        &self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        tracing::info!(address = %addr, scheme = "https", "HTTP server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            drain.graceful_shutdown(Some(TLS_DRAIN));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router(Scheme::Https).into_make_service())
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }
}

/// Relay one request and its response.
async fn proxy_handler(
    State(state): State<AppState>,
    Extension(scheme): Extension<Scheme>,
    request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().clone();
    let session = SessionAbortController::new(state.timeouts.inbound_idle(), state.timeouts.outbound_idle());

    tracing::debug!(
        request_id = %request_id(request.headers()),
        session_id = %session.id(),
        method = %method,
        path = %request.uri().path(),
        "Proxying request"
    );

    let mut trace = DispatchTrace::new(session.id());
    let response = match relay(&state, scheme, &session, &mut trace, request).await {
        Ok(response) => {
            trace.follow(session);
            response
        }
        Err(err) => {
            session.abort(&err);
            trace.advance(DispatchState::Aborted);
            error_response(&err)
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

async fn relay(
    state: &AppState,
    scheme: Scheme,
    session: &SessionAbortController,
    trace: &mut DispatchTrace,
    request: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let (parts, body) = request.into_parts();

    let mut headers = HeaderSet::from_header_map(&parts.headers);
    let origin = request_origin(&headers);
    state
        .header_rewriter
        .rewrite(&mut headers, |text| state.codec.decode_hosts(text))?;
    trace.advance(DispatchState::HeadersRewritten);

    let resolved = resolve_target(&mut headers, scheme, state.codec.base(), &state.config.upstream)?;
    strip_hop_by_hop(&mut headers);
    headers.remove("host");
    apply_additional(&mut headers, &state.config.headers.request);
    let path = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = state.dispatch.outbound_url(&resolved, path)?;
    trace.advance(DispatchState::TargetResolved);

    let body = if body.size_hint().exact() == Some(0) {
        None
    } else {
        let rewriter = (state.config.rewrite.request_body && is_rewritable(&headers))
            .then(|| StreamRewriter::new(state.codec.decoder()));
        if rewriter.is_some() {
            headers.remove("content-length");
        }
        let guarded = session.guard(Leg::Inbound, body.into_data_stream(), rewriter);
        Some(reqwest::Body::wrap_stream(guarded))
    };

    trace.advance(DispatchState::OutboundSent);
    let head_request = parts.method == Method::HEAD;
    let upstream = state
        .dispatch
        .send(
            session,
            parts.method,
            url,
            headers.to_header_map(),
            body,
            resolved.target.proxy.as_ref(),
        )
        .await?;
    trace.advance(DispatchState::ResponseReceived);

    let status = upstream.status();
    let mut headers = HeaderSet::from_header_map(upstream.headers());
    strip_hop_by_hop(&mut headers);
    let pattern = state.patterns.get(&resolved.target.host)?;
    let encoder = Arc::new(state.codec.encoder(&pattern));
    state
        .header_rewriter
        .rewrite(&mut headers, |text| encoder.apply_str(text))?;
    state.post_processor.process(&mut headers, origin.as_deref());
    trace.advance(DispatchState::HeadersPostProcessed);

    let bodiless = head_request || is_bodiless_status(status);
    let rewriter = (!bodiless && state.config.rewrite.response_body && is_rewritable(&headers))
        .then(|| StreamRewriter::new(encoder));
    if rewriter.is_some() {
        headers.remove("content-length");
    }
    let body = response_body(session, bodiless, upstream.bytes_stream(), rewriter);

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers.to_header_map();
    trace.advance(DispatchState::Relayed);
    Ok(response)
}

/// Body relayed to the client. A bodiless response finishes the session
/// right away; its Content-Length is left alone since for HEAD it describes
/// the body a GET would return.
fn response_body<S, E>(
    session: &SessionAbortController,
    bodiless: bool,
    upstream: S,
    rewriter: Option<StreamRewriter>,
) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    if bodiless {
        session.complete();
        return Body::empty();
    }
    Body::from_stream(session.guard(Leg::Outbound, upstream, rewriter))
}

/// Statuses that never carry a response body.
fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}
