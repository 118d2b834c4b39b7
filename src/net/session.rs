//! Session state and abort coordination.
//!
//! # Responsibilities
//! - Generate unique session IDs for tracing
//! - Tie the inbound and outbound legs into one failure domain
//! - Enforce per-leg idle timeouts on body streams and origin round trips
//! - Emit exactly one diagnostic when a session is aborted
//!
//! # Design Decisions
//! - The abort flag is an atomic so guarded streams stop yielding without
//!   waiting for a wake-up
//! - Waiters on either leg are woken through a watch channel
//! - Dropping the client-facing stream before it finished counts as an
//!   inbound hang-up

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::watch;

use crate::error::{BoxError, ProxyError};
use crate::observability::metrics;
use crate::rewrite::StreamRewriter;

/// Relaxed ordering is enough: IDs only need to be unique.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

const OPEN: u8 = 0;
const COMPLETED: u8 = 1;
const ABORTED: u8 = 2;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// The two halves of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Client ↔ proxy.
    Inbound,
    /// Proxy ↔ origin.
    Outbound,
}

impl Leg {
    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Inbound => "inbound",
            Leg::Outbound => "outbound",
        }
    }

    fn timeout(self, idle: Duration) -> ProxyError {
        match self {
            Leg::Inbound => ProxyError::InboundTimeout(idle),
            Leg::Outbound => ProxyError::OutboundTimeout(idle),
        }
    }

    fn failure(self, source: BoxError) -> ProxyError {
        match self {
            Leg::Inbound => ProxyError::InboundSocketError(Some(source)),
            Leg::Outbound => ProxyError::OutboundStreamError(Some(source)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
    Aborted,
}

#[derive(Debug)]
struct Inner {
    id: SessionId,
    state: AtomicU8,
    closed: watch::Sender<bool>,
    inbound_idle: Option<Duration>,
    outbound_idle: Option<Duration>,
}

/// Shared handle for one client↔origin session. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SessionAbortController {
    inner: Arc<Inner>,
}

impl SessionAbortController {
    pub fn new(inbound_idle: Option<Duration>, outbound_idle: Option<Duration>) -> Self {
        let (closed, _) = watch::channel(false);
        metrics::record_session_started();
        Self {
            inner: Arc::new(Inner {
                id: SessionId::new(),
                state: AtomicU8::new(OPEN),
                closed,
                inbound_idle,
                outbound_idle,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        match self.inner.state.load(Ordering::Acquire) {
            OPEN => SessionState::Open,
            COMPLETED => SessionState::Completed,
            _ => SessionState::Aborted,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == ABORTED
    }

    pub fn idle_timeout(&self, leg: Leg) -> Option<Duration> {
        match leg {
            Leg::Inbound => self.inner.inbound_idle,
            Leg::Outbound => self.inner.outbound_idle,
        }
    }

    /// Tear the session down. Only the first call has any effect; it wakes
    /// both legs and emits the diagnostic. Returns whether this call did it.
    pub fn abort(&self, err: &ProxyError) -> bool {
        if self
            .inner
            .state
            .compare_exchange(OPEN, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.inner.closed.send_replace(true);

        match err.detail() {
            Some(detail) => tracing::warn!(
                session_id = %self.inner.id,
                kind = err.kind(),
                error = %err,
                detail = %detail,
                "Session aborted"
            ),
            None => tracing::warn!(
                session_id = %self.inner.id,
                kind = err.kind(),
                error = %err,
                "Session aborted"
            ),
        }
        metrics::record_abort(err.kind());
        true
    }

    /// Mark a clean finish. No diagnostic.
    pub fn complete(&self) -> bool {
        let done = self
            .inner
            .state
            .compare_exchange(OPEN, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if done {
            self.inner.closed.send_replace(true);
            tracing::trace!(session_id = %self.inner.id, "Session completed");
        }
        done
    }

    /// Resolves once the session is completed or aborted.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Run an origin round trip under the outbound idle timeout. Any failure
    /// aborts the session.
    pub async fn await_outbound<F, T, E>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let idle = self.inner.outbound_idle;
        let round_trip = async {
            match idle {
                Some(idle) => match tokio::time::timeout(idle, fut).await {
                    Ok(result) => result.map_err(|e| ProxyError::OutboundSocketError(Some(e.into()))),
                    Err(_) => Err(Leg::Outbound.timeout(idle)),
                },
                None => fut.await.map_err(|e| ProxyError::OutboundSocketError(Some(e.into()))),
            }
        };

        let result = tokio::select! {
            result = round_trip => result,
            _ = self.closed() => Err(ProxyError::SessionAborted),
        };
        if let Err(err) = &result {
            self.abort(err);
        }
        result
    }

    /// Wrap one leg's body stream: idle timeout, abort propagation and
    /// optional rewriting. The outbound leg completes the session at its
    /// end of stream.
    pub fn guard<S, E>(
        &self,
        leg: Leg,
        body: S,
        rewriter: Option<StreamRewriter>,
    ) -> impl Stream<Item = Result<Bytes, ProxyError>> + Send + 'static
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let relay = Relay {
            session: self.clone(),
            leg,
            body: body.map(|chunk| chunk.map_err(Into::into)).boxed(),
            rewriter,
            done: false,
        };
        stream::unfold(relay, |mut relay| async move {
            let item = relay.next_chunk().await?;
            Some((item, relay))
        })
    }
}

struct Relay {
    session: SessionAbortController,
    leg: Leg,
    body: BoxStream<'static, Result<Bytes, BoxError>>,
    rewriter: Option<StreamRewriter>,
    done: bool,
}

impl Relay {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, ProxyError>> {
        loop {
            if self.done {
                return None;
            }
            if self.session.is_aborted() {
                self.done = true;
                return Some(Err(ProxyError::SessionAborted));
            }

            let session = self.session.clone();
            let idle = session.idle_timeout(self.leg);
            let body = &mut self.body;
            let fetch = async move {
                match idle {
                    Some(idle) => tokio::time::timeout(idle, body.next()).await.map_err(|_| idle),
                    None => Ok(body.next().await),
                }
            };

            let next = tokio::select! {
                next = fetch => next,
                _ = session.closed() => {
                    self.done = true;
                    if session.is_aborted() {
                        return Some(Err(ProxyError::SessionAborted));
                    }
                    return None;
                }
            };

            match next {
                Err(idle) => return Some(Err(self.fail(self.leg.timeout(idle)))),
                Ok(Some(Err(source))) => return Some(Err(self.fail(self.leg.failure(source)))),
                Ok(Some(Ok(chunk))) => {
                    let out = match self.rewriter.as_mut() {
                        Some(rewriter) => rewriter.push(&chunk),
                        None => chunk,
                    };
                    if !out.is_empty() {
                        return Some(Ok(out));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    let tail = self.rewriter.as_mut().map(StreamRewriter::finish);
                    if self.leg == Leg::Outbound {
                        self.session.complete();
                    }
                    return tail.filter(|tail| !tail.is_empty()).map(Ok);
                }
            }
        }
    }

    fn fail(&mut self, err: ProxyError) -> ProxyError {
        self.done = true;
        self.session.abort(&err);
        err
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if !self.done && self.leg == Leg::Outbound {
            self.session.abort(&ProxyError::InboundSocketError(None));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use super::*;
    use crate::rewrite::Substitution;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let parts: Vec<_> = parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect();
        stream::iter(parts)
    }

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("sess-"));
    }

    #[test]
    fn abort_is_idempotent() {
        let session = SessionAbortController::new(None, None);
        assert!(session.abort(&ProxyError::OutboundTimeout(Duration::from_secs(1))));
        assert!(!session.abort(&ProxyError::InboundSocketError(None)));
        assert!(!session.complete());
        assert_eq!(session.state(), SessionState::Aborted);
    }

    #[tokio::test]
    async fn outbound_timeout_aborts_and_wakes_waiters() {
        let session = SessionAbortController::new(None, Some(Duration::from_millis(50)));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.closed().await })
        };

        let never = std::future::pending::<Result<(), Infallible>>();
        let err = session.await_outbound(never).await.unwrap_err();
        assert!(matches!(err, ProxyError::OutboundTimeout(_)));
        assert!(session.is_aborted());
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn guarded_outbound_stream_rewrites_and_completes() {
        let session = SessionAbortController::new(None, Some(Duration::from_secs(1)));
        let sub = Arc::new(Substitution::literal(".origin.test", ".cloak.test").unwrap());
        let body = session.guard(
            Leg::Outbound,
            chunks(&["see www.", "origin.", "test now"]),
            Some(StreamRewriter::new(sub)),
        );
        let out: Vec<Bytes> = body.map(Result::unwrap).collect().await;
        assert_eq!(out.concat(), b"see www.cloak.test now");
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn idle_body_times_out_once() {
        let session = SessionAbortController::new(Some(Duration::from_millis(30)), None);
        let stalled = chunks(&["a"]).chain(stream::pending());
        let mut body = Box::pin(session.guard(Leg::Inbound, stalled, None));

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        let err = body.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProxyError::InboundTimeout(_)));
        assert!(body.next().await.is_none());
        assert!(session.is_aborted());
    }

    #[tokio::test]
    async fn abort_stops_the_other_leg() {
        let session = SessionAbortController::new(None, None);
        let mut body = Box::pin(session.guard(
            Leg::Outbound,
            chunks(&["x"]).chain(stream::pending()),
            None,
        ));
        assert!(body.next().await.unwrap().is_ok());

        session.abort(&ProxyError::InboundSocketError(None));
        let err = body.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProxyError::SessionAborted));
    }

    #[tokio::test]
    async fn dropping_unfinished_response_is_a_hang_up() {
        let session = SessionAbortController::new(None, None);
        let body = session.guard(Leg::Outbound, chunks(&["x"]).chain(stream::pending()), None);
        drop(body);
        assert!(session.is_aborted());
    }
}
