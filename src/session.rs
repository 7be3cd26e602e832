// THEORY:
// A `SessionHandle` is one explicitly owned transport connection. Whoever
// mounts a live view opens one and is the only party that can close it; there
// is no process-wide socket for two views to fight over.
//
// Key properties:
// 1.  **Status as a signal**: the status (Connecting, Open, Closed, Errored)
//     lives in a `watch` channel. Consumers observe it; only the session task
//     and `close()` write it.
// 2.  **Close is synchronous and idempotent**: `close()` flips a shared
//     liveness flag before anything else. From that instant every message of
//     this session, even one already sitting in the engine's queue, is stale.
//     A second `close()` changes nothing and reports `false`.
// 3.  **Reconnection is policy, not accident**: after a drop the task consults
//     the `ReconnectPolicy`. The default never reconnects.
// 4.  **No leaks on teardown**: dropping the handle closes the session.
//
// All lifecycle changes and messages flow to the engine as `Envelope`s on one
// unbounded queue, so the engine sees them in arrival order.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::core_modules::demux::InboundMessage;
use crate::error::FeedError;

const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Makes ring the process TLS provider for `wss://` endpoints. Later calls,
/// or a provider installed by the embedding application, win silently.
fn install_tls_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Open,
    Closed,
    Errored { reason: String },
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored { .. })
    }
}

/// Shared "has this session been told to close" flag.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Marks the session closed. Returns `true` only for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened,
    Message(InboundMessage),
    Closed,
    Errored(String),
}

/// One item on the engine's queue.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub session: SessionId,
    pub liveness: Liveness,
    pub event: SessionEvent,
}

pub type EventSender = mpsc::UnboundedSender<Envelope>;

pub struct SessionHandle {
    id: SessionId,
    endpoint: String,
    status: Arc<watch::Sender<SessionStatus>>,
    liveness: Liveness,
    cancel: CancellationToken,
    events: EventSender,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Starts connecting to `endpoint` in the background. Must be called from
    /// inside a tokio runtime.
    pub fn open(endpoint: impl Into<String>, policy: ReconnectPolicy, events: EventSender) -> Self {
        install_tls_provider();
        let id = SessionId::next();
        let endpoint = endpoint.into();
        let (status_tx, _) = watch::channel(SessionStatus::Connecting);
        let status = Arc::new(status_tx);
        let liveness = Liveness::default();
        let cancel = CancellationToken::new();

        info!(session = %id, endpoint = %endpoint, "opening stream session");
        let ctx = SessionTask {
            id,
            endpoint: endpoint.clone(),
            policy,
            status: status.clone(),
            liveness: liveness.clone(),
            cancel: cancel.clone(),
            events: events.clone(),
        };
        let task = tokio::spawn(ctx.run());

        Self {
            id,
            endpoint,
            status,
            liveness,
            cancel,
            events,
            task: Some(task),
        }
    }

    /// Closes the session. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if !self.liveness.mark_closed() {
            return false;
        }
        self.cancel.cancel();
        self.status.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = SessionStatus::Closed;
            true
        });
        let _ = self.events.send(Envelope {
            session: self.id,
            liveness: self.liveness.clone(),
            event: SessionEvent::Closed,
        });
        info!(session = %self.id, "stream session closed by owner");
        true
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.liveness.is_closed()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Waits for the background task to finish (after a close, or after a
    /// drop the policy does not retry).
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(session = %self.id, error = %err, "session task ended abnormally");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

enum Outcome {
    Cancelled,
    Closed,
    Errored(String),
}

struct SessionTask {
    id: SessionId,
    endpoint: String,
    policy: ReconnectPolicy,
    status: Arc<watch::Sender<SessionStatus>>,
    liveness: Liveness,
    cancel: CancellationToken,
    events: EventSender,
}

impl SessionTask {
    async fn run(self) {
        let mut failures = 0u32;
        loop {
            self.transition(SessionStatus::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = connect_async(self.endpoint.as_str()) => result,
            };

            let outcome = match connected {
                Ok((socket, _response)) => {
                    failures = 0;
                    info!(session = %self.id, "stream connected");
                    self.transition(SessionStatus::Open);
                    self.emit(SessionEvent::Opened);
                    self.pump(socket).await
                }
                Err(err) => Outcome::Errored(FeedError::from(err).to_string()),
            };

            match outcome {
                Outcome::Cancelled => return,
                Outcome::Closed => {
                    info!(session = %self.id, "stream closed by peer");
                    self.transition(SessionStatus::Closed);
                    self.emit(SessionEvent::Closed);
                }
                Outcome::Errored(reason) => {
                    warn!(session = %self.id, %reason, "stream transport failed");
                    self.transition(SessionStatus::Errored { reason: reason.clone() });
                    self.emit(SessionEvent::Errored(reason));
                }
            }

            failures += 1;
            let Some(delay) = self.policy.delay().filter(|_| self.policy.allows(failures)) else {
                debug!(session = %self.id, failures, "not reconnecting");
                return;
            };
            info!(session = %self.id, attempt = failures, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump(&self, socket: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Outcome {
        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let goodbye = async {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                    };
                    let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, goodbye).await;
                    return Outcome::Cancelled;
                }
                next = stream.next() => match next {
                    Some(Ok(Message::Binary(data))) => {
                        self.emit(SessionEvent::Message(InboundMessage::Binary(Bytes::from(data))));
                    }
                    Some(Ok(Message::Text(text))) => {
                        self.emit(SessionEvent::Message(InboundMessage::Text(text)));
                    }
                    Some(Ok(Message::Close(_))) | None => return Outcome::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Outcome::Errored(FeedError::from(err).to_string()),
                }
            }
        }
    }

    fn transition(&self, next: SessionStatus) {
        let liveness = &self.liveness;
        self.status.send_if_modified(|current| {
            if liveness.is_closed() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn emit(&self, event: SessionEvent) {
        if self.liveness.is_closed() {
            return;
        }
        let _ = self.events.send(Envelope {
            session: self.id,
            liveness: self.liveness.clone(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An address nothing listens on.
    async fn refused_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/ws")
    }

    fn count_errored(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> usize {
        let mut errored = 0;
        while let Ok(env) = rx.try_recv() {
            if matches!(env.event, SessionEvent::Errored(_)) {
                errored += 1;
            }
        }
        errored
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionHandle::open(refused_endpoint().await, ReconnectPolicy::Disabled, tx);
        let mut status = session.watch_status();

        assert!(session.close());
        let after_first = session.status();
        assert!(after_first.is_terminal());
        status.mark_unchanged();

        assert!(!session.close());
        assert!(!status.has_changed().unwrap_or(false));
        assert_eq!(session.status(), after_first);
        session.join().await;

        let mut closed_events = 0;
        while let Ok(env) = rx.try_recv() {
            if env.event == SessionEvent::Closed {
                closed_events += 1;
            }
        }
        assert_eq!(closed_events, 1);
    }

    #[tokio::test]
    async fn refused_connection_is_errored_without_retry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = SessionHandle::open(refused_endpoint().await, ReconnectPolicy::Disabled, tx);
        session.join().await;
        match session.status() {
            SessionStatus::Errored { reason } => assert!(reason.starts_with("transport error")),
            other => panic!("expected errored, got {other:?}"),
        }
        let env = rx.recv().await.expect("errored envelope");
        assert!(matches!(env.event, SessionEvent::Errored(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fixed_policy_stops_after_max_attempts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::Fixed {
            delay: Duration::from_millis(10),
            max_attempts: Some(2),
        };
        let mut session = SessionHandle::open(refused_endpoint().await, policy, tx);
        tokio::time::timeout(Duration::from_secs(5), session.join())
            .await
            .expect("session gave up in time");

        // The first attempt plus two retries.
        assert_eq!(count_errored(&mut rx), 3);
        assert!(matches!(session.status(), SessionStatus::Errored { .. }));
    }

    #[tokio::test]
    async fn close_cancels_a_pending_retry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::Fixed {
            delay: Duration::from_secs(10),
            max_attempts: None,
        };
        let mut session = SessionHandle::open(refused_endpoint().await, policy, tx);

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first attempt in time")
            .expect("errored envelope");
        assert!(matches!(first.event, SessionEvent::Errored(_)));

        // The task is now sleeping before its next attempt.
        assert!(session.close());
        tokio::time::timeout(Duration::from_secs(1), session.join())
            .await
            .expect("close interrupts the retry delay");
        assert!(session.status().is_terminal());
        assert_eq!(count_errored(&mut rx), 0);
    }

    #[test]
    fn tls_provider_is_available_for_secure_endpoints() {
        install_tls_provider();
        install_tls_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::next(), SessionId::next());
    }
}
