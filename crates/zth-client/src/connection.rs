//! Persistent streaming connection with automatic reconnection.
//!
//! The manager owns a single WebSocket. A background task dials, forwards
//! inbound text frames in arrival order, and redials after a fixed delay
//! when the socket drops. Callers never see transport errors: a message can
//! only be sent while the connection is [`ConnectionState::Open`], otherwise
//! [`ConnectionError::NotReady`] tells them to use the HTTP path.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use zth_client::connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
//! use zth_store::TokenStore;
//!
//! # async fn example() {
//! let config = ConnectionConfig::new("ws://127.0.0.1:5000/ws", Duration::from_secs(2));
//! let (mut manager, mut events) = ConnectionManager::new(config, TokenStore::in_memory());
//! manager.connect();
//!
//! while let Some(event) = events.recv().await {
//!     if let ConnectionEvent::Message(raw) = event {
//!         println!("{raw}");
//!     }
//! }
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use zth_store::TokenStore;

use crate::error::ConnectionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default limit on the opening handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Public Types
// ============================================================================

/// Lifecycle of the persistent connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; a reconnection may be scheduled.
    #[default]
    Closed,
    /// Handshake in progress.
    Connecting,
    /// Ready to carry messages.
    Open,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Events delivered to the session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake completed.
    Opened,
    /// A text frame from the server.
    Message(String),
    /// An open connection was lost.
    Closed,
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Wait between a drop and the next dial.
    pub reconnect_delay: Duration,
    /// Limit on the opening handshake.
    pub handshake_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates settings with the default handshake timeout.
    #[must_use]
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum HandshakeError {
    #[error(transparent)]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid authorization header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug)]
struct Shared {
    config: ConnectionConfig,
    tokens: TokenStore,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    disposed: AtomicBool,
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<String>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }

    fn emit(&self, event: ConnectionEvent) {
        // The session may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

/// Owner of the persistent connection.
///
/// Dropping the manager disposes it.
#[derive(Debug)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Creates a manager and the receiving end of its event channel.
    ///
    /// Nothing is dialed until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        tokens: TokenStore,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            tokens,
            state_tx,
            outbound: Mutex::new(None),
            events: events_tx,
            disposed: AtomicBool::new(false),
        });
        let manager = Self {
            shared,
            state_rx,
            task: None,
        };
        (manager, events_rx)
    }

    /// Starts the connection loop.
    ///
    /// A no-op while a connection is being dialed, is open, or is waiting to
    /// redial, and after [`dispose`](Self::dispose).
    pub fn connect(&mut self) {
        if self.shared.is_disposed() {
            debug!("Ignoring connect on a disposed connection manager");
            return;
        }
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(state = %self.state(), "Connection loop already running");
            return;
        }
        info!(url = %self.shared.config.url, "Starting connection loop");
        self.task = Some(tokio::spawn(run(Arc::clone(&self.shared))));
    }

    /// Sends a text payload over the open connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::NotReady` unless the connection is open, and
    /// `ConnectionError::Disposed` after [`dispose`](Self::dispose).
    pub fn send(&self, payload: impl Into<String>) -> Result<(), ConnectionError> {
        if self.shared.is_disposed() {
            return Err(ConnectionError::Disposed);
        }
        if !self.is_ready() {
            return Err(ConnectionError::NotReady);
        }
        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outbound
            .as_ref()
            .ok_or(ConnectionError::NotReady)?
            .send(payload.into())
            .map_err(|_| ConnectionError::NotReady)
    }

    /// Cancels any pending reconnection and closes the live connection.
    ///
    /// Later calls to [`connect`](Self::connect) are ignored.
    pub fn dispose(&mut self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.set_outbound(None);
        self.shared.set_state(ConnectionState::Closed);
        info!("Connection manager disposed");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Returns `true` if a message can be sent right now.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns `true` once the manager has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// A receiver that observes state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// Connection Loop
// ============================================================================

async fn run(shared: Arc<Shared>) {
    let mut attempt: u64 = 0;
    while !shared.is_disposed() {
        attempt += 1;
        shared.set_state(ConnectionState::Connecting);
        debug!(attempt, "Dialing streaming endpoint");

        match dial(&shared).await {
            Ok(socket) => {
                attempt = 0;
                serve(&shared, socket).await;
                shared.set_outbound(None);
                shared.set_state(ConnectionState::Closed);
                if shared.is_disposed() {
                    break;
                }
                shared.emit(ConnectionEvent::Closed);
            }
            Err(e) => {
                warn!(attempt, error = %e, "Streaming connection failed");
                shared.set_state(ConnectionState::Closed);
            }
        }

        if shared.is_disposed() {
            break;
        }
        debug!(delay = ?shared.config.reconnect_delay, "Scheduling reconnection");
        tokio::time::sleep(shared.config.reconnect_delay).await;
    }
}

async fn dial(shared: &Shared) -> Result<Socket, HandshakeError> {
    let mut request = shared.config.url.as_str().into_client_request()?;
    if let Some(token) = shared.tokens.access_token() {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let timeout = shared.config.handshake_timeout;
    let (socket, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??;
    Ok(socket)
}

async fn serve(shared: &Shared, socket: Socket) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    shared.set_outbound(Some(outbound_tx));
    shared.set_state(ConnectionState::Open);
    shared.emit(ConnectionEvent::Opened);
    info!("Streaming connection open");

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(payload) = outgoing else { break };
                if let Err(e) = sink.send(Message::Text(payload)).await {
                    warn!(error = %e, "Failed to send on streaming connection");
                    break;
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        shared.emit(ConnectionEvent::Message(text));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to answer ping");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Server closed the streaming connection");
                        break;
                    }
                    Some(Ok(Message::Binary(_) | Message::Pong(_) | Message::Frame(_))) => {
                        debug!("Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Streaming connection error");
                        break;
                    }
                    None => {
                        debug!("Streaming connection ended");
                        break;
                    }
                }
            }
        }
    }
}
