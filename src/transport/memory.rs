//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`Connector`] / [`Connection`] traits. It is intended primarily for
//! testing, local execution, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - A [`MemoryConnector`] connects to the [`MemoryListener`] bound under the
//!   same name on a [`MemoryHub`]. With no listener bound, `connect()` fails.
//! - Each successful connect hands the listener a [`MemoryPeer`], the remote
//!   end of the link.
//! - Frames are delivered in send order, in both directions.
//! - Closing from either end marks the link closed for both, delivers exactly
//!   one `Close` event to the client and one [`PeerEvent::Closed`] to the peer.
//! - Dropping a [`MemoryPeer`] without closing reports
//!   [`CloseCode::ABNORMAL`] to the client, after any frames still queued.
//!
//! ## Non-Goals
//!
//! This transport does not emulate network latency, partial writes or any
//! particular socket library. It exists to provide a deterministic baseline
//! against which the client's behavior can be validated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::{
    // ---
    log_debug,
    protocol,
    CloseCode,
    Connection,
    ConnectorPtr,
    Envelope,
    Result,
    RpcError,
    TransportEvent,
    TransportLink,
};

use crate::domain::Connector;

const CHANNEL_CAPACITY: usize = 64;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Registry of named in-process listeners.
///
/// Simulates a network of endpoints within a single process. Integration
/// tests construct their own hub for isolation; `memory://` URIs resolve
/// against a process-global hub (see [`global_hub`]).
pub struct MemoryHub {
    // ---
    listeners: Mutex<HashMap<String, mpsc::Sender<MemoryPeer>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind a listener under `name`, replacing any previous binding.
    pub fn listen(self: &Arc<Self>, name: impl Into<String>) -> MemoryListener {
        // ---
        let name = name.into();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        log_debug!("memory hub: listening on {name}");
        lock_ignore_poison(&self.listeners).insert(name.clone(), tx.clone());

        MemoryListener {
            name,
            hub: Arc::clone(self),
            accept_tx: tx,
            incoming: rx,
        }
    }

    /// Build a connector targeting the listener bound under `name`.
    pub fn connector(self: &Arc<Self>, name: impl Into<String>) -> ConnectorPtr {
        // ---
        let name = name.into();
        Arc::new(MemoryConnector {
            endpoint: format!("memory://{name}"),
            name,
            hub: Arc::clone(self),
        })
    }

    fn lookup(&self, name: &str) -> Option<mpsc::Sender<MemoryPeer>> {
        lock_ignore_poison(&self.listeners).get(name).cloned()
    }

    fn unbind(&self, name: &str, accept_tx: &mpsc::Sender<MemoryPeer>) {
        // ---
        let mut listeners = lock_ignore_poison(&self.listeners);
        if let Some(current) = listeners.get(name) {
            // a newer listen() under the same name keeps its binding
            if current.same_channel(accept_tx) {
                listeners.remove(name);
            }
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

/// Process-global hub used for `memory://` URIs.
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

/// The hub `memory://<name>` URIs resolve against.
pub fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// Accepting end of a named in-memory endpoint.
///
/// Dropping the listener unbinds its name; later connects fail until
/// something listens again.
pub struct MemoryListener {
    // ---
    name: String,
    hub: Arc<MemoryHub>,
    accept_tx: mpsc::Sender<MemoryPeer>,
    incoming: mpsc::Receiver<MemoryPeer>,
}

impl MemoryListener {
    // ---
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Return an already pending connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.try_recv().ok()
    }

    /// Name this listener is bound under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.hub.unbind(&self.name, &self.accept_tx);
    }
}

/// Event observed by the remote end of an in-memory link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A frame written by the client.
    Frame(Bytes),

    /// The client closed the link.
    Closed { code: CloseCode, reason: String },
}

/// Remote end of an in-memory link, as seen by a listener.
pub struct MemoryPeer {
    // ---
    to_client: mpsc::Sender<TransportEvent>,
    from_client: mpsc::Receiver<PeerEvent>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    // ---
    /// Deliver a raw frame to the client.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Send` if the link is closed.
    pub async fn send_frame(&self, frame: Bytes) -> Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Send("memory link closed".into()));
        }

        self.to_client
            .send(TransportEvent::Message(frame))
            .await
            .map_err(|_| RpcError::Send("client end dropped".into()))
    }

    /// Encode and deliver an envelope to the client.
    pub async fn send(&self, env: &Envelope) -> Result<()> {
        self.send_frame(protocol::encode(env)?).await
    }

    /// Report a non-fatal transport error to the client.
    pub async fn error(&self, message: impl Into<String>) {
        let _ = self
            .to_client
            .send(TransportEvent::Error(message.into()))
            .await;
    }

    /// Close the link from the remote side with the given code.
    ///
    /// A no-op if the link is already closed.
    pub async fn close(&self, code: CloseCode, reason: &str) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self
            .to_client
            .send(TransportEvent::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    /// Next event from the client, or `None` once the client end is gone.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.from_client.recv().await
    }

    /// Next frame from the client decoded as an envelope.
    ///
    /// Returns `None` if the client closed or sent an undecodable frame.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        // ---
        match self.recv().await? {
            PeerEvent::Frame(frame) => protocol::decode(&frame).ok(),
            PeerEvent::Closed { .. } => None,
        }
    }

    /// Returns `true` once either end closed the link.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryPeer {
    // A peer dropped without closing looks like a lost connection. The close
    // queues behind any undelivered frames.
    fn drop(&mut self) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let event = TransportEvent::Close {
            code: CloseCode::ABNORMAL,
            reason: "memory peer dropped".to_string(),
        };

        match self.to_client.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let to_client = self.to_client.clone();
                    handle.spawn(async move {
                        let _ = to_client.send(event).await;
                    });
                }
                Err(_) => log_debug!("memory peer dropped outside a runtime; close not delivered"),
            },
        }
    }
}

/// Client end of an in-memory link.
struct MemoryConnection {
    // ---
    to_peer: mpsc::Sender<PeerEvent>,
    to_self: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    // ---
    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Send("memory link closed".into()));
        }

        self.to_peer
            .send(PeerEvent::Frame(frame))
            .await
            .map_err(|_| RpcError::Send("peer end dropped".into()))
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self
            .to_peer
            .send(PeerEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;

        // The transport reports its own closure to the client.
        let _ = self
            .to_self
            .send(TransportEvent::Close {
                code,
                reason: reason.to_string(),
            })
            .await;

        Ok(())
    }
}

/// Connector resolving a name on a [`MemoryHub`].
struct MemoryConnector {
    // ---
    name: String,
    endpoint: String,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    // ---
    async fn connect(&self) -> Result<TransportLink> {
        // ---
        let accept_tx = self
            .hub
            .lookup(&self.name)
            .ok_or_else(|| RpcError::Connect(format!("no listener at {}", self.endpoint)))?;

        let (to_client, events) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_peer, from_client) = mpsc::channel(CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MemoryPeer {
            to_client: to_client.clone(),
            from_client,
            closed: Arc::clone(&closed),
        };

        accept_tx
            .send(peer)
            .await
            .map_err(|_| RpcError::Connect(format!("{} stopped accepting", self.endpoint)))?;

        log_debug!("{}: memory link established", self.endpoint);

        Ok(TransportLink {
            connection: Arc::new(MemoryConnection {
                to_peer,
                to_self: to_client,
                closed,
            }),
            events,
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Create a connector for `memory://<name>` on the process-global hub.
pub fn create_memory_connector(name: &str) -> ConnectorPtr {
    global_hub().connector(name)
}
