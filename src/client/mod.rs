// src/client/mod.rs
//! Client endpoint.
//!
//! This module contains [`RpcClient`], which exchanges named JSON envelopes
//! with a remote peer over a single reconnecting transport.
//!
//! # Architecture
//!
//! - The supervisor (`supervisor.rs`) owns the current connection and drives
//!   the [`ConnectionState`] machine, including automatic reconnects.
//! - Each open connection gets a reader task that decodes inbound frames
//!   and dispatches them to the handler table (`dispatch.rs`).
//! - The correlation layer (`correlation.rs`) builds `wait_for_message` and
//!   `send_and_receive` from one-shot handlers raced against a timer and
//!   against connection loss.
//!
//! # Concurrency
//!
//! Shared state sits behind `std::sync::Mutex`. Every critical section is a
//! few field updates; no lock is held across `.await` or while a handler or
//! lifecycle callback runs.

mod correlation;
mod dispatch;
mod handlers;
mod lifecycle;
mod supervisor;

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tokio::time;

use crate::{
    // ---
    create_connector,
    protocol,
    ClientConfig,
    ConnectionPtr,
    ConnectorPtr,
    Envelope,
    Result,
    RpcError,
};

use handlers::HandlerTable;
use supervisor::{LinkState, Status};

pub use handlers::{Handler, HandlerId};
pub use lifecycle::ConnectionState;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Handlers and lifecycle callbacks never run under these locks, so a
/// poisoned lock can only come from a panic between two plain field
/// updates. The protected state stays usable.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Callback run on connection lifecycle changes.
pub type LifecycleCallback = Arc<dyn Fn(&RpcClient) + Send + Sync>;

#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub(crate) on_connected: Option<LifecycleCallback>,
    pub(crate) on_disconnected: Option<LifecycleCallback>,
}

/// Client endpoint for one remote peer.
///
/// Cheap to clone (internally `Arc`-backed); clones share the connection,
/// the handler table and the lifecycle callbacks.
///
/// # Example
///
/// ```no_run
/// use sock_rpc::{ClientConfig, RpcClient};
/// use serde_json::json;
///
/// # async fn example() -> sock_rpc::Result<()> {
/// let client = RpcClient::new(ClientConfig::new("tcp://127.0.0.1:7000", "client-01"))?;
/// client.connect().await?;
///
/// client.on("tick", |_link, env| println!("tick: {}", env.args));
///
/// let sum = client
///     .send_and_receive("add", json!({"a": 1, "b": 2}), None)
///     .await?;
/// println!("sum = {}", sum["sum"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    // ---
    config: ClientConfig,
    connector: ConnectorPtr,
    handlers: HandlerTable,
    link: Mutex<LinkState>,
    status: watch::Sender<Status>,
    callbacks: Callbacks,
}

impl Drop for Inner {
    fn drop(&mut self) {
        lock_ignore_poison(&self.link).abort_reader();
    }
}

impl RpcClient {
    // ---
    /// Create a client for `config.uri`.
    ///
    /// No connection is made until [`connect`](Self::connect) or
    /// [`ready`](Self::ready) is called.
    ///
    /// # Errors
    ///
    /// - `RpcError::ConfigConflict` for a zero timeout
    /// - `RpcError::MissingConfig` / `RpcError::Transport` for an unusable URI
    pub fn new(config: ClientConfig) -> Result<Self> {
        // ---
        config.validate()?;
        let connector = create_connector(&config.uri, config.connect_timeout)?;
        Ok(Self::from_parts(config, connector, Callbacks::default()))
    }

    /// Create a client with an explicitly provided connector.
    ///
    /// `config.uri` is ignored. This is the constructor you want for tests
    /// and for custom transports.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::ConfigConflict` for a zero timeout.
    pub fn with_connector(connector: ConnectorPtr, config: ClientConfig) -> Result<Self> {
        // ---
        config.validate()?;
        Ok(Self::from_parts(config, connector, Callbacks::default()))
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        connector: ConnectorPtr,
        callbacks: Callbacks,
    ) -> Self {
        // ---
        let (status, _) = watch::channel(Status::default());
        let link = Mutex::new(LinkState::new(config.reconnect.clone()));

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                handlers: HandlerTable::new(),
                link,
                status,
                callbacks,
            }),
        }
    }

    /// Identifier this client was configured with.
    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// Endpoint of the underlying connector, e.g. `"memory://svc"`.
    pub fn endpoint(&self) -> &str {
        self.inner.connector.endpoint()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

/// Handle to the connection a frame arrived on.
///
/// Passed to every handler. A `Link` stays bound to the connection it was
/// created for: once that connection closes, sends through it fail with
/// `RpcError::StaleConnection` even if the client has since reconnected.
#[derive(Clone)]
pub struct Link {
    // ---
    generation: u64,
    connection: ConnectionPtr,
    client: Weak<Inner>,
}

impl Link {
    // ---
    pub(crate) fn new(generation: u64, connection: ConnectionPtr, client: Weak<Inner>) -> Self {
        Self {
            generation,
            connection,
            client,
        }
    }

    /// Connection generation this link belongs to. Every successful open
    /// gets a new generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` while the link's connection is the client's current one.
    pub fn is_current(&self) -> bool {
        self.client
            .upgrade()
            .is_some_and(|inner| inner.is_current(self.generation))
    }

    /// The client this link belongs to, if it still exists.
    pub fn client(&self) -> Option<RpcClient> {
        self.client.upgrade().map(|inner| RpcClient { inner })
    }

    /// Send an envelope on this link's connection.
    ///
    /// # Errors
    ///
    /// - `RpcError::StaleConnection` if the connection is no longer current
    /// - `RpcError::InvalidEnvelope` for an empty method
    /// - `RpcError::Send` if the transport rejects the write
    /// - `RpcError::Timeout` if the write is not accepted within the
    ///   client's `request_timeout`
    pub async fn send_message(&self, method: &str, args: Value) -> Result<()> {
        // ---
        let limit = match self.client.upgrade() {
            Some(inner) if inner.is_current(self.generation) => inner.config.request_timeout,
            _ => return Err(RpcError::StaleConnection),
        };

        let frame = protocol::encode(&Envelope::new(method, args))?;
        time::timeout(limit, self.connection.send(frame))
            .await
            .map_err(|_| RpcError::Timeout)?
    }
}
