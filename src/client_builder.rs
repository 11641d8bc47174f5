//! RPC client builder.
//!
//! Provides a fluent builder API for configuring [`RpcClient`] instances
//! with reconnect and timeout settings and lifecycle callbacks.

use std::sync::Arc;
use std::time::Duration;

use crate::client::Callbacks;
use crate::{
    // ---
    create_connector,
    ClientConfig,
    ConnectorPtr,
    ReconnectConfig,
    Result,
    RpcClient,
    RpcError,
};

/// Builder for creating RPC client instances.
///
/// Takes either a URI or an explicit connector, plus optional reconnect
/// policy, timeouts and lifecycle callbacks.
///
/// # Examples
///
/// ## Client over TCP
/// ```no_run
/// use sock_rpc::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> sock_rpc::Result<()> {
/// let client = ClientBuilder::new()
///     .uri("tcp://127.0.0.1:7000")
///     .client_id("client-01")
///     .reconnect_max_attempts(10)
///     .reconnect_delay(Duration::from_millis(500))
///     .request_timeout(Duration::from_secs(5))
///     .on_connected(|c| println!("{} connected", c.client_id()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// ## Client on an in-process hub
/// ```
/// use sock_rpc::{ClientBuilder, MemoryHub};
///
/// # fn example() -> sock_rpc::Result<()> {
/// let hub = MemoryHub::new();
/// let _listener = hub.listen("svc");
///
/// let client = ClientBuilder::new()
///     .connector(hub.connector("svc"))
///     .build()?;
/// assert_eq!(client.endpoint(), "memory://svc");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    // ---
    uri: Option<String>,
    client_id: Option<String>,
    connector: Option<ConnectorPtr>,

    // Reconnect policy (all optional)
    reconnect_max_attempts: Option<u32>,
    reconnect_delay: Option<Duration>,

    // Timeouts (optional, defaults from ClientConfig)
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    close_timeout: Option<Duration>,

    callbacks: Callbacks,
}

impl ClientBuilder {
    /// Create a new, empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        // ---
        Self {
            uri: Some(config.uri),
            client_id: Some(config.client_id),
            reconnect_max_attempts: Some(config.reconnect.max_attempts),
            reconnect_delay: Some(config.reconnect.delay),
            request_timeout: Some(config.request_timeout),
            connect_timeout: Some(config.connect_timeout),
            close_timeout: Some(config.close_timeout),
            ..Self::default()
        }
    }

    /// Set the connection URI (`tcp://host:port` or `memory://name`).
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the client identifier used in logs.
    ///
    /// Default: `"client"`.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Use an explicit connector. Takes precedence over [`uri`](Self::uri).
    pub fn connector(mut self, connector: ConnectorPtr) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the reconnect ceiling. `0` disables automatic reconnects.
    ///
    /// Default: 5.
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = Some(attempts);
        self
    }

    /// Set the fixed delay before each reconnect attempt.
    ///
    /// Default: 3s.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Set the default deadline for correlated waits.
    ///
    /// Default: 30s.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the transport establishment deadline.
    ///
    /// Default: 10s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set how long `close()` waits for the transport to report closure.
    ///
    /// Default: 5s.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Run `f` after every successful open, reconnects included.
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn(&RpcClient) + Send + Sync + 'static,
    {
        self.callbacks.on_connected = Some(Arc::new(f));
        self
    }

    /// Run `f` after every close of an open connection, before any
    /// reconnect is scheduled.
    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn(&RpcClient) + Send + Sync + 'static,
    {
        self.callbacks.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Build the client (consumes self).
    ///
    /// # Errors
    ///
    /// - `RpcError::MissingConfig` if neither a URI nor a connector was set
    /// - `RpcError::ConfigConflict` for a zero timeout
    /// - `RpcError::Transport` for an unusable URI
    pub fn build(self) -> Result<RpcClient> {
        // ---
        let uri = match (&self.uri, &self.connector) {
            (Some(uri), _) => uri.clone(),
            (None, Some(connector)) => connector.endpoint().to_string(),
            (None, None) => return Err(RpcError::MissingConfig("uri".into())),
        };

        let defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            max_attempts: self
                .reconnect_max_attempts
                .unwrap_or(defaults.max_attempts),
            delay: self.reconnect_delay.unwrap_or(defaults.delay),
        };

        let mut config = ClientConfig::new(uri, self.client_id.unwrap_or_else(|| "client".into()))
            .with_reconnect(reconnect);
        if let Some(timeout) = self.request_timeout {
            config = config.with_request_timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        if let Some(timeout) = self.close_timeout {
            config = config.with_close_timeout(timeout);
        }
        config.validate()?;

        // explicit connector wins over the uri
        let connector = match self.connector {
            Some(connector) => connector,
            None => create_connector(&config.uri, config.connect_timeout)?,
        };

        Ok(RpcClient::from_parts(config, connector, self.callbacks))
    }
}
