//! Public, transport-agnostic client configuration.
//!
//! Transport layers interpret `uri` into a concrete connector; everything
//! else configures the connection supervisor and the correlation layer.

use std::time::Duration;

use crate::{Result, RpcError};

/// Automatic reconnect policy.
///
/// Reconnects are triggered only by unsolicited closes. The delay is fixed:
/// no exponential growth and no jitter.
///
/// # Example
///
/// ```
/// use sock_rpc::ReconnectConfig;
/// use std::time::Duration;
///
/// let reconnect = ReconnectConfig {
///     max_attempts: 10,
///     delay: Duration::from_millis(500),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Reconnect attempts allowed between two successful opens (0 disables).
    pub max_attempts: u32,

    /// Wait before each reconnect attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    /// - `max_attempts`: 5
    /// - `delay`: 3s
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectConfig {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Client configuration and connection parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ---
    /// Connection URI, e.g. `"tcp://127.0.0.1:7000"` or `"memory://svc"`.
    ///
    /// Ignored when the client is built with an explicit connector.
    pub uri: String,

    /// Identifier for this client instance, used for logging.
    pub client_id: String,

    /// Automatic reconnect policy.
    pub reconnect: ReconnectConfig,

    /// Default deadline for `wait_for_message()` and `send_and_receive()`.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Deadline for establishing the transport.
    ///
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// How long `close()` waits for the transport to report closure.
    ///
    /// Default: 5 seconds
    pub close_timeout: Duration,
}

impl ClientConfig {
    /// Create a config for the given URI with default timeouts and policy.
    pub fn new(uri: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client_id: client_id.into(),
            reconnect: ReconnectConfig::default(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }

    /// Create a config for an in-process `memory://<name>` endpoint.
    pub fn memory(name: &str, client_id: impl Into<String>) -> Self {
        Self::new(format!("memory://{name}"), client_id)
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the default correlated-wait deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the transport establishment deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how long `close()` waits for closure.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Check the configuration for values the client cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::ConfigConflict` if any timeout is zero.
    pub fn validate(&self) -> Result<()> {
        // ---
        let timeouts = [
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("close_timeout", self.close_timeout),
        ];

        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(RpcError::ConfigConflict(format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }
}
