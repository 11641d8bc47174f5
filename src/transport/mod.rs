//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! [`Connector`](crate::Connector) trait, exposed through constructor
//! functions and URI-driven selection via [`create_connector`].
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod tcp;

use std::time::Duration;

use crate::{ConnectorPtr, Result, RpcError};

pub use memory::{
    //
    create_memory_connector,
    global_hub,
    MemoryHub,
    MemoryListener,
    MemoryPeer,
    PeerEvent,
};

pub use tcp::{create_tcp_connector, TcpConnector, MAX_FRAME_LEN};

/// Endpoint parsed from a connection URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `memory://<name>` on the process-global hub.
    Memory(String),

    /// `tcp://<host>:<port>`.
    Tcp(String),
}

impl Endpoint {
    /// Parse a connection URI.
    ///
    /// Surrounding whitespace is ignored and the scheme is case-insensitive.
    /// A trailing `/` after the authority is dropped.
    ///
    /// # Errors
    ///
    /// - `RpcError::MissingConfig` for an empty URI
    /// - `RpcError::Transport` for a missing or unrecognized scheme, or an
    ///   empty authority
    pub fn parse(uri: &str) -> Result<Self> {
        // ---
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(RpcError::MissingConfig("uri".into()));
        }

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| RpcError::Transport(format!("uri has no scheme: {uri}")))?;

        let authority = rest.trim_end_matches('/');
        if authority.is_empty() {
            return Err(RpcError::Transport(format!("uri has no address: {uri}")));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory(authority.to_string())),
            "tcp" => {
                if !authority.contains(':') {
                    return Err(RpcError::Transport(format!(
                        "tcp uri needs host:port, got {authority}"
                    )));
                }
                Ok(Self::Tcp(authority.to_string()))
            }
            other => Err(RpcError::Transport(format!(
                "unrecognized uri scheme: {other}, valid values: memory, tcp"
            ))),
        }
    }
}

/// Create a connector for the given URI.
///
/// `connect_timeout` bounds socket establishment for transports that dial
/// out; in-process transports ignore it.
///
/// # Errors
///
/// See [`Endpoint::parse`].
pub fn create_connector(uri: &str, connect_timeout: Duration) -> Result<ConnectorPtr> {
    // ---
    match Endpoint::parse(uri)? {
        Endpoint::Memory(name) => Ok(create_memory_connector(&name)),
        Endpoint::Tcp(addr) => Ok(create_tcp_connector(&addr, connect_timeout)),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_parse_memory_and_tcp() {
        // ---
        assert_eq!(
            Endpoint::parse("  MEMORY://svc/ ").unwrap(),
            Endpoint::Memory("svc".into())
        );
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:9000").unwrap(),
            Endpoint::Tcp("127.0.0.1:9000".into())
        );
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        // ---
        assert!(matches!(Endpoint::parse(""), Err(RpcError::MissingConfig(_))));
        assert!(matches!(
            Endpoint::parse("localhost:80"),
            Err(RpcError::Transport(_))
        ));
        assert!(matches!(
            Endpoint::parse("ws://host:80"),
            Err(RpcError::Transport(_))
        ));
        assert!(matches!(
            Endpoint::parse("tcp://host"),
            Err(RpcError::Transport(_))
        ));
        assert!(matches!(
            Endpoint::parse("memory://"),
            Err(RpcError::Transport(_))
        ));
    }

    #[test]
    fn test_create_connector_endpoint() {
        // ---
        let connector = create_connector("tcp://localhost:1", Duration::from_secs(1)).unwrap();
        assert_eq!(connector.endpoint(), "tcp://localhost:1");

        let connector = create_connector("memory://x", Duration::from_secs(1)).unwrap();
        assert_eq!(connector.endpoint(), "memory://x");
    }
}
