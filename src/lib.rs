//! Named JSON messages over a reconnecting socket connection.
//!
//! This library provides a client endpoint that exchanges `{method, args}`
//! envelopes with a remote peer. It handles handler dispatch, reply
//! correlation, timeouts and automatic reconnection after unsolicited
//! disconnects.
//!
//! # Example
//!
//! ```no_run
//! use sock_rpc::{ClientBuilder, CloseCode};
//! use serde_json::json;
//!
//! # async fn example() -> sock_rpc::Result<()> {
//! let client = ClientBuilder::new()
//!     .uri("tcp://127.0.0.1:7000")
//!     .client_id("client-01")
//!     .build()?;
//!
//! client.ready().await?;
//! client.on("notice", |_link, env| println!("notice: {}", env.args));
//!
//! let reply = client
//!     .send_and_receive("add", json!({"a": 1, "b": 2}), None)
//!     .await?;
//! assert_eq!(reply["sum"], 3);
//!
//! client.close(CloseCode::NORMAL, "done").await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod client;
mod domain;
mod transport;

mod client_builder;
mod client_config;

mod correlation;
mod error;

pub mod protocol;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{
    //
    ConnectionState,
    Handler,
    HandlerId,
    LifecycleCallback,
    Link,
    RpcClient,
};

pub use client_builder::ClientBuilder;
pub use client_config::{ClientConfig, ReconnectConfig};

pub use correlation::{CorrelationId, CORRELATION_FIELD, RESPONSE_PREFIX};
pub use error::{Result, RpcError};

pub use protocol::{Envelope, CLOSE_METHOD};

// --- transport re-exports
pub use transport::{
    //
    create_connector,
    create_memory_connector,
    create_tcp_connector,
    global_hub,
    Endpoint,
    MemoryHub,
    MemoryListener,
    MemoryPeer,
    PeerEvent,
    TcpConnector,
    MAX_FRAME_LEN,
};

// --- public re-exports
pub use domain::{
    //
    CloseCode,
    Connection,
    ConnectionPtr,
    Connector,
    ConnectorPtr,
    TransportEvent,
    TransportLink,
};
