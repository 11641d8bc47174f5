// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the contract between the connection supervisor and a
//! concrete socket implementation. It intentionally avoids any reference to
//! envelopes, handlers or correlation; the transport moves opaque frames.
//!
//! A transport must:
//! - deliver inbound frames in the order the peer sent them,
//! - report closure exactly once through a [`TransportEvent::Close`], or by
//!   ending the event stream (treated as an abnormal close),
//! - accept `send()` only while open.
//!
//! Concrete implementations live under `src/transport/`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Close code carried by a transport closure.
///
/// Follows the WebSocket convention: [`CloseCode::NORMAL`] marks a polite,
/// intended shutdown and suppresses auto-reconnect. Every other code is
/// treated as an unsolicited close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: CloseCode = CloseCode(1000);

    /// The endpoint is going away (server shutdown, page navigation).
    pub const GOING_AWAY: CloseCode = CloseCode(1001);

    /// The connection dropped without a close handshake.
    pub const ABNORMAL: CloseCode = CloseCode(1006);

    /// Returns `true` for the normal-closure code.
    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event reported by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound frame.
    Message(Bytes),

    /// A non-fatal transport error. Closure, if any, follows as `Close`.
    Error(String),

    /// The transport closed. No further events follow.
    Close { code: CloseCode, reason: String },
}

/// Write side of an open transport.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    // ---
    /// Write one frame.
    ///
    /// Resolves once the transport accepted the write, not once the peer
    /// processed it.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Request closure. The transport reports completion through a
    /// [`TransportEvent::Close`] on its event stream.
    async fn close(&self, code: CloseCode, reason: &str) -> Result<()>;
}

/// Shared connection pointer.
pub type ConnectionPtr = Arc<dyn Connection>;

/// An open transport: its write handle and its ordered event stream.
pub struct TransportLink {
    // ---
    /// Write side.
    pub connection: ConnectionPtr,

    /// Inbound events in delivery order.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for transports.
///
/// `connect()` resolving `Ok` is the transport's "open" event. Failing to
/// establish, or being rejected by the peer, is an `Err`.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    // ---
    /// Open a new transport.
    async fn connect(&self) -> Result<TransportLink>;

    /// Human readable endpoint, used for logging.
    fn endpoint(&self) -> &str;
}

/// Shared connector pointer.
pub type ConnectorPtr = Arc<dyn Connector>;
