//! Transport contract between the client and a concrete socket.
//!
//! A [`Connector`] opens a [`TransportLink`]: a write handle plus an
//! ordered stream of [`TransportEvent`]s. The client depends only on these
//! types; `memory://` and `tcp://` implementations live in `transport`.

mod transport;

// --- Transport domain re-exports ---

pub use transport::{
    //
    CloseCode,
    Connection,
    ConnectionPtr,
    Connector,
    ConnectorPtr,
    TransportEvent,
    TransportLink,
};
