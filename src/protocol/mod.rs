//! Wire protocol for the client.
//!
//! This module defines the `{method, args}` envelope exchanged over the
//! transport and the codec converting it to and from JSON frames.

mod envelope;

pub use envelope::{decode, encode, inject_correlation, Envelope, CLOSE_METHOD};
