// src/client/lifecycle.rs

//! Connection lifecycle transition table.
//!
//! [`Lifecycle`] holds the connection state, the reconnect counter and the
//! attempt/epoch numbers used to discard stale work. It performs no I/O and
//! owns no timers: the supervisor feeds it transport outcomes and acts on the
//! [`Next`] it returns.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──opened──▶ Open ──close()──▶ Closing ──closed──▶ Closed
//!                        │                   │
//!                        └──failed──▶ Closed ◀┘ unsolicited close
//!                                       │
//!                                       └── Next::Reconnect while budget remains
//! ```

use std::time::Duration;

use crate::{CloseCode, ReconnectConfig};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The transport is open.
    Open,
    /// `close()`/`force_close()` was requested; waiting for the transport.
    Closing,
    /// The transport is closed (a reconnect may be scheduled).
    Closed,
}

/// Who started a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOrigin {
    Caller,
    Reconnect,
}

/// What the supervisor must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// Nothing further.
    Stay,

    /// Unsolicited close with the reconnect budget used up.
    Exhausted,

    /// Sleep `delay`, then start reconnect number `attempt` if `epoch` is
    /// still current.
    Reconnect {
        attempt: u32,
        delay: Duration,
        epoch: u64,
    },
}

/// Result of asking to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Begin {
    /// A new attempt with this id must be driven by the caller.
    Started(u64),
    /// An attempt is already in flight.
    Joined(u64),
    /// Already open.
    AlreadyOpen,
    /// A close is in progress; retry once it settles.
    Closing,
    /// A scheduled reconnect was cancelled or superseded.
    Cancelled,
}

/// Result of asking to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseStart {
    /// The open transport must be closed.
    WasOpen,
    /// An in-flight connect attempt was abandoned.
    Abandoned(u64),
    /// Nothing to close.
    NotOpen,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    // ---
    state: ConnectionState,
    policy: ReconnectConfig,
    reconnect_attempts: u32,
    origin: AttemptOrigin,
    attempt: u64,
    reconnect_epoch: u64,
}

impl Lifecycle {
    // ---
    pub(crate) fn new(policy: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            reconnect_attempts: 0,
            origin: AttemptOrigin::Caller,
            attempt: 0,
            reconnect_epoch: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Caller-initiated connect. Cancels any scheduled reconnect.
    pub(crate) fn begin_connect(&mut self) -> Begin {
        // ---
        match self.state {
            ConnectionState::Open => Begin::AlreadyOpen,
            ConnectionState::Connecting => Begin::Joined(self.attempt),
            ConnectionState::Closing => Begin::Closing,
            ConnectionState::Idle | ConnectionState::Closed => {
                self.reconnect_epoch += 1;
                Begin::Started(self.start(AttemptOrigin::Caller))
            }
        }
    }

    /// Reconnect fired by a timer scheduled under `epoch`.
    pub(crate) fn begin_reconnect(&mut self, epoch: u64) -> Begin {
        // ---
        if epoch != self.reconnect_epoch || self.state != ConnectionState::Closed {
            return Begin::Cancelled;
        }
        Begin::Started(self.start(AttemptOrigin::Reconnect))
    }

    fn start(&mut self, origin: AttemptOrigin) -> u64 {
        self.attempt += 1;
        self.origin = origin;
        self.state = ConnectionState::Connecting;
        self.attempt
    }

    /// The transport for `attempt` opened. Returns `false` if the attempt is
    /// stale and its transport must be discarded.
    pub(crate) fn opened(&mut self, attempt: u64) -> bool {
        // ---
        if self.state != ConnectionState::Connecting || attempt != self.attempt {
            return false;
        }
        self.state = ConnectionState::Open;
        self.reconnect_attempts = 0;
        true
    }

    /// The transport for `attempt` failed to establish. Returns `None` if the
    /// attempt is stale.
    ///
    /// Failed caller attempts never schedule reconnects. A failed reconnect
    /// attempt counts as another unsolicited close.
    pub(crate) fn connect_failed(&mut self, attempt: u64) -> Option<Next> {
        // ---
        if self.state != ConnectionState::Connecting || attempt != self.attempt {
            return None;
        }
        self.state = ConnectionState::Closed;

        match self.origin {
            AttemptOrigin::Caller => Some(Next::Stay),
            AttemptOrigin::Reconnect => Some(self.schedule()),
        }
    }

    /// `close()`/`force_close()` was called. Always cancels scheduled reconnects.
    pub(crate) fn begin_close(&mut self) -> CloseStart {
        // ---
        self.reconnect_epoch += 1;

        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                CloseStart::WasOpen
            }
            ConnectionState::Connecting => {
                let abandoned = self.attempt;
                // bump so the in-flight attempt is recognised as stale
                self.attempt += 1;
                self.state = ConnectionState::Closed;
                CloseStart::Abandoned(abandoned)
            }
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                CloseStart::NotOpen
            }
        }
    }

    /// The open (or closing) transport reported closure with `code`.
    pub(crate) fn closed(&mut self, code: CloseCode) -> Next {
        // ---
        let solicited = self.state == ConnectionState::Closing || code.is_normal();
        self.state = ConnectionState::Closed;

        if solicited {
            Next::Stay
        } else {
            self.schedule()
        }
    }

    fn schedule(&mut self) -> Next {
        // ---
        if self.reconnect_attempts >= self.policy.max_attempts {
            return Next::Exhausted;
        }

        self.reconnect_attempts += 1;
        Next::Reconnect {
            attempt: self.reconnect_attempts,
            delay: self.policy.delay,
            epoch: self.reconnect_epoch,
        }
    }
}
