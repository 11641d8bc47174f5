// src/client/supervisor.rs

//! Connection supervision.
//!
//! Owns the current transport, applies [`Lifecycle`] transitions and runs
//! the side effects they call for: spawning connect attempts, the per
//! connection reader task, lifecycle callbacks and reconnect timers.
//!
//! Connect attempts are driven by spawned tasks so that dropping a
//! `connect()` future never strands the client in `Connecting`. Concurrent
//! callers share one attempt through a per-attempt outcome channel.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use super::dispatch;
use super::lifecycle::{Begin, CloseStart, ConnectionState, Lifecycle, Next};
use super::{lock_ignore_poison, Inner, LifecycleCallback, Link, RpcClient};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    protocol,
    CloseCode,
    ConnectionPtr,
    Envelope,
    ReconnectConfig,
    Result,
    RpcError,
    TransportEvent,
    TransportLink,
    CLOSE_METHOD,
};

/// Outcome of one connect attempt, shared by everyone waiting on it.
type AttemptOutcome = std::result::Result<(), String>;
type AttemptSlot = watch::Sender<Option<AttemptOutcome>>;

const ABANDONED: &str = "connection attempt abandoned";

/// Snapshot published on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Status {
    pub(crate) state: ConnectionState,
    pub(crate) generation: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
        }
    }
}

pub(crate) struct LinkState {
    // ---
    lifecycle: Lifecycle,

    /// Open (or closing) connection and the generation it belongs to.
    connection: Option<ConnectionPtr>,
    generation: u64,

    /// Outcome channel of the in-flight connect attempt.
    attempt: Option<(u64, AttemptSlot)>,

    reader: Option<JoinHandle<()>>,
}

impl LinkState {
    // ---
    pub(crate) fn new(policy: ReconnectConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(policy),
            connection: None,
            generation: 0,
            attempt: None,
            reader: None,
        }
    }

    pub(crate) fn abort_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn settle_attempt(&mut self, outcome: AttemptOutcome) {
        if let Some((_, slot)) = self.attempt.take() {
            slot.send_replace(Some(outcome));
        }
    }
}

enum ConnectStep {
    Wait(watch::Receiver<Option<AttemptOutcome>>),
    Settle,
}

impl RpcClient {
    // ---
    /// Open the transport.
    ///
    /// Resolves once the connection is open. While an attempt is already in
    /// flight this joins it instead of creating a second transport; while
    /// open it resolves immediately. An explicit `connect()` also cancels
    /// any scheduled automatic reconnect and resets nothing else.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Connect` if the transport fails to establish,
    /// times out, or the attempt is abandoned by `close()`/`force_close()`.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Wait until the client is usable, connecting if necessary.
    ///
    /// Resolves at once when open, joins an in-flight attempt, and
    /// otherwise starts [`connect`](Self::connect).
    pub async fn ready(&self) -> Result<()> {
        // ---
        if self.is_connected() {
            return Ok(());
        }
        self.inner.connect().await
    }

    /// Close the connection politely.
    ///
    /// Sends `{"method": "close", "args": {"code", "reason"}}`, asks the
    /// transport to close and waits (bounded by `close_timeout`) until the
    /// closure is observed. No automatic reconnect follows. Resolves at once
    /// when not open; abandons an in-flight connect attempt.
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.inner.shutdown(code, reason, true).await
    }

    /// Close the connection without sending the close envelope.
    pub async fn force_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.inner.shutdown(code, reason, false).await
    }

    pub fn state(&self) -> ConnectionState {
        lock_ignore_poison(&self.inner.link).lifecycle.state()
    }

    /// Returns `true` while the transport is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Automatic reconnects attempted since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        lock_ignore_poison(&self.inner.link)
            .lifecycle
            .reconnect_attempts()
    }
}

impl Inner {
    // ---
    fn publish(&self, st: &LinkState) {
        self.status.send_replace(Status {
            state: st.lifecycle.state(),
            generation: st.generation,
        });
    }

    /// The open connection, if any.
    pub(crate) fn open_connection(&self) -> Option<ConnectionPtr> {
        // ---
        let st = lock_ignore_poison(&self.link);
        if st.lifecycle.state() != ConnectionState::Open {
            return None;
        }
        st.connection.clone()
    }

    /// Returns `true` if `generation` still owns the client's connection.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let st = lock_ignore_poison(&self.link);
        st.connection.is_some() && st.generation == generation
    }

    /// Future resolving once the currently open connection goes away.
    ///
    /// Never resolves if nothing is open right now.
    pub(crate) fn connection_lost(&self) -> impl Future<Output = ()> + Send + 'static {
        // ---
        let mut status = self.status.subscribe();
        let watched = {
            let current = status.borrow();
            (current.state == ConnectionState::Open).then_some(current.generation)
        };

        async move {
            match watched {
                Some(generation) => {
                    let _ = status
                        .wait_for(|s| s.state != ConnectionState::Open || s.generation != generation)
                        .await;
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        // ---
        loop {
            let step = {
                let mut st = lock_ignore_poison(&self.link);
                match st.lifecycle.begin_connect() {
                    Begin::AlreadyOpen => return Ok(()),
                    Begin::Started(attempt) => {
                        log_info!(
                            "{}: connecting to {}",
                            self.config.client_id,
                            self.connector.endpoint()
                        );
                        let outcome = self.open_attempt(&mut st, attempt);
                        tokio::spawn(Arc::clone(self).drive_attempt(attempt));
                        ConnectStep::Wait(outcome)
                    }
                    Begin::Joined(_) => match &st.attempt {
                        Some((_, slot)) => ConnectStep::Wait(slot.subscribe()),
                        None => ConnectStep::Settle,
                    },
                    Begin::Closing | Begin::Cancelled => ConnectStep::Settle,
                }
            };

            match step {
                ConnectStep::Wait(outcome) => return wait_outcome(outcome).await,
                ConnectStep::Settle => self.settle().await?,
            }
        }
    }

    /// Wait until no attempt or close is in progress.
    async fn settle(&self) -> Result<()> {
        // ---
        let mut status = self.status.subscribe();
        status
            .wait_for(|s| {
                !matches!(
                    s.state,
                    ConnectionState::Connecting | ConnectionState::Closing
                )
            })
            .await
            .map(|_| ())
            .map_err(|_| RpcError::Connect("client shut down".into()))
    }

    fn open_attempt(
        &self,
        st: &mut LinkState,
        attempt: u64,
    ) -> watch::Receiver<Option<AttemptOutcome>> {
        // ---
        let (slot, outcome) = watch::channel(None);
        st.attempt = Some((attempt, slot));
        self.publish(st);
        outcome
    }

    async fn drive_attempt(self: Arc<Self>, attempt: u64) {
        // ---
        let result = time::timeout(self.config.connect_timeout, self.connector.connect())
            .await
            .unwrap_or_else(|_| Err(RpcError::Connect("connect timed out".into())));

        match result {
            Ok(link) => self.attach(attempt, link),
            Err(err) => self.attempt_failed(attempt, err),
        }
    }

    fn attach(self: &Arc<Self>, attempt: u64, link: TransportLink) {
        // ---
        let TransportLink { connection, events } = link;

        let opened = {
            let mut st = lock_ignore_poison(&self.link);
            let opened = st.lifecycle.opened(attempt);
            if opened {
                st.generation = attempt;
                st.connection = Some(Arc::clone(&connection));
                self.publish(&st);
            }
            opened
        };

        if !opened {
            log_debug!("{}: discarding transport of attempt {attempt}", self.config.client_id);
            tokio::spawn(async move {
                let _ = connection.close(CloseCode::NORMAL, ABANDONED).await;
            });
            return;
        }

        log_info!(
            "{}: connected to {} (generation {attempt})",
            self.config.client_id,
            self.connector.endpoint()
        );
        self.notify(self.callbacks.on_connected.as_ref());

        // The reader starts after on_connected so callbacks observe
        // connect before any disconnect.
        let reader = tokio::spawn(run_reader(
            Arc::downgrade(self),
            attempt,
            connection,
            events,
        ));

        let mut st = lock_ignore_poison(&self.link);
        if st.generation == attempt && st.connection.is_some() {
            st.reader = Some(reader);
        }
        if st.attempt.as_ref().is_some_and(|(id, _)| *id == attempt) {
            st.settle_attempt(Ok(()));
        }
    }

    fn attempt_failed(self: &Arc<Self>, attempt: u64, err: RpcError) {
        // ---
        let reason = match err {
            RpcError::Connect(reason) => reason,
            other => other.to_string(),
        };

        let next = {
            let mut st = lock_ignore_poison(&self.link);
            let Some(next) = st.lifecycle.connect_failed(attempt) else {
                log_debug!("{}: abandoned attempt {attempt} failed: {reason}", self.config.client_id);
                return;
            };
            self.publish(&st);
            st.settle_attempt(Err(reason.clone()));
            next
        };

        log_warn!("{}: connect attempt failed: {reason}", self.config.client_id);
        self.apply(next);
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: CloseCode, _reason: &str) {
        // ---
        let next = {
            let mut st = lock_ignore_poison(&self.link);
            if st.generation != generation || st.connection.is_none() {
                return;
            }
            st.connection = None;
            st.reader = None;
            let next = st.lifecycle.closed(code);
            self.publish(&st);
            next
        };

        log_info!(
            "{}: disconnected (code {code}, reason {_reason:?})",
            self.config.client_id
        );

        self.notify(self.callbacks.on_disconnected.as_ref());
        self.apply(next);
    }

    fn apply(self: &Arc<Self>, next: Next) {
        // ---
        match next {
            Next::Stay => {}
            Next::Exhausted => {
                log_error!(
                    "{}: giving up after {} reconnect attempts",
                    self.config.client_id,
                    self.config.reconnect.max_attempts
                );
            }
            Next::Reconnect {
                attempt: _attempt,
                delay,
                epoch,
            } => {
                log_info!(
                    "{}: reconnect {_attempt}/{} in {delay:?}",
                    self.config.client_id,
                    self.config.reconnect.max_attempts
                );

                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.reconnect(epoch).await;
                    }
                });
            }
        }
    }

    async fn reconnect(self: Arc<Self>, epoch: u64) {
        // ---
        let started = {
            let mut st = lock_ignore_poison(&self.link);
            match st.lifecycle.begin_reconnect(epoch) {
                Begin::Started(attempt) => {
                    // joiners subscribe through the slot
                    drop(self.open_attempt(&mut st, attempt));
                    Some(attempt)
                }
                _ => None,
            }
        };

        match started {
            Some(attempt) => {
                log_info!(
                    "{}: reconnecting to {}",
                    self.config.client_id,
                    self.connector.endpoint()
                );
                self.drive_attempt(attempt).await;
            }
            None => log_debug!("{}: scheduled reconnect cancelled", self.config.client_id),
        }
    }

    async fn shutdown(self: &Arc<Self>, code: CloseCode, reason: &str, polite: bool) -> Result<()> {
        // ---
        let target = {
            let mut st = lock_ignore_poison(&self.link);
            match st.lifecycle.begin_close() {
                CloseStart::WasOpen => {
                    self.publish(&st);
                    let generation = st.generation;
                    st.connection
                        .clone()
                        .map(|connection| (generation, connection))
                }
                CloseStart::Abandoned(_attempt) => {
                    log_info!(
                        "{}: abandoning connect attempt {_attempt}",
                        self.config.client_id
                    );
                    self.publish(&st);
                    st.settle_attempt(Err(ABANDONED.into()));
                    None
                }
                CloseStart::NotOpen => None,
            }
        };

        let Some((generation, connection)) = target else {
            return Ok(());
        };

        log_info!(
            "{}: closing (code {code}, reason {reason:?})",
            self.config.client_id
        );

        // Runs detached so a dropped close() future cannot leave the client
        // stuck in Closing.
        let closing = tokio::spawn(Arc::clone(self).finish_close(
            generation,
            connection,
            code,
            reason.to_string(),
            polite,
        ));

        closing
            .await
            .map_err(|err| RpcError::Transport(format!("close task failed: {err}")))
    }

    async fn finish_close(
        self: Arc<Self>,
        generation: u64,
        connection: ConnectionPtr,
        code: CloseCode,
        reason: String,
        polite: bool,
    ) {
        // ---
        let deadline = time::Instant::now() + self.config.close_timeout;

        let requested = time::timeout_at(deadline, async {
            if polite {
                let env = Envelope::new(CLOSE_METHOD, json!({"code": code.0, "reason": reason}));
                match protocol::encode(&env) {
                    Ok(frame) => {
                        if let Err(_err) = connection.send(frame).await {
                            log_debug!("close envelope not delivered: {_err}");
                        }
                    }
                    Err(_err) => log_warn!("close envelope not encodable: {_err}"),
                }
            }

            if let Err(_err) = connection.close(code, &reason).await {
                log_warn!("transport close failed: {_err}");
            }
        })
        .await
        .is_ok();

        let mut status = self.status.subscribe();
        let observed = requested
            && matches!(
                time::timeout_at(
                    deadline,
                    status.wait_for(|s| {
                        s.state != ConnectionState::Closing || s.generation != generation
                    }),
                )
                .await,
                Ok(Ok(_))
            );

        if !observed {
            log_warn!(
                "{}: transport did not report closure within {:?}, closing locally",
                self.config.client_id,
                self.config.close_timeout
            );
            {
                let mut st = lock_ignore_poison(&self.link);
                if st.generation == generation {
                    st.abort_reader();
                }
            }
            self.handle_close(generation, code, &reason);
        }
    }

    fn notify(self: &Arc<Self>, callback: Option<&LifecycleCallback>) {
        // ---
        let Some(callback) = callback else {
            return;
        };

        let client = RpcClient {
            inner: Arc::clone(self),
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&client))).is_err() {
            log_warn!("{}: lifecycle callback panicked", self.config.client_id);
        }
    }
}

async fn wait_outcome(mut outcome: watch::Receiver<Option<AttemptOutcome>>) -> Result<()> {
    // ---
    let settled = match outcome.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };

    match settled {
        Some(Ok(())) => Ok(()),
        Some(Err(reason)) => Err(RpcError::Connect(reason)),
        None => Err(RpcError::Connect(ABANDONED.into())),
    }
}

async fn run_reader(
    inner: Weak<Inner>,
    generation: u64,
    connection: ConnectionPtr,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    // ---
    let link = Link::new(generation, connection, inner.clone());

    let (code, reason) = loop {
        match events.recv().await {
            Some(TransportEvent::Message(frame)) => {
                let Some(client) = inner.upgrade() else {
                    return;
                };
                if !client.is_current(generation) {
                    log_debug!("dropping frame from stale generation {generation}");
                    continue;
                }
                dispatch::dispatch(&client.handlers, &link, &frame);
            }
            Some(TransportEvent::Error(_err)) => {
                log_warn!("transport error (generation {generation}): {_err}");
            }
            Some(TransportEvent::Close { code, reason }) => break (code, reason),
            None => {
                break (
                    CloseCode::ABNORMAL,
                    "transport event stream ended".to_string(),
                )
            }
        }
    };

    if let Some(client) = inner.upgrade() {
        client.handle_close(generation, code, &reason);
    }
}
