// src/client/correlation.rs

//! Outbound messaging and reply correlation.
//!
//! `wait_for_message` and `send_and_receive` register a one-shot handler
//! and race it against a deadline and against loss of the connection that
//! was open when the wait started. Whichever finishes first wins; the
//! handler is then unregistered by identity so a newer registration for the
//! same method is left alone.
//!
//! The outbound write of a request runs under the same deadline as its
//! reply, so a transport that stops accepting writes surfaces as
//! `RpcError::Timeout`.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use super::handlers::{Handler, HandlerId};
use super::{lock_ignore_poison, Inner, Link, RpcClient};
use crate::{
    // ---
    log_debug,
    protocol,
    CorrelationId,
    Envelope,
    Result,
    RpcError,
};

impl RpcClient {
    // ---
    /// Register `f` for inbound envelopes named `method`, replacing any
    /// existing handler. Returns `&self` for chaining.
    ///
    /// Method names `"close"` and `"response_<id>"` are reserved by the
    /// protocol. Registering them is not rejected, but a `response_` handler
    /// competes with `send_and_receive`.
    pub fn on<F>(&self, method: &str, f: F) -> &Self
    where
        F: Fn(&Link, &Envelope) + Send + Sync + 'static,
    {
        self.on_handler(method, Handler::new(f))
    }

    /// Register a pre-built handler. Keep a clone to unregister it later
    /// with an identity check through [`off`](Self::off).
    pub fn on_handler(&self, method: &str, handler: Handler) -> &Self {
        // ---
        if self.inner.handlers.insert(method, handler).is_some() {
            log_debug!("replaced handler for {method:?}");
        }
        self
    }

    /// Unregister the handler for `method`.
    ///
    /// With `Some(handler)` the entry is removed only if it is that handler;
    /// with `None` it is removed unconditionally. Returns `true` if an entry
    /// was removed.
    pub fn off(&self, method: &str, handler: Option<&Handler>) -> bool {
        self.inner.handlers.remove(method, handler)
    }

    /// Send one envelope on the open connection.
    ///
    /// Never connects implicitly. Resolves once the transport accepted the
    /// write, waiting at most the configured `request_timeout`.
    ///
    /// # Errors
    ///
    /// - `RpcError::NotConnected` if the connection is not open (nothing is
    ///   written)
    /// - `RpcError::InvalidEnvelope` for an empty method
    /// - `RpcError::Send` if the transport rejects the write
    /// - `RpcError::Timeout` if the transport does not accept it in time
    pub async fn send_message(&self, method: &str, args: Value) -> Result<()> {
        // ---
        let deadline = Instant::now() + self.inner.config.request_timeout;
        self.inner.write_until(method, args, deadline).await
    }

    /// Typed variant of [`send_message`](Self::send_message).
    pub async fn send<T>(&self, method: &str, args: &T) -> Result<()>
    where
        T: Serialize,
    {
        // ---
        let args = serde_json::to_value(args)?;
        self.send_message(method, args).await
    }

    /// Wait for the next inbound envelope named `method`.
    ///
    /// `timeout` defaults to the configured `request_timeout`. A later
    /// waiter for the same method replaces this one, which then runs into
    /// its timeout.
    ///
    /// # Errors
    ///
    /// - `RpcError::Timeout` if nothing arrives in time
    /// - `RpcError::ConnectionLost` if the connection open at call time
    ///   closes first
    pub async fn wait_for_message(
        &self,
        method: &str,
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        // ---
        let deadline = Instant::now() + timeout.unwrap_or(self.inner.config.request_timeout);
        let lost = self.inner.connection_lost();
        let (handler, reply) = self.inner.register_once(method);

        let result = await_reply(reply, lost, deadline).await;
        self.inner.handlers.remove(method, Some(&handler));
        result
    }

    /// Send `method` with a fresh correlation id and wait for the peer's
    /// `response_<id>` reply. Resolves with the reply's `args`.
    ///
    /// The id is merged into `args` under `"correlation_id"`; `null` args
    /// become an object holding only the id.
    ///
    /// # Errors
    ///
    /// - `RpcError::InvalidEnvelope` if `args` is neither an object nor null
    /// - any error of [`send_message`](Self::send_message)
    /// - `RpcError::Timeout` if the write and the reply together take longer
    ///   than `timeout`
    /// - `RpcError::ConnectionLost` as for
    ///   [`wait_for_message`](Self::wait_for_message)
    pub async fn send_and_receive(
        &self,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        // ---
        let deadline = Instant::now() + timeout.unwrap_or(self.inner.config.request_timeout);
        let correlation_id = CorrelationId::generate();
        let args = protocol::inject_correlation(args, &correlation_id)?;
        let reply_method = correlation_id.response_method();

        let lost = self.inner.connection_lost();
        let (handler, reply) = self.inner.register_once(&reply_method);

        if let Err(err) = self.inner.write_until(method, args, deadline).await {
            self.inner.handlers.remove(&reply_method, Some(&handler));
            return Err(err);
        }

        let result = await_reply(reply, lost, deadline).await;
        self.inner.handlers.remove(&reply_method, Some(&handler));

        if result.is_err() {
            log_debug!("request {method:?} ({correlation_id}) got no reply");
        }
        result.map(|env| env.args)
    }

    /// Typed request/response over [`send_and_receive`](Self::send_and_receive).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use serde::{Deserialize, Serialize};
    /// # use sock_rpc::RpcClient;
    ///
    /// #[derive(Serialize)]
    /// struct AddRequest { a: i32, b: i32 }
    ///
    /// #[derive(Deserialize)]
    /// struct AddResponse { sum: i32 }
    ///
    /// # async fn example(client: RpcClient) -> sock_rpc::Result<()> {
    /// let resp: AddResponse = client
    ///     .request("add", &AddRequest { a: 1, b: 2 }, None)
    ///     .await?;
    /// assert_eq!(resp.sum, 3);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// As for `send_and_receive`, plus `RpcError::Serialization` if `req`
    /// cannot be serialized or the reply does not match `TResp`.
    pub async fn request<TReq, TResp>(
        &self,
        method: &str,
        req: &TReq,
        timeout: Option<Duration>,
    ) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let args = serde_json::to_value(req)?;
        let reply = self.send_and_receive(method, args, timeout).await?;
        Ok(serde_json::from_value(reply)?)
    }
}

impl Inner {
    // ---
    /// Write one envelope on the open connection, giving up at `deadline`.
    async fn write_until(&self, method: &str, args: Value, deadline: Instant) -> Result<()> {
        // ---
        let Some(connection) = self.open_connection() else {
            return Err(RpcError::NotConnected);
        };

        let frame = protocol::encode(&Envelope::new(method, args))?;
        log_debug!("sending {method:?} ({} bytes)", frame.len());

        match time::timeout_at(deadline, connection.send(frame)).await {
            Ok(result) => result,
            Err(_) => {
                log_debug!("transport did not accept {method:?} before the deadline");
                Err(RpcError::Timeout)
            }
        }
    }

    /// Register a handler that fires at most once, unregisters itself and
    /// forwards the envelope.
    fn register_once(self: &Arc<Self>, method: &str) -> (Handler, oneshot::Receiver<Envelope>) {
        // ---
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let id = HandlerId::next();
        let inner = Arc::downgrade(self);
        let key = method.to_string();

        let handler = Handler::from_parts(id, move |_link, env| {
            if let Some(inner) = inner.upgrade() {
                inner.handlers.remove_id(&key, id);
            }
            if let Some(tx) = lock_ignore_poison(&tx).take() {
                let _ = tx.send(env.clone());
            }
        });

        self.handlers.insert(method, handler.clone());
        (handler, rx)
    }
}

/// First of reply, connection loss, or the deadline.
async fn await_reply(
    reply: oneshot::Receiver<Envelope>,
    lost: impl Future<Output = ()>,
    deadline: Instant,
) -> Result<Envelope> {
    // ---
    // A dropped sender means the handler was replaced; keep waiting so the
    // timer decides.
    let reply = async move {
        match reply.await {
            Ok(env) => env,
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;

        env = reply => Ok(env),
        _ = lost => Err(RpcError::ConnectionLost),
        _ = time::sleep_until(deadline) => Err(RpcError::Timeout),
    }
}
