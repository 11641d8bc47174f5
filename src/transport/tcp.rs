//! TCP transport implementation.
//!
//! Frames are newline-delimited: each envelope is written as one line of
//! compact JSON followed by `\n`. Compact JSON never contains a raw newline,
//! so line boundaries are frame boundaries.
//!
//! ## Concurrency model
//!
//! - A writer task owns the write half and serializes outbound frames, so
//!   writes complete in call order.
//! - A reader task owns the read half and forwards each line as a
//!   [`TransportEvent::Message`].
//!
//! ## Close codes
//!
//! TCP has no close handshake. A closure requested through
//! [`Connection::close`] is reported with the requested code once the peer
//! finishes the stream; any other end of stream or read error is reported as
//! [`CloseCode::ABNORMAL`].
//!
//! A line longer than the connector's frame limit is a read error: the
//! reader emits [`TransportEvent::Error`], stops and reports an abnormal
//! close.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::domain::Connector;
use crate::{
    // ---
    log_debug,
    log_warn,
    CloseCode,
    Connection,
    ConnectorPtr,
    Result,
    RpcError,
    TransportEvent,
    TransportLink,
};

const CHANNEL_CAPACITY: usize = 64;

/// Default upper bound on one inbound line, newline excluded.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

type LocalClose = Arc<Mutex<Option<(CloseCode, String)>>>;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

enum Outbound {
    // ---
    Frame {
        frame: Bytes,
        resp: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

struct TcpConnection {
    // ---
    cmd_tx: mpsc::Sender<Outbound>,
    local_close: LocalClose,
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
    // ---
    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        if frame.contains(&b'\n') {
            return Err(RpcError::Send("frame contains a newline".into()));
        }

        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Outbound::Frame { frame, resp })
            .await
            .map_err(|_| RpcError::Send("connection closed".into()))?;

        rx.await
            .map_err(|_| RpcError::Send("writer stopped".into()))?
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        // ---
        {
            let mut local = lock_ignore_poison(&self.local_close);
            if local.is_some() {
                return Ok(());
            }
            *local = Some((code, reason.to_string()));
        }

        // writer may already be gone if the peer dropped us
        let _ = self.cmd_tx.send(Outbound::Shutdown).await;
        Ok(())
    }
}

async fn run_writer(mut write_half: OwnedWriteHalf, mut cmd_rx: mpsc::Receiver<Outbound>) {
    // ---
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Outbound::Frame { frame, resp } => {
                let result = write_frame(&mut write_half, &frame).await;
                let _ = resp.send(result);
            }
            Outbound::Shutdown => {
                if let Err(_err) = write_half.shutdown().await {
                    log_debug!("tcp shutdown failed: {_err}");
                }
                break;
            }
        }
    }
}

async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &[u8]) -> Result<()> {
    // ---
    let io = async {
        write_half.write_all(frame).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await
    };

    io.await.map_err(|err| RpcError::Send(err.to_string()))
}

async fn run_reader(
    read_half: OwnedReadHalf,
    event_tx: mpsc::Sender<TransportEvent>,
    local_close: LocalClose,
    max_frame_len: usize,
) {
    // ---
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    let mut failure: Option<String> = None;

    // room for the frame plus its newline
    let limit = max_frame_len as u64 + 1;

    loop {
        line.clear();
        match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(n) if n as u64 == limit && line.last() != Some(&b'\n') => {
                let err = format!("inbound frame exceeds {max_frame_len} bytes");
                log_warn!("tcp read failed: {err}");
                let _ = event_tx.send(TransportEvent::Error(err.clone())).await;
                failure = Some(err);
                break;
            }
            Ok(_) => {
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                if line.is_empty() {
                    continue;
                }

                let frame = Bytes::copy_from_slice(&line);
                if event_tx.send(TransportEvent::Message(frame)).await.is_err() {
                    // client side dropped the link
                    return;
                }
            }
            Err(err) => {
                log_warn!("tcp read failed: {err}");
                let _ = event_tx.send(TransportEvent::Error(err.to_string())).await;
                failure = Some(err.to_string());
                break;
            }
        }
    }

    let local = lock_ignore_poison(&local_close).clone();
    let (code, reason) = match (local, failure) {
        (Some(local), _) => local,
        (None, Some(err)) => (CloseCode::ABNORMAL, err),
        (None, None) => (CloseCode::ABNORMAL, "connection closed by peer".to_string()),
    };

    let _ = event_tx.send(TransportEvent::Close { code, reason }).await;
}

/// Connector for `tcp://host:port` endpoints.
pub struct TcpConnector {
    // ---
    addr: String,
    endpoint: String,
    connect_timeout: Duration,
    max_frame_len: usize,
}

impl TcpConnector {
    /// Create a connector for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        // ---
        let addr = addr.into();
        Self {
            endpoint: format!("tcp://{addr}"),
            addr,
            connect_timeout,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Cap the length of one inbound frame (default [`MAX_FRAME_LEN`]).
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    // ---
    async fn connect(&self) -> Result<TransportLink> {
        // ---
        let stream = time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| RpcError::Connect(format!("{}: connect timed out", self.endpoint)))?
            .map_err(|err| RpcError::Connect(format!("{}: {err}", self.endpoint)))?;

        if let Err(_err) = stream.set_nodelay(true) {
            log_debug!("{}: set_nodelay failed: {_err}", self.endpoint);
        }

        let (read_half, write_half) = stream.into_split();
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let local_close: LocalClose = Arc::new(Mutex::new(None));

        tokio::spawn(run_writer(write_half, cmd_rx));
        tokio::spawn(run_reader(
            read_half,
            event_tx,
            Arc::clone(&local_close),
            self.max_frame_len,
        ));

        log_debug!("{}: tcp link established", self.endpoint);

        Ok(TransportLink {
            connection: Arc::new(TcpConnection {
                cmd_tx,
                local_close,
            }),
            events,
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Create a connector for a `host:port` address.
pub fn create_tcp_connector(addr: &str, connect_timeout: Duration) -> ConnectorPtr {
    Arc::new(TcpConnector::new(addr, connect_timeout))
}
