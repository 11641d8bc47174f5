// tests/common/mod.rs
//
// Shared harness for the integration tests. Each test binary uses a subset.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use sock_rpc::{
    // ---
    ClientBuilder,
    CloseCode,
    Connection,
    Connector,
    ConnectorPtr,
    Result,
    TransportEvent,
    TransportLink,
};

/// Lifecycle callback observed by a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connected,
    Disconnected,
}

/// Wrap `builder` so every lifecycle callback lands on the returned channel.
pub fn record_lifecycle(
    builder: ClientBuilder,
) -> (ClientBuilder, mpsc::UnboundedReceiver<Lifecycle>) {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    let on_down = tx.clone();

    let builder = builder
        .on_connected(move |_| {
            let _ = tx.send(Lifecycle::Connected);
        })
        .on_disconnected(move |_| {
            let _ = on_down.send(Lifecycle::Disconnected);
        });

    (builder, rx)
}

/// Connector that counts how many transports it was asked for.
pub struct CountingConnector {
    // ---
    inner: ConnectorPtr,
    attempts: AtomicUsize,
}

impl CountingConnector {
    // ---
    pub fn new(inner: ConnectorPtr) -> Arc<Self> {
        Arc::new(Self {
            inner,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for CountingConnector {
    // ---
    async fn connect(&self) -> Result<TransportLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.connect().await
    }

    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }
}

/// Connector whose attempts never complete.
pub struct StallConnector;

#[async_trait::async_trait]
impl Connector for StallConnector {
    // ---
    async fn connect(&self) -> Result<TransportLink> {
        std::future::pending().await
    }

    fn endpoint(&self) -> &str {
        "memory://stall"
    }
}

/// Connector whose links open but never accept a write or finish a close,
/// like a socket whose peer stopped reading.
pub struct StalledWriteConnector {
    // ---
    attempts: AtomicUsize,
}

impl StalledWriteConnector {
    // ---
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for StalledWriteConnector {
    // ---
    async fn connect(&self) -> Result<TransportLink> {
        // ---
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events) = mpsc::channel(8);

        Ok(TransportLink {
            connection: Arc::new(StalledConnection {
                _events_tx: events_tx,
            }),
            events,
        })
    }

    fn endpoint(&self) -> &str {
        "memory://stalled"
    }
}

struct StalledConnection {
    // keeps the event stream open
    _events_tx: mpsc::Sender<TransportEvent>,
}

#[async_trait::async_trait]
impl Connection for StalledConnection {
    // ---
    async fn send(&self, _frame: Bytes) -> Result<()> {
        std::future::pending().await
    }

    async fn close(&self, _code: CloseCode, _reason: &str) -> Result<()> {
        std::future::pending().await
    }
}

/// Poll `fut` once so it runs up to its first suspension point.
///
/// Used to make sure a waiter has registered its handler before the peer
/// sends.
pub async fn poll_once<F>(fut: &mut F)
where
    F: Future + Unpin,
{
    // ---
    tokio::select! {
        biased;
        _ = fut => panic!("future completed before the peer acted"),
        _ = tokio::task::yield_now() => {}
    }
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
