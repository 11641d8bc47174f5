// tests/lifecycle.rs
//
// Connection supervision over the memory transport: connect joining,
// close semantics and the reconnect policy. Timer-driven scenarios run on
// tokio's paused clock.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::{timeout, Instant};

use common::{
    init_logging, record_lifecycle, CountingConnector, Lifecycle, StallConnector,
    StalledWriteConnector,
};
use sock_rpc::{
    // ---
    ClientBuilder,
    CloseCode,
    ConnectionState,
    Link,
    MemoryHub,
    PeerEvent,
    Result,
    RpcError,
    CLOSE_METHOD,
};

#[tokio::test]
async fn test_concurrent_connects_create_one_transport() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));

    let client = ClientBuilder::new().connector(connector.clone()).build()?;

    let (a, b, c) = tokio::join!(client.connect(), client.connect(), client.ready());
    a?;
    b?;
    c?;

    assert_eq!(connector.attempts(), 1);
    assert!(client.is_connected());
    assert!(listener.try_accept().is_some());
    assert!(listener.try_accept().is_none());

    // already open: resolves without a new transport
    client.connect().await?;
    assert_eq!(connector.attempts(), 1);

    Ok(())
}

#[tokio::test]
async fn test_connect_without_listener_fails_and_stays_closed() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let connector = CountingConnector::new(hub.connector("nobody"));
    let client = ClientBuilder::new()
        .connector(connector.clone())
        .build()
        .unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, RpcError::Connect(_)), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Closed);

    // a failed caller connect never schedules reconnects
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_close_sends_envelope_and_does_not_reconnect() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));
    let (builder, mut events) = record_lifecycle(ClientBuilder::new().connector(connector.clone()));
    let client = builder.build()?;

    client.connect().await?;
    let mut peer = listener.accept().await.expect("peer");
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    client.close(CloseCode::NORMAL, "bye").await?;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(events.recv().await, Some(Lifecycle::Disconnected));

    let notice = peer.recv_envelope().await.expect("close envelope");
    assert_eq!(notice.method, CLOSE_METHOD);
    assert_eq!(notice.args, json!({"code": 1000, "reason": "bye"}));
    assert_eq!(
        peer.recv().await,
        Some(PeerEvent::Closed {
            code: CloseCode::NORMAL,
            reason: "bye".into()
        })
    );

    // closing again is a no-op
    client.close(CloseCode::NORMAL, "bye").await?;
    assert_eq!(connector.attempts(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_solicited_close_with_error_code_is_not_retried() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));
    let client = ClientBuilder::new().connector(connector.clone()).build()?;

    client.connect().await?;
    let mut peer = listener.accept().await.expect("peer");

    client.force_close(CloseCode(4000), "shutting down").await?;

    // force_close skips the close envelope
    assert!(matches!(peer.recv().await, Some(PeerEvent::Closed { .. })));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(client.state(), ConnectionState::Closed);

    Ok(())
}

#[tokio::test]
async fn test_close_when_idle_resolves_immediately() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let client = ClientBuilder::new().connector(hub.connector("svc")).build()?;

    client.close(CloseCode::NORMAL, "nothing open").await?;
    client.force_close(CloseCode::NORMAL, "nothing open").await?;
    assert_eq!(client.state(), ConnectionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_close_abandons_connect_attempt() -> Result<()> {
    // ---
    init_logging();

    let client = ClientBuilder::new()
        .connector(Arc::new(StallConnector))
        .build()?;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });

    while client.state() != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }

    client.force_close(CloseCode::NORMAL, "never mind").await?;

    let result = pending.await.expect("connect task panicked");
    assert!(matches!(result, Err(RpcError::Connect(_))), "got {result:?}");
    assert_eq!(client.state(), ConnectionState::Closed);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_close_reconnects_after_delay() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));
    let (builder, mut events) = record_lifecycle(ClientBuilder::new().connector(connector.clone()));
    let client = builder.build()?;

    client.connect().await?;
    let peer = listener.accept().await.expect("peer");
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    peer.close(CloseCode::ABNORMAL, "server crashed").await;

    assert_eq!(events.recv().await, Some(Lifecycle::Disconnected));
    let dropped_at = Instant::now();
    assert!(!client.is_connected());
    assert_eq!(client.reconnect_attempts(), 1);

    assert_eq!(events.recv().await, Some(Lifecycle::Connected));
    let waited = dropped_at.elapsed();
    assert!(waited >= Duration::from_millis(3000), "reconnected after {waited:?}");
    assert!(waited < Duration::from_millis(3100), "reconnected after {waited:?}");

    assert!(client.is_connected());
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(connector.attempts(), 2);
    assert!(listener.accept().await.is_some());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_by_peer_is_not_retried() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));
    let (builder, mut events) = record_lifecycle(ClientBuilder::new().connector(connector.clone()));
    let client = builder.build()?;

    client.connect().await?;
    let peer = listener.accept().await.expect("peer");
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    peer.close(CloseCode::NORMAL, "goodbye").await;
    assert_eq!(events.recv().await, Some(Lifecycle::Disconnected));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(events.try_recv().is_err());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_ceiling_is_five() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));
    let (builder, mut events) = record_lifecycle(ClientBuilder::new().connector(connector.clone()));
    let client = builder.build()?;

    client.connect().await?;
    let peer = listener.accept().await.expect("peer");
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    // every reconnect attempt from here on fails
    drop(listener);
    drop(peer);
    assert_eq!(events.recv().await, Some(Lifecycle::Disconnected));

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts(), 1 + 5);
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(events.try_recv().is_err());

    // no sixth attempt, however long we wait
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.attempts(), 6);

    // an explicit connect resumes
    let mut listener = hub.listen("svc");
    client.connect().await?;
    assert!(client.is_connected());
    assert_eq!(client.reconnect_attempts(), 0);
    assert!(listener.accept().await.is_some());
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_cancels_scheduled_reconnect() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let connector = CountingConnector::new(hub.connector("svc"));
    let client = ClientBuilder::new().connector(connector.clone()).build()?;

    client.connect().await?;
    let peer = listener.accept().await.expect("peer");
    peer.close(CloseCode::ABNORMAL, "blip").await;

    while client.state() != ConnectionState::Closed {
        tokio::task::yield_now().await;
    }

    // reconnect is due in 3s; connect now instead
    client.connect().await?;
    assert_eq!(connector.attempts(), 2);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(client.is_connected());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_link_from_old_connection_is_stale() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let mut listener = hub.listen("svc");
    let (builder, mut events) = record_lifecycle(ClientBuilder::new().connector(hub.connector("svc")));
    let client = builder.build()?;

    let captured: Arc<Mutex<Option<Link>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    client.on("hello", move |link, _env| {
        *slot.lock().unwrap() = Some(link.clone());
    });

    client.connect().await?;
    let peer = listener.accept().await.expect("peer");
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    peer.send(&sock_rpc::Envelope::new("hello", json!(null))).await?;
    let link = loop {
        if let Some(link) = captured.lock().unwrap().clone() {
            break link;
        }
        tokio::task::yield_now().await;
    };
    assert!(link.is_current());
    let first_generation = link.generation();

    peer.close(CloseCode::ABNORMAL, "drop").await;
    assert_eq!(events.recv().await, Some(Lifecycle::Disconnected));
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));
    let _peer = listener.accept().await.expect("second peer");

    assert!(!link.is_current());
    let result = link.send_message("late", json!({})).await;
    assert!(matches!(result, Err(RpcError::StaleConnection)), "got {result:?}");

    // the client itself moved on to a new generation
    client.send_message("fresh", json!({})).await?;
    assert_ne!(first_generation, 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_close_on_stalled_transport_finishes_locally() -> Result<()> {
    // ---
    init_logging();

    let connector = StalledWriteConnector::new();
    let (builder, mut events) = record_lifecycle(
        ClientBuilder::new()
            .connector(connector.clone())
            .close_timeout(Duration::from_secs(2)),
    );
    let client = builder.build()?;

    client.connect().await?;
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    // neither the close envelope nor the transport close ever completes
    let started = Instant::now();
    timeout(Duration::from_secs(60), client.close(CloseCode::NORMAL, "bye"))
        .await
        .expect("close must not outlive close_timeout")?;

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2), "closed after {waited:?}");
    assert!(waited < Duration::from_secs(3), "closed after {waited:?}");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(events.recv().await, Some(Lifecycle::Disconnected));

    // the client is not stuck in Closing
    client.connect().await?;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(events.recv().await, Some(Lifecycle::Connected));

    timeout(Duration::from_secs(60), client.force_close(CloseCode::NORMAL, "again"))
        .await
        .expect("force_close must not outlive close_timeout")?;
    assert_eq!(client.state(), ConnectionState::Closed);

    // solicited closes are never retried
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 2);

    Ok(())
}
