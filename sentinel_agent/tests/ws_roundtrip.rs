//! End-to-end: WebSocket requests against a router backed by the in-memory host.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sentinel_agent::fake::InMemoryProbe;
use sentinel_agent::proto::Reply;
use sentinel_agent::state::AppState;
use sentinel_agent::ws::router;
use sentinel_agent::{ServiceOptions, TelemetryService};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_agent() -> (String, Arc<InMemoryProbe>) {
    let probe = Arc::new(InMemoryProbe::new(4 * 1024 * 1024 * 1024, 2));
    probe.update(|h| {
        h.used_memory_bytes = 1024 * 1024 * 1024;
        h.uptime_seconds = 42;
    });
    probe.add_process(1, "init", 1);
    probe.add_process(4242, "worker", 2);
    let options = ServiceOptions {
        grace: Duration::from_millis(50),
        grace_poll: Duration::from_millis(5),
        ..ServiceOptions::default()
    };
    let service = TelemetryService::new(probe.clone(), options);
    let app = router(AppState::new(service));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("ws://{addr}/ws"), probe)
}

async fn request(ws: &mut WsStream, text: &str) -> Reply {
    ws.send(Message::Text(text.into())).await.expect("send");
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(json))) => {
                return serde_json::from_str::<Reply>(&json).expect("reply json")
            }
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {other:?}"),
        }
    }
}

#[tokio::test]
async fn client_round_trip() {
    let (url, probe) = start_agent().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");

    let stats = request(&mut ws, "get_stats").await;
    assert!(stats.ok);
    let data = stats.data.expect("stats data");
    assert_eq!(data["usedMemoryBytes"], 1024 * 1024 * 1024u64);
    assert_eq!(data["uptimeSeconds"], 42);
    assert_eq!(data["cpuUsagePercent"], 0.0);

    let procs = request(&mut ws, r#"{"op":"get_processes"}"#).await;
    assert!(procs.ok);
    let list = procs.data.expect("process data");
    assert_eq!(list.as_array().map(Vec::len), Some(2));
    assert_eq!(list[1]["name"], "worker");
    assert_eq!(list[1]["memoryUsageBytes"], 2);

    let stale = request(
        &mut ws,
        r#"{"op":"kill_process","pid":4242,"expectedName":"nginx"}"#,
    )
    .await;
    assert!(!stale.ok);
    assert_eq!(stale.error.expect("error").kind, "StaleTarget");

    let killed = request(
        &mut ws,
        r#"{"op":"kill_process","pid":4242,"expectedName":"worker"}"#,
    )
    .await;
    assert!(killed.ok, "{killed:?}");
    assert_eq!(killed.data.expect("message"), "Process 4242 terminated.");
    assert_eq!(probe.signals_sent(), vec![4242]);

    let forbidden = request(&mut ws, r#"{"op":"kill_process","pid":1}"#).await;
    assert_eq!(forbidden.op, "kill_process");
    assert_eq!(forbidden.error.expect("error").kind, "ForbiddenTarget");
}

#[tokio::test]
async fn malformed_requests_keep_the_connection_open() {
    let (url, _probe) = start_agent().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");

    let bad = request(&mut ws, "get_metrics").await;
    assert!(!bad.ok);
    assert_eq!(bad.error.expect("error").kind, "BadRequest");

    let top = request(&mut ws, r#"{"op":"get_top_processes","limit":1}"#).await;
    assert!(top.ok);
    assert_eq!(top.data.and_then(|d| d.as_array().map(Vec::len)), Some(1));
}

#[tokio::test]
async fn unreadable_host_surfaces_error_text() {
    let (url, probe) = start_agent().await;
    probe.update(|h| h.failure = Some("interfaces unavailable".into()));
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");

    let reply = request(&mut ws, "get_stats").await;
    assert!(!reply.ok);
    assert!(reply.data.is_none());
    let err = reply.error.expect("error");
    assert_eq!(err.kind, "SamplingUnavailable");
    assert!(err.message.contains("interfaces unavailable"));
}
