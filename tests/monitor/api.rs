use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use redis_info::api::{router, AppState};
use redis_info::client::ClientEvent;
use redis_info::history::HistoryStore;
use redis_info::pool::ClientPool;
use redis_info::snapshot::InfoSnapshot;

use crate::test_utils::{wait_for_event, MockRedis, MockRedisConfig};

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    addr
}

/// Minimal HTTP/1.1 GET over a raw stream; returns the status line and body.
async fn http_get(addr: SocketAddr, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(2), stream.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .unwrap();

    let response = String::from_utf8(response).unwrap();
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("malformed http response");
    let status_line = head.lines().next().unwrap_or_default().to_string();

    (status_line, body.to_string())
}

fn state_with(pool: ClientPool, history: HistoryStore) -> AppState {
    AppState {
        pool: Arc::new(pool),
        history: Arc::new(history),
    }
}

#[tokio::test]
async fn test_status_route_serves_all_snapshots() {
    let mock = MockRedis::spawn(MockRedisConfig::default()).await;

    let pool = ClientPool::new();
    let client = pool.add_server(mock.server("dashboard"));
    let mut events = client.subscribe();

    pool.start();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Info(_))).await;

    let addr = serve(state_with(pool, HistoryStore::open_in_memory().unwrap())).await;
    let (status_line, body) = http_get(addr, "/status").await;

    assert!(status_line.contains("200"), "{status_line}");

    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["server"]["label"], "dashboard");
    assert_eq!(entries[0]["status"]["fields"]["redis_version"], "7.2.0");
}

#[tokio::test]
async fn test_history_route_requires_server_id() {
    let addr = serve(state_with(
        ClientPool::new(),
        HistoryStore::open_in_memory().unwrap(),
    ))
    .await;

    let (status_line, body) = http_get(addr, "/history").await;

    assert!(status_line.contains("400"), "{status_line}");
    assert!(body.contains("no server_id provided"), "{body}");
}

#[tokio::test]
async fn test_history_route_returns_persisted_rows() {
    let history = HistoryStore::open_in_memory().unwrap();
    let snapshot = InfoSnapshot::new(vec![("redis_version".to_string(), "7.2.0".to_string())]);
    history.save("abc123", &snapshot).unwrap();
    history.save("other", &snapshot).unwrap();

    let addr = serve(state_with(ClientPool::new(), history)).await;
    let (status_line, body) = http_get(addr, "/history?server_id=abc123").await;

    assert!(status_line.contains("200"), "{status_line}");

    let rows: serde_json::Value = serde_json::from_str(&body).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["server_id"], "abc123");
    assert_eq!(rows[0]["status"]["fields"]["redis_version"], "7.2.0");
}

#[tokio::test]
async fn test_index_route_renders_html() {
    let mock = MockRedis::spawn(MockRedisConfig::default()).await;

    let pool = ClientPool::new();
    pool.add_server(mock.server("<web-cache>"));

    let addr = serve(state_with(pool, HistoryStore::open_in_memory().unwrap())).await;
    let (status_line, body) = http_get(addr, "/").await;

    assert!(status_line.contains("200"), "{status_line}");
    assert!(body.contains("<table"), "{body}");
    // labels are escaped
    assert!(body.contains("&lt;web-cache&gt;"), "{body}");
}
