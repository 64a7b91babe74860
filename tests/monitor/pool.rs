use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use redis_info::client::ClientEvent;
use redis_info::pool::ClientPool;
use redis_info::snapshot::FieldValue;

use crate::test_utils::{bulk_reply, MockRedis, MockRedisConfig};

#[tokio::test]
async fn test_pool_events_are_tagged_with_their_client() {
    let mock_a = MockRedis::spawn(MockRedisConfig {
        info_replies: vec![bulk_reply("redis_version:7.2.0\r\n")],
        ..MockRedisConfig::default()
    })
    .await;
    let mock_b = MockRedis::spawn(MockRedisConfig {
        info_replies: vec![bulk_reply("redis_version:6.2.14\r\n")],
        ..MockRedisConfig::default()
    })
    .await;

    let pool = ClientPool::new();
    let mut events = pool.subscribe();

    pool.add_server(mock_a.server("a"));
    pool.add_server(mock_b.server("b"));
    pool.start();

    // collect one Info per server, checking the origin tag matches the data
    let mut seen_a = false;
    let mut seen_b = false;

    timeout(Duration::from_secs(2), async {
        while !(seen_a && seen_b) {
            let Ok(pool_event) = events.recv().await else {
                panic!("pool event stream closed");
            };

            if let ClientEvent::Info(snapshot) = &pool_event.event {
                match pool_event.client.server.label.as_str() {
                    "a" => {
                        assert_eq!(
                            snapshot.get("redis_version"),
                            Some(&FieldValue::Str("7.2.0".to_string()))
                        );
                        seen_a = true;
                    }
                    "b" => {
                        assert_eq!(
                            snapshot.get("redis_version"),
                            Some(&FieldValue::Str("6.2.14".to_string()))
                        );
                        seen_b = true;
                    }
                    other => panic!("unexpected origin {other}"),
                }
            }
        }
    })
    .await
    .expect("timed out waiting for both servers");

    pool.stop();
}

#[tokio::test]
async fn test_statuses_preserve_pool_order() {
    let mock = MockRedis::spawn(MockRedisConfig::default()).await;

    let pool = ClientPool::new();
    pool.add_server(mock.server("first"));
    pool.add_server(mock.server("second"));
    pool.add_server(mock.server("third"));

    let statuses = pool.statuses().await;
    let labels: Vec<_> = statuses
        .iter()
        .map(|(server, _)| server.label.as_str())
        .collect();

    assert_eq!(labels, vec!["first", "second", "third"]);
    // nothing polled yet, every snapshot is the initial empty one
    assert!(statuses.iter().all(|(_, snapshot)| snapshot.is_empty()));
}

#[tokio::test]
async fn test_statuses_are_a_detached_view() {
    let mock = MockRedis::spawn(MockRedisConfig::default()).await;

    let pool = ClientPool::new();
    let client = pool.add_server(mock.server("detached"));
    let mut events = client.subscribe();

    let before = pool.statuses().await;

    pool.start();
    crate::test_utils::wait_for_event(&mut events, |e| matches!(e, ClientEvent::Info(_))).await;
    pool.stop();

    // the view taken before polling still shows the initial snapshot
    assert!(before[0].1.is_empty());

    let after = pool.statuses().await;
    assert!(!after[0].1.is_empty());
}

#[tokio::test]
async fn test_one_faulted_server_does_not_halt_siblings() {
    let healthy = MockRedis::spawn(MockRedisConfig::default()).await;

    // a dead address for the second server
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let pool = ClientPool::new();
    let mut events = pool.subscribe();

    pool.add_server(healthy.server("healthy"));
    pool.add_server(Arc::new(redis_info::server::MonitoredServer::new(
        "dead",
        0.2,
        dead_addr.ip().to_string(),
        dead_addr.port(),
        None,
        None,
        None,
    )));
    pool.start();

    let mut healthy_info = false;
    let mut dead_error = false;

    timeout(Duration::from_secs(2), async {
        while !(healthy_info && dead_error) {
            let Ok(pool_event) = events.recv().await else {
                panic!("pool event stream closed");
            };

            match (&pool_event.event, pool_event.client.server.label.as_str()) {
                (ClientEvent::Info(_), "healthy") => healthy_info = true,
                (ClientEvent::Error(_), "dead") => dead_error = true,
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for mixed outcomes");

    // the pool keeps serving the healthy server's snapshot
    let statuses = pool.statuses().await;
    assert!(!statuses[0].1.is_error());
    assert!(statuses[1].1.is_error());

    pool.stop();
}
