use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use redis_info::client::ClientEvent;
use redis_info::server::MonitoredServer;

/// A scripted Redis-like TCP server for driving the poll client.
///
/// Replies to `AUTH` with the configured line and to each `INFO` with the
/// next entry of `info_replies` (the last entry repeats once the script is
/// exhausted). Replies can be delivered in fixed-size chunks with a delay to
/// exercise partial framing.
#[derive(Clone)]
pub struct MockRedisConfig {
    pub auth_reply: Option<String>,
    pub info_replies: Vec<Vec<u8>>,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for MockRedisConfig {
    fn default() -> Self {
        MockRedisConfig {
            auth_reply: None,
            info_replies: vec![bulk_reply("# Server\r\nredis_version:7.2.0\r\n")],
            chunk_size: 0,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// Builds a bulk `INFO` reply frame around the given body.
pub fn bulk_reply(body: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", body.len(), body).into_bytes()
}

pub struct MockRedis {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockRedis {
    pub async fn spawn(config: MockRedisConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };

                let config = config.clone();
                tokio::spawn(handle_connection(socket, config));
            }
        });

        MockRedis { addr, handle }
    }

    /// A descriptor pointing at this mock, with a short poll interval.
    pub fn server(&self, label: &str) -> Arc<MonitoredServer> {
        self.server_with_auth(label, None, None)
    }

    pub fn server_with_auth(
        &self,
        label: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Arc<MonitoredServer> {
        Arc::new(MonitoredServer::new(
            label,
            0.2,
            self.addr.ip().to_string(),
            self.addr.port(),
            username.map(String::from),
            password.map(String::from),
            None,
        ))
    }
}

impl Drop for MockRedis {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(socket: tokio::net::TcpStream, config: MockRedisConfig) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut info_count = 0usize;

    while let Ok(Some(line)) = lines.next_line().await {
        if line.starts_with("AUTH") {
            if let Some(reply) = &config.auth_reply {
                if writer.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        } else if line.starts_with("INFO") {
            let index = info_count.min(config.info_replies.len().saturating_sub(1));
            let reply = &config.info_replies[index];
            info_count += 1;

            if config.chunk_size == 0 {
                if writer.write_all(reply).await.is_err() {
                    return;
                }
            } else {
                for chunk in reply.chunks(config.chunk_size) {
                    if writer.write_all(chunk).await.is_err() {
                        return;
                    }
                    let _ = writer.flush().await;
                    tokio::time::sleep(config.chunk_delay).await;
                }
            }

            let _ = writer.flush().await;
        }
    }
}

/// Waits for the next event matching the predicate, failing the test after
/// two seconds.
pub async fn wait_for_event<F>(
    receiver: &mut broadcast::Receiver<ClientEvent>,
    mut predicate: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            let event = receiver.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
