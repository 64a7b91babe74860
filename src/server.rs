//! Monitored server descriptors.
//!
//! A descriptor carries everything needed to reach one Redis endpoint: the
//! address, the poll interval, optional credentials and a stable identity
//! string joining live clients to their persisted history.

use std::time::Duration;

use serde::Serialize;
use sha1::{Digest, Sha1};

/// One monitored Redis endpoint, built from configuration at startup and
/// immutable afterwards.
///
/// The `id` is the join key between a live client and its persisted history,
/// so it must stay stable for the process lifetime: an explicit `server_id`
/// from configuration wins, otherwise it is derived from the label.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoredServer {
    pub label: String,
    #[serde(skip)]
    pub interval: Duration,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    pub id: String,
}

impl MonitoredServer {
    pub fn new(
        label: impl Into<String>,
        interval_secs: f64,
        host: impl Into<String>,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        server_id: Option<String>,
    ) -> Self {
        let label = label.into();
        let id = server_id.unwrap_or_else(|| derive_id(&label));

        MonitoredServer {
            label,
            interval: Duration::from_secs_f64(interval_secs.max(0.0)),
            host: host.into(),
            port,
            username,
            password,
            id,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether an `AUTH` handshake is required before polling.
    pub fn has_auth(&self) -> bool {
        self.username.as_deref().is_some_and(|s| !s.is_empty())
            || self.password.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// The argument part of the `AUTH` command, omitting absent tokens.
    ///
    /// Both tokens present yield `"<username> <password>"`; a single token is
    /// passed through on its own, matching the server-side one-argument form.
    pub fn auth_args(&self) -> String {
        let mut auth = String::new();

        if let Some(username) = self.username.as_deref().filter(|s| !s.is_empty()) {
            auth.push_str(username);
        }

        if let Some(password) = self.password.as_deref().filter(|s| !s.is_empty()) {
            if !auth.is_empty() {
                auth.push(' ');
            }

            auth.push_str(password);
        }

        auth
    }
}

fn derive_id(label: &str) -> String {
    hex::encode(Sha1::digest(label.as_bytes()))
}
