//! INI configuration loading.
//!
//! Each section of the configuration file describes one monitored server:
//!
//! ```ini
//! [cache]
//! label    = Cache
//! host     = 127.0.0.1
//! port     = 6379
//! interval = 5.0
//! auth     = user secret
//! ```
//!
//! Every key is optional; unset values fall back to the defaults below. The
//! combined `auth` key splits on the first space into username and password
//! and wins over the explicit `username`/`password` keys.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::server::MonitoredServer;

pub const DEFAULT_PATH: &str = "redis-info.ini";

pub const DEFAULT_INTERVAL: f64 = 5.0;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;

/// Configuration errors are fatal at startup and never reach the polling
/// core.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file \"{0}\" not found")]
    NotFound(String),
    #[error("configuration file \"{0}\" is not a .{1} file")]
    WrongExtension(String, &'static str),
    #[error("configuration file \"{0}\" not readable: {1}")]
    Unreadable(String, String),
}

/// One raw configuration section, before defaults are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawServer {
    pub label: Option<String>,
    pub interval: Option<f64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: Option<String>,
    pub server_id: Option<String>,
}

/// Builds [`MonitoredServer`] descriptors from configuration, handing out
/// auto-incrementing placeholder labels for unlabeled entries.
#[derive(Debug, Default)]
pub struct ServerFactory {
    count: u32,
}

impl ServerFactory {
    pub fn new() -> Self {
        ServerFactory::default()
    }

    pub fn from_raw(&mut self, raw: RawServer) -> MonitoredServer {
        let label = raw.label.filter(|l| !l.is_empty()).unwrap_or_else(|| {
            self.count += 1;
            format!("Redis Server {}", self.count)
        });

        let (auth_username, auth_password) = match raw.auth.as_deref().filter(|a| !a.is_empty()) {
            Some(auth) => match auth.split_once(' ') {
                Some((username, password)) => {
                    (Some(username.to_string()), Some(password.to_string()))
                }
                None => (Some(auth.to_string()), None),
            },
            None => (None, None),
        };

        MonitoredServer::new(
            label,
            raw.interval.unwrap_or(DEFAULT_INTERVAL),
            raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            raw.port.unwrap_or(DEFAULT_PORT),
            auth_username.or(raw.username),
            auth_password.or(raw.password),
            raw.server_id,
        )
    }

    /// Loads every section of an INI file as one server.
    ///
    /// Section order is not observable through the configuration layer, so
    /// servers come back in lexical section order; this is the pool order.
    pub fn from_ini_file(&mut self, path: &str) -> Result<Vec<MonitoredServer>, ConfigError> {
        let file = Path::new(path);

        if !file.exists() {
            return Err(ConfigError::NotFound(path.to_string()));
        }

        let extension = "ini";
        if file.extension().and_then(|e| e.to_str()) != Some(extension) {
            return Err(ConfigError::WrongExtension(path.to_string(), extension));
        }

        let settings = ::config::Config::builder()
            .add_source(::config::File::new(path, ::config::FileFormat::Ini))
            .build()
            .map_err(|err| ConfigError::Unreadable(path.to_string(), err.to_string()))?;

        let sections: BTreeMap<String, RawServer> = settings
            .try_deserialize()
            .map_err(|err| ConfigError::Unreadable(path.to_string(), err.to_string()))?;

        Ok(sections
            .into_values()
            .map(|raw| self.from_raw(raw))
            .collect())
    }
}
