//! Persistent snapshot history.
//!
//! Every `info` event is recorded with its server identity and a UTC
//! timestamp; the dashboard queries back by recency and server.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;

use crate::snapshot::InfoSnapshot;

pub const DATETIME_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid stored timestamp: {0}")]
    BadTimestamp(String),
}

/// One persisted snapshot row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: serde_json::Value,
}

/// SQLite-backed history store. Writes are serialized behind a mutex; all
/// queries are short and run inline.
pub struct HistoryStore {
    connection: Mutex<Connection>,
}

impl HistoryStore {
    /// Opens (or creates) the database at `path` and ensures the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let connection = Connection::open(path)?;
        Self::ensure_table(&connection)?;

        Ok(HistoryStore {
            connection: Mutex::new(connection),
        })
    }

    /// An in-memory store, for tests.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let connection = Connection::open_in_memory()?;
        Self::ensure_table(&connection)?;

        Ok(HistoryStore {
            connection: Mutex::new(connection),
        })
    }

    fn ensure_table(connection: &Connection) -> Result<(), HistoryError> {
        connection.execute_batch(
            "create table if not exists redis_info_history
             (
                 id        integer
                     constraint redis_info_history_id
                         primary key autoincrement,
                 server_id text not null,
                 timestamp text not null,
                 status    text not null,

                 check ( timestamp is strftime('%Y-%m-%d %H:%M:%S', timestamp) )
             )",
        )?;

        Ok(())
    }

    /// Persists one snapshot for the given server identity, timestamped now.
    pub fn save(&self, server_id: &str, snapshot: &InfoSnapshot) -> Result<(), HistoryError> {
        let status = serde_json::to_string(snapshot)?;
        let timestamp = Utc::now().format(DATETIME_STORAGE_FORMAT).to_string();

        let connection = self.connection.lock().unwrap();
        connection.execute(
            "insert into redis_info_history (server_id, timestamp, status)
             values (?1, ?2, ?3)",
            params![server_id, timestamp, status],
        )?;

        Ok(())
    }

    /// Loads every row from the last `interval_secs` seconds, insertion
    /// order, optionally narrowed to one server identity.
    pub fn load(
        &self,
        interval_secs: u64,
        server_id: Option<&str>,
    ) -> Result<Vec<HistoryRow>, HistoryError> {
        let cutoff = (Utc::now() - Duration::seconds(interval_secs as i64))
            .format(DATETIME_STORAGE_FORMAT)
            .to_string();

        let connection = self.connection.lock().unwrap();
        let mut statement = connection.prepare(
            "select id, server_id, timestamp, status
               from redis_info_history
              where timestamp >= ?1
                and (?2 is null or server_id = ?2)
              order by id",
        )?;

        let rows = statement.query_map(params![cutoff, server_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (id, server_id, timestamp, status) = row?;

            let timestamp = NaiveDateTime::parse_from_str(&timestamp, DATETIME_STORAGE_FORMAT)
                .map_err(|_| HistoryError::BadTimestamp(timestamp.clone()))?
                .and_utc();
            let status = serde_json::from_str(&status)?;

            history.push(HistoryRow {
                id,
                server_id,
                timestamp,
                status,
            });
        }

        Ok(history)
    }
}
