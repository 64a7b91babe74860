//! A self-contained Redis monitoring daemon.
//!
//! This crate polls one or more Redis-compatible servers for their `INFO`
//! diagnostic payload on a fixed interval, parses the wire reply into typed
//! snapshots, and republishes state changes to subscribers:
//!
//! - a miniature protocol client per server, built directly on a TCP stream
//!   (connect, optional `AUTH` handshake, bulk-reply framing)
//! - a poll client per server driving it on a timer and holding the current
//!   snapshot
//! - a pool aggregating all clients and rebroadcasting their events
//! - an SQLite history store and an HTTP dashboard consuming them
//!
//! Only the bulk-string framing needed for the one-shot `AUTH`/`INFO`
//! exchange is implemented; this is not a general Redis driver.

pub mod api;
pub mod client;
pub mod config;
pub mod history;
pub mod pool;
pub mod server;
pub mod session;
pub mod snapshot;
