//! HTTP dashboard and JSON surface.
//!
//! Thin read-only wrappers over the pool and the history store: `/` renders a
//! plain HTML status table, `/status` serves the current snapshots, and
//! `/history` answers time-range queries for one server. No protocol logic
//! lives here.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::history::HistoryStore;
use crate::pool::ClientPool;

pub const DEFAULT_HISTORY_INTERVAL: u64 = 60 * 15;
pub const HISTORY_INTERVAL_MIN: u64 = 60;
pub const HISTORY_INTERVAL_MAX: u64 = 60 * 60;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ClientPool>,
    pub history: Arc<HistoryStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/history", get(history))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let mut rows = String::new();

    for (server, snapshot) in state.pool.statuses().await {
        let (state_label, detail) = match snapshot.error() {
            Some(error) => ("error", error.to_string()),
            None if snapshot.is_empty() => ("pending", String::new()),
            None => (
                "up",
                snapshot
                    .get("redis_version")
                    .map(|v| format!("redis {}", v))
                    .unwrap_or_default(),
            ),
        };

        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&server.label),
            escape(&server.address()),
            state_label,
            escape(&detail),
        ));
    }

    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>Redis Info</title></head><body>\n\
         <h1>Redis Info</h1>\n\
         <table border=\"1\">\n\
         <tr><th>Server</th><th>Address</th><th>State</th><th>Detail</th></tr>\n\
         {rows}\
         </table>\n\
         </body></html>\n"
    ))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let statuses: Vec<_> = state
        .pool
        .statuses()
        .await
        .into_iter()
        .map(|(server, snapshot)| {
            json!({
                "server": &*server,
                "status": &*snapshot,
            })
        })
        .collect();

    Json(json!(statuses))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    interval: Option<u64>,
    server_id: Option<String>,
}

/// Only one server's history may be queried at a time; the interval is
/// clamped to a sane window.
async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let Some(server_id) = params.server_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "no server_id provided" })),
        )
            .into_response();
    };

    let interval = params
        .interval
        .unwrap_or(DEFAULT_HISTORY_INTERVAL)
        .clamp(HISTORY_INTERVAL_MIN, HISTORY_INTERVAL_MAX);

    match state.history.load(interval, Some(&server_id)) {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => {
            error!(%err, "history query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": err.to_string() })),
            )
                .into_response()
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
