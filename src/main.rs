use std::env;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;

use redis_info::api::{router, AppState};
use redis_info::client::ClientEvent;
use redis_info::config::{ServerFactory, DEFAULT_PATH};
use redis_info::history::HistoryStore;
use redis_info::pool::{ClientPool, PoolEvent};

const DEFAULT_LISTEN: &str = "127.0.0.1:2002";
const DEFAULT_DATABASE: &str = "redis-info-history.sqlite";

#[derive(Error, Debug, PartialEq)]
enum CliError {
    #[error("Invalid command line flag")]
    InvalidCommandLineFlag,
    #[error("Invalid command line flag value")]
    InvalidCommandLineFlagValue,
}

#[derive(Debug)]
struct Cli {
    config: String,
    listen: String,
    database: String,
    daemon: bool,
}

impl Cli {
    fn parse<I: IntoIterator<Item = String>>(command_line_args: I) -> Result<Self, CliError> {
        let mut iter = command_line_args.into_iter().skip(1);

        let mut cli = Cli {
            config: DEFAULT_PATH.to_string(),
            listen: DEFAULT_LISTEN.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            daemon: false,
        };

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    cli.config = iter.next().ok_or(CliError::InvalidCommandLineFlagValue)?;
                }
                "--listen" | "-s" => {
                    cli.listen = iter.next().ok_or(CliError::InvalidCommandLineFlagValue)?;
                }
                "--database" | "-f" => {
                    cli.database = iter.next().ok_or(CliError::InvalidCommandLineFlagValue)?;
                }
                "--daemon" | "-d" => {
                    cli.daemon = true;
                }
                _ => return Err(CliError::InvalidCommandLineFlag),
            }
        }

        Ok(cli)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse(env::args()).context("parsing command line arguments")?;

    let servers = ServerFactory::new()
        .from_ini_file(&cli.config)
        .context("loading configuration")?;

    let history = Arc::new(
        HistoryStore::open(&cli.database)
            .with_context(|| format!("opening history database {}", cli.database))?,
    );

    let pool = Arc::new(ClientPool::new());
    let events = pool.subscribe();

    for server in servers {
        info!(
            label = %server.label,
            address = %server.address(),
            auth = server.has_auth(),
            "monitoring server"
        );
        pool.add_server(Arc::new(server));
    }

    if pool.is_empty() {
        warn!("no servers configured in {}", cli.config);
    }

    tokio::spawn(handle_pool_events(events, Arc::clone(&history)));

    pool.start();

    if cli.daemon {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&cli.listen)
            .await
            .with_context(|| format!("binding {}", cli.listen))?;
        info!("listening on http://{}", listener.local_addr()?);

        let app = router(AppState {
            pool: Arc::clone(&pool),
            history: Arc::clone(&history),
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serving http")?;
    }

    info!("stopping");
    pool.stop();

    Ok(())
}

/// Logs every pool event and persists completed polls to the history store.
async fn handle_pool_events(
    mut events: broadcast::Receiver<PoolEvent>,
    history: Arc<HistoryStore>,
) {
    loop {
        let PoolEvent { client, event } = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "pool event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let server = &client.server;

        match event {
            ClientEvent::Start => debug!(server = %server.label, "starting redis client"),
            ClientEvent::Stop => debug!(server = %server.label, "stopping redis client"),
            ClientEvent::Auth(true) => info!(server = %server.label, "authentication successful"),
            ClientEvent::Auth(false) => error!(server = %server.label, "authentication failed"),
            ClientEvent::Error(message) => error!(server = %server.label, "{message}"),
            ClientEvent::Info(snapshot) => {
                debug!(
                    server = %server.label,
                    id = %server.id,
                    "snapshot received"
                );

                if let Err(err) = history.save(&server.id, &snapshot) {
                    error!(server = %server.label, %err, "failed to persist snapshot");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
    }
}
