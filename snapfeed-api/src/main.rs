use serde::Deserialize;
use server::ServerState;
use snapfeed_common::{
    model::{ModelValidationError, auth::TokenKeys},
    snowflake::{WorkerId, WorkerIdOutOfRangeError},
    util::PositiveDuration,
};
use snapfeed_db::{
    client::DbClient,
    memory::MemoryStore,
    store::{DbError, Store},
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ModelValidationError),
    #[error("Invalid worker id: {0}")]
    WorkerId(#[from] WorkerIdOutOfRangeError),
    #[error("Error connecting to the database: {0}")]
    Database(#[from] DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    #[serde(default = "default_server_address")]
    server_address: IpAddr,
    #[serde(default = "default_server_port")]
    server_port: u16,
    database_url: Option<String>,
    #[serde(default = "default_database_max_connections")]
    database_max_connections: u32,
    jwt_secret: String,
    #[serde(default = "default_token_ttl_seconds")]
    token_ttl_seconds: i64,
    #[serde(default)]
    worker_id: u16,
}

fn default_server_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_server_port() -> u16 {
    5000
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_token_ttl_seconds() -> i64 {
    24 * 60 * 60
}

const DEFAULT_LOG_FILTER: &str = "snapfeed_api=debug,\
    snapfeed_common=debug,\
    snapfeed_db=debug,\
    tower_http=debug,axum::rejection=trace,sqlx=warn";

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .env file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn open_store(env: &Env) -> Result<Arc<dyn Store>, InitError> {
    let worker_id = WorkerId::try_from(env.worker_id)?;

    if let Some(url) = &env.database_url {
        let client = DbClient::connect(url, env.database_max_connections, worker_id).await?;
        info!("Connected to database");
        Ok(Arc::new(client))
    } else {
        warn!("DATABASE_URL is not set, keeping all data in memory");
        Ok(Arc::new(MemoryStore::new(worker_id)))
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(%err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let token_lifetime =
        PositiveDuration::from_seconds(env.token_ttl_seconds).map_err(ModelValidationError::from)?;
    let state = ServerState {
        store: open_store(&env).await?,
        token_keys: Arc::new(TokenKeys::new(env.jwt_secret.as_bytes(), token_lifetime)),
    };

    let app = server::app(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
