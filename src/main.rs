//! Deputy server

use clap::Parser;
use deputy::config::BrokerConfig;
use deputy::models::Session;
use deputy::store::{self, MemoryStore, SqliteStore, Store};
use deputy::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "deputy")]
#[command(about = "Delegation broker and task orchestration server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "DEPUTY_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Broker configuration file
    #[arg(long, env = "DEPUTY_CONFIG", default_value = "deputy.yaml")]
    config: PathBuf,

    /// SQLite URL for sessions; in-memory when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deputy=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = BrokerConfig::load(&args.config)?;

    let sessions: Arc<dyn Store<Session>> = match &args.database_url {
        Some(database_url) => {
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            store::migrate(&pool).await?;
            tracing::info!(%database_url, "Using SQLite session store");
            Arc::new(SqliteStore::new(pool, "sessions"))
        }
        None => {
            tracing::info!("Using in-memory session store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::from_config(&config, sessions)?;
    let app = deputy::api::router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
