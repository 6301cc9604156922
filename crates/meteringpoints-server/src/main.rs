mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use reconciler::{ConsumerConfig, ConsumerPool, Reconciler};
use registry::{load_from_system_config, SystemConfig, SystemConfigLoader};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handlers::*;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "meteringpoints.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },
    /// Drain the event topics into the record store.
    Consume,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.config.exists() {
        warn!(path = %args.config.display(), "config file missing, creating default config");
    }
    let config = SystemConfigLoader::load_or_create(&args.config)?;

    match args.command.unwrap_or(Mode::Serve {
        listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
    }) {
        Mode::Serve { listen } => serve(&config, listen).await,
        Mode::Consume => consume(&config).await,
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/list", post(list_meteringpoints))
        .route("/details", get(meteringpoint_details))
        .route("/createrelations", post(create_relations))
        .route("/onboarding/cpr", post(onboard_cpr))
        .route("/onboarding/cvr", post(onboard_cvr))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn serve(config: &SystemConfig, listen: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::from_config(config)?);
    let app = router(state);

    info!("meteringpoints-server listening on {}", listen);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn consume(config: &SystemConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = load_from_system_config(config)?;
    let source = bundle.bus.source.clone();
    let recovered = tokio::task::spawn_blocking(move || source.recover()).await??;
    if recovered > 0 {
        warn!(recovered, "requeued deliveries left in flight by a previous consumer");
    }
    let reconciler = Arc::new(Reconciler::new(bundle.store, bundle.bus.audit));
    let pool = ConsumerPool::start(
        reconciler,
        bundle.bus.source,
        ConsumerConfig {
            workers: bundle.workers,
            poll_timeout: bundle.poll_timeout,
            ..ConsumerConfig::default()
        },
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining consumer");
    tokio::task::spawn_blocking(move || pool.stop()).await?;
    Ok(())
}
