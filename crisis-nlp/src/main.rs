//! crisis-nlp - ensemble crisis detection service
//!
//! Loads the TOML configuration, restores learned thresholds from the root
//! folder's SQLite database and serves the analysis, feedback, threshold and
//! learning endpoints over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crisis_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crisis_nlp::cache::{spawn_invalidation_listener, ResponseCache};
use crisis_nlp::config::ServiceConfig;
use crisis_nlp::learning::LearningSystem;
use crisis_nlp::pipeline::{build_members, CrisisAnalyzer};
use crisis_nlp::AppState;

const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for crisis-nlp
#[derive(Parser, Debug)]
#[command(name = "crisis-nlp")]
#[command(about = "Ensemble crisis detection service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CRISIS_NLP_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "CRISIS_NLP_PORT")]
    port: Option<u16>,

    /// Root folder holding the learning database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Write the built-in defaults to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(crisis_common::config::default_config_path)
        .unwrap_or_else(|| PathBuf::from("crisis-nlp.toml"));

    if args.init_config {
        if config_path.exists() {
            anyhow::bail!("{} already exists", config_path.display());
        }
        crisis_common::config::write_toml_config(&ServiceConfig::default(), &config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let mut config: ServiceConfig = crisis_common::config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // RUST_LOG wins over the [logging] level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "Starting crisis-nlp"
    );
    info!("Config: {}", config_path.display());

    config.validate().context("Invalid configuration")?;

    let root_folder = crisis_common::config::resolve_root_folder(
        args.root_folder.as_deref(),
        "CRISIS_NLP_ROOT",
        config.root_folder.as_deref(),
    );
    let db_path = crisis_common::config::ensure_root_folder(&root_folder)
        .context("Failed to initialize root folder")?;
    info!("Database: {}", db_path.display());

    let db_pool = crisis_nlp::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let shutdown = CancellationToken::new();

    let learning = Arc::new(
        LearningSystem::new(
            config.learning.clone(),
            config.thresholds.clone(),
            config.default_mode(),
        )
        .with_pool(db_pool)
        .with_event_bus(event_bus.clone()),
    );
    learning
        .restore()
        .await
        .context("Failed to restore learning state")?;

    let members = build_members(&config).context("Failed to build classifiers")?;
    if members.is_empty() {
        warn!("No classifiers configured, every analysis uses the pattern fallback");
    }

    let mut analyzer = CrisisAnalyzer::new(&config, members, Arc::clone(&learning))
        .with_event_bus(event_bus.clone());
    let mut cache = None;
    if config.cache.enabled {
        let response_cache = Arc::new(ResponseCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
        ));
        spawn_invalidation_listener(Arc::clone(&response_cache), &event_bus, shutdown.clone());
        analyzer = analyzer.with_cache(Arc::clone(&response_cache));
        cache = Some(response_cache);
    }

    let mut state = AppState::new(Arc::new(analyzer), event_bus).with_shutdown(shutdown.clone());
    if let Some(cache) = cache {
        state = state.with_cache(cache);
    }
    let app = crisis_nlp::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
