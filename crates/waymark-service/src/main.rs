//! Waymark Service - headless tracker host and HTTP API.
//!
//! Run with: `cargo run -p waymark-service -- --replay track.jsonl --autostart`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use waymark_core::mock::MockPositioning;
use waymark_core::{
    HttpTransport, LogIndicator, PositioningSource, RetentionSweeper, SettingsHandle, SharedStore,
    SyncEngine, Tracker,
};
use waymark_service::{AppState, Config, ReplayOptions, ReplayPositioning, forward_logged_fixes};
use waymark_store::Store;
use waymark_types::PerformanceMode;

/// Waymark Service - headless tracker host and HTTP API.
#[derive(Parser, Debug)]
#[command(name = "waymark-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// JSON-lines track to replay as the positioning source (overrides config).
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Remote endpoint for delivery (overrides config).
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Initial performance mode: high, normal or power_saver (overrides config).
    #[arg(short, long)]
    mode: Option<PerformanceMode>,

    /// Activate and start tracking as soon as the service is up.
    #[arg(long)]
    autostart: bool,

    /// Keep rows queued; do not deliver them.
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("waymark_service=info".parse()?)
                .add_directive("waymark_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if let Some(replay) = args.replay {
        config.positioning.replay = Some(replay);
    }
    if let Some(endpoint) = args.endpoint {
        config.sync.endpoint = Some(endpoint);
    }
    if let Some(mode) = args.mode {
        config.tracking.mode = mode;
    }
    if args.autostart {
        config.tracking.autostart = true;
    }
    if args.no_sync {
        config.sync.enabled = false;
    }
    config.validate()?;

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store: SharedStore = Arc::new(Mutex::new(Store::open(&config.storage.path)?));
    let settings = SettingsHandle::new(config.tracking.settings.clone());
    let root = CancellationToken::new();
    let mut tasks = Vec::new();

    let positioning: Arc<dyn PositioningSource> = match &config.positioning.replay {
        Some(path) => Arc::new(ReplayPositioning::from_path(
            path,
            ReplayOptions {
                looped: config.positioning.replay_loop,
                low_power_accuracy_factor: config.positioning.low_power_accuracy_factor,
            },
        )?),
        None => {
            warn!("No positioning source configured; the tracker will receive no fixes");
            Arc::new(MockPositioning::new())
        }
    };

    let (tracker, handle) = Tracker::new(
        positioning,
        Arc::new(LogIndicator),
        Arc::clone(&store),
        settings.clone(),
    );
    let tracker = tracker
        .with_mode(config.tracking.mode)
        .with_timeline_logging(config.tracking.timeline_logging);
    tasks.push(tracker.spawn(root.child_token()));

    let sync = match config.sync.active_endpoint() {
        Some(endpoint) => {
            let transport = HttpTransport::new(
                endpoint,
                config.sync.token.clone(),
                Duration::from_secs(config.sync.timeout_secs),
            )?;
            let engine = SyncEngine::new(Arc::clone(&store), Arc::new(transport), settings.clone());
            let sync = engine.handle();
            info!("Delivering to {}", endpoint);
            tasks.push(engine.spawn(root.child_token()));
            tasks.push(forward_logged_fixes(
                handle.subscribe(),
                sync.clone(),
                root.child_token(),
            ));
            Some(sync)
        }
        None => {
            info!("Delivery disabled; rows stay queued");
            None
        }
    };

    tasks.push(RetentionSweeper::new(Arc::clone(&store), settings.clone()).spawn(root.child_token()));

    if config.tracking.autostart {
        handle.activate().await?;
        handle.grant_permissions().await?;
        let state = handle.start().await?;
        info!("Autostart: tracker {}", state);
    }

    let state = AppState::new(store, handle, settings, sync);
    let app = waymark_service::app(state);

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(root.clone()))
        .await?;

    // Stops the tracker (releasing the radio) and lets an in-flight delivery settle
    root.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for ctrl-c: {}", e);
                cancel.cancelled().await;
            }
            info!("Shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
