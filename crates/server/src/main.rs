use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrivener_core::{
    create_checker, create_notification_system, create_reasoning_client, load_config,
    validate_config, Collaborators, ContentEngine, DocumentAssembler, HttpSiteBridge,
    MarkdownAssembler, Notification, NotificationStore, Orchestrator, OriginalityLoop, PacedSite,
    PacingGovernor, PriceCalculator, Registry, Scheduler, SiteBridge, SqliteRegistry,
};

use scrivener_server::api::create_router;
use scrivener_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the notification channel
const NOTIFICATION_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("SCRIVENER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Reasoning provider: {:?}", config.reasoning.provider);

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Config hash: {}", &config_hash[..16]);

    // One SQLite file backs items, action log, counters and notifications
    let store = Arc::new(
        SqliteRegistry::new(&config.database.path).context("Failed to open registry")?,
    );
    let registry: Arc<dyn Registry> = store.clone();
    info!("Registry initialized");

    let notification_store: Arc<dyn NotificationStore> = store.clone();
    let (notifier, notification_writer) =
        create_notification_system(notification_store, NOTIFICATION_BUFFER_SIZE);
    let writer_handle = tokio::spawn(notification_writer.run());

    notifier
        .emit(Notification::ServiceStarted {
            version: VERSION.to_string(),
        })
        .await;

    let governor = Arc::new(
        PacingGovernor::new(config.pacing.clone())
            .with_count_store(store.clone())
            .with_notifier(notifier.clone()),
    );

    let site_config = config
        .site
        .as_ref()
        .ok_or_else(|| anyhow!("No [site] bridge configured"))?;
    info!("Using site bridge at {}", site_config.base_url);
    let bridge: Arc<dyn SiteBridge> = Arc::new(HttpSiteBridge::new(site_config));
    let site = PacedSite::new(Arc::clone(&governor), bridge);

    let reasoning = create_reasoning_client(&config.reasoning)
        .context("Failed to create reasoning client")?;
    info!("Using reasoning provider: {}", reasoning.provider());

    let checker = create_checker(&config.verification)
        .context("Failed to create originality checker")?;

    let engine = ContentEngine::new(Arc::clone(&reasoning), config.generation.clone());
    let originality =
        OriginalityLoop::new(checker, Arc::clone(&reasoning), config.originality.clone())
            .with_polling(
                config.verification.poll_interval(),
                config.verification.timeout(),
            );
    let assembler: Arc<dyn DocumentAssembler> =
        Arc::new(MarkdownAssembler::from_config(&config.artifacts));

    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.clone(),
        Collaborators {
            registry: Arc::clone(&registry),
            site: site.clone(),
            reasoning,
            engine,
            originality,
            pricing: PriceCalculator::new(config.pricing.clone()),
            assembler,
            notifier: Some(notifier.clone()),
        },
    ));

    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&registry),
        site,
        Some(notifier.clone()),
    ));

    if config.orchestrator.enabled {
        orchestrator.start();
        scheduler.start();
        info!("Orchestrator and scheduler started");
    } else {
        info!("Orchestrator disabled in config");
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&orchestrator),
        Arc::clone(&governor),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if scheduler.is_running() {
        scheduler.stop();
    }
    if orchestrator.is_running() {
        info!("Stopping orchestrator...");
        orchestrator.stop();
    }

    info!("Server shutting down...");
    notifier
        .emit(Notification::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // Every NotificationHandle clone must go before the writer sees the
    // channel close. The orchestrator, scheduler and governor each hold one.
    drop(scheduler);
    drop(orchestrator);
    drop(governor);
    drop(notifier);

    let _ = writer_handle.await;
    info!("Notification writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
