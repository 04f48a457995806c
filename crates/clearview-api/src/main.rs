//! clearview-api - HTTP API server for clearview

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clearview_api::{app, telemetry, AppState, ResendPolicy, ServerConfig, WebhookConfig};
use clearview_core::{defaults, CallEventRepository, EventBus};
use clearview_db::{pool, BlobStoreConfig, Database, FilesystemBlobStore, PoolConfig};
use clearview_inference::{VeoBackend, VeoConfig, VideoBackend, VideoGenerationConfig};
use clearview_jobs::{
    HttpMailer, MailerConfig, NotificationOrchestrator, PipelineHandler, SchedulerConfig,
    TaskScheduler, VideoController, VideoPollConfig, VideoTaskHandler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "clearview_api=debug,clearview_jobs=debug,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("clearview-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Configuration, built once and injected
    let server_config = ServerConfig::from_env();
    let webhook_config = WebhookConfig::from_env();
    if webhook_config.secret.is_none() {
        warn!("WEBHOOK_SECRET not set; webhook deliveries will be rejected with 500");
    }
    let mailer_config = MailerConfig::from_env();
    if mailer_config.doctor_email.is_none() {
        info!("DOCTOR_EMAIL not set; clinician summaries disabled");
    }
    let blob_config = BlobStoreConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();
    let resend_policy = ResendPolicy::from_env();

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect(&server_config.database_url, &PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Scheduler state does not survive a restart, so no `generating` row
    // written before now has a task left to finish it.
    let orphaned = db.calls.fail_stale_video_runs(chrono::Utc::now()).await?;
    if orphaned > 0 {
        warn!(orphaned, "Marked interrupted video runs as failed");
    }

    tokio::spawn(pool::monitor(
        db.pool.clone(),
        Duration::from_secs(pool::MONITOR_INTERVAL_SECS),
    ));

    let calls = Arc::new(db.calls);
    let patients = Arc::new(db.patients);

    // Media storage
    let blobs = Arc::new(FilesystemBlobStore::new(&blob_config));
    blobs.validate().await?;
    info!(
        "Media storage initialized at {}",
        blob_config.storage_path.display()
    );

    // Collaborators
    let mailer = HttpMailer::new(mailer_config.clone())?;
    if !mailer.is_configured() {
        warn!("EMAIL_API_KEY not set; every email send will fail and be logged");
    }

    let (video_backend, generation_config) = match VeoConfig::from_env() {
        Some(config) => {
            let generation = config.generation_config();
            let backend = VeoBackend::new(config)?;
            info!(
                aspect_ratio = %generation.aspect_ratio,
                "Video backend initialized: {}",
                VideoBackend::model_name(&backend)
            );
            (Some(Arc::new(backend) as Arc<dyn VideoBackend>), generation)
        }
        None => {
            info!("VEO_API_KEY not set; video generation disabled");
            (None, VideoGenerationConfig::default())
        }
    };

    let events = EventBus::new(defaults::EVENT_BUS_CAPACITY);
    let scheduler = TaskScheduler::new(scheduler_config.clone(), events.clone());

    let controller = Arc::new(
        VideoController::new(video_backend, calls.clone(), blobs.clone(), events.clone())
            .with_poll_config(VideoPollConfig::from_env())
            .with_generation_config(generation_config),
    );
    let orchestrator = Arc::new(NotificationOrchestrator::new(
        calls.clone(),
        patients.clone(),
        Arc::new(mailer),
        mailer_config,
        scheduler.clone(),
        events.clone(),
    ));

    scheduler
        .register_handler(VideoTaskHandler::new(controller, calls.clone()))
        .await;
    scheduler
        .register_handler(PipelineHandler::new(orchestrator, calls.clone()))
        .await;
    if scheduler_config.enabled {
        info!("Task scheduler started");
    } else {
        warn!("Task scheduler disabled; notification pipelines will not run");
    }

    // Telemetry mirror
    let tm_bus = events.clone();
    tokio::spawn(async move {
        telemetry::telemetry_mirror(tm_bus).await;
    });

    let state = AppState {
        calls,
        patients,
        blobs,
        scheduler: scheduler.clone(),
        events,
        webhook: Arc::new(webhook_config),
        resend: resend_policy,
    };
    let router = app(state, &server_config);

    // Start server
    let addr: SocketAddr = server_config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let remaining = scheduler
        .shutdown(Duration::from_secs(defaults::TASK_SHUTDOWN_GRACE_SECS))
        .await;
    if remaining > 0 {
        warn!(remaining, "Shutdown grace elapsed with tasks still running");
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
