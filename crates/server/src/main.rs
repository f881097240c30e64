//! Atrium server entry point.

use std::sync::Arc;
use std::time::Duration;

use atrium_api::{AppState, RealtimeHub, app, request_body_limit};
use atrium_common::{ClockService, Config, LocalStorage, StorageBackend, SystemClock};
use atrium_core::{
    AttachmentService, ConversationService, EventPublisherService, MessageService,
    MessagingService, UserService,
};
use atrium_db::repositories::{
    AttachmentRepository, ConversationRepository, MessageRepository, UserRepository,
};
use atrium_queue::{MaintenanceJobs, PubSubSseBridge, RedisPubSub, SchedulerConfig, run_scheduler};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often channels without SSE listeners are dropped from the hub.
const HUB_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atrium=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting atrium server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = atrium_db::init(&config.database).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    atrium_db::migrate(&db).await?;
    info!("Migrations completed");

    let db = Arc::new(db);
    let clock: ClockService = Arc::new(SystemClock);

    // Initialize repositories
    let user_repo = UserRepository::new(Arc::clone(&db));
    let conversation_repo = ConversationRepository::new(Arc::clone(&db));
    let message_repo = MessageRepository::new(Arc::clone(&db));
    let attachment_repo = AttachmentRepository::new(Arc::clone(&db));

    // Attachment storage
    let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(
        config.storage.disk.clone(),
        config.storage.base_path.clone(),
        config.storage.base_url.clone(),
    ));
    info!(base_path = %config.storage.base_path.display(), "Using local attachment storage");

    // Realtime fan-out: Redis when configured, otherwise in-process only
    let hub = RealtimeHub::new();
    let mut pubsub: Option<Arc<RedisPubSub>> = None;
    let publisher: EventPublisherService = match &config.redis {
        Some(redis) => {
            info!("Connecting to Redis...");
            let redis_pubsub = Arc::new(RedisPubSub::new(&redis.url, &redis.prefix).await?);
            redis_pubsub.start().await?;

            let bridge_hub = hub.clone();
            PubSubSseBridge::new(Arc::clone(&redis_pubsub)).start(move |envelope| {
                let hub = bridge_hub.clone();
                tokio::spawn(async move {
                    hub.deliver(&envelope).await;
                });
            });

            pubsub = Some(Arc::clone(&redis_pubsub));
            redis_pubsub
        }
        None => {
            warn!("No Redis configured; realtime events stay within this instance");
            Arc::new(hub.clone())
        }
    };

    // Initialize services
    let message_service = MessageService::new(
        message_repo,
        user_repo.clone(),
        clock.clone(),
        config.messaging.clone(),
    );
    let attachment_service = AttachmentService::new(
        storage,
        attachment_repo,
        conversation_repo.clone(),
        config.storage.clone(),
        clock.clone(),
    );

    let mut conversation_service = ConversationService::new(
        conversation_repo.clone(),
        user_repo.clone(),
        message_service.clone(),
        clock.clone(),
    );
    conversation_service.set_event_publisher(publisher.clone());

    let mut messaging_service = MessagingService::new(
        conversation_repo,
        message_service,
        attachment_service.clone(),
        clock.clone(),
    );
    messaging_service.set_event_publisher(publisher);

    let user_service = UserService::new(user_repo, clock);

    // Background maintenance
    let scheduler = run_scheduler(
        SchedulerConfig::from(&config.maintenance),
        Arc::new(MaintenanceJobs::new(attachment_service.clone())),
    );

    let cleanup_hub = hub.clone();
    let hub_cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HUB_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cleanup_hub.cleanup().await;
        }
    });

    let state = AppState {
        user_service,
        conversation_service,
        messaging_service,
        attachment_service,
        realtime: hub,
    };

    // Build router
    let app = app(state, request_body_limit(&config.storage))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    hub_cleanup.abort();
    if let Some(pubsub) = pubsub {
        if let Err(e) = pubsub.shutdown().await {
            warn!(error = %e, "Redis Pub/Sub shutdown failed");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
