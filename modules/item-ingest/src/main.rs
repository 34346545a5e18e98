use event_channel::{DeliveryChannel, InMemoryChannel, NatsChannel, NatsChannelConfig};
use item_ingest::config::{ChannelType, Config, StoreType};
use item_ingest::routes::{operator_router, AppState, SERVICE_NAME};
use item_ingest::runner::{RunnerConfig, SubscriptionRunner};
use item_ingest::stats::StatsTracker;
use item_ingest::store::{InMemoryStore, ItemStore, PgItemStore};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("Failed to load configuration");

    // Document store
    let store: Arc<dyn ItemStore> = match config.store_type {
        StoreType::Postgres => {
            let database_url = config
                .database_url
                .as_ref()
                .expect("DATABASE_URL required for postgres store");
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            Arc::new(PgItemStore::new(pool))
        }
        StoreType::InMemory => {
            tracing::info!("Using in-memory item store");
            Arc::new(InMemoryStore::new())
        }
    };

    // Delivery channel
    let channel: Arc<dyn DeliveryChannel> = match config.channel_type {
        ChannelType::Nats => {
            let nats_url = config
                .nats_url
                .as_ref()
                .expect("NATS_URL required for NATS channel");
            tracing::info!("Connecting to NATS at {}", nats_url);
            let client = async_nats::connect(nats_url)
                .await
                .expect("Failed to connect to NATS");

            let channel = NatsChannel::connect(
                client,
                NatsChannelConfig {
                    stream_name: config.stream_name.clone(),
                    subjects: vec![config.subject.clone()],
                    consumer_name: config.consumer_name.clone(),
                    ack_wait: config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .expect("Failed to provision JetStream stream");

            Arc::new(channel)
        }
        ChannelType::InMemory => {
            tracing::info!("Using in-memory delivery channel");
            Arc::new(InMemoryChannel::new())
        }
    };

    // Running degraded and silently failing is worse than not starting
    channel
        .check_connection()
        .await
        .expect("Delivery channel not reachable at startup");
    store
        .ping()
        .await
        .expect("Document store not reachable at startup");

    let stats = Arc::new(StatsTracker::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = SubscriptionRunner::new(
        channel.clone(),
        store.clone(),
        stats.clone(),
        RunnerConfig {
            max_in_flight: config.max_in_flight,
            ack_extend_interval: config.ack_extend_interval(),
            processed_by: SERVICE_NAME.to_string(),
        },
    );
    let runner_handle = tokio::spawn(async move {
        if let Err(e) = runner.run(shutdown_rx).await {
            tracing::error!("Failed to open the delivery stream: {}", e);
            std::process::exit(1);
        }
    });

    let state = AppState {
        stats: stats.clone(),
        channel: channel.clone(),
        store: store.clone(),
    };

    let app = operator_router(state).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr = SocketAddr::new(
        config.host.parse().expect("HOST must be an IP address"),
        config.port,
    );
    tracing::info!(
        subject = %config.subject,
        consumer = %config.consumer_name,
        "Item ingest service listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");

    // HTTP is down; stop intake and drain in-flight deliveries before exit
    let _ = shutdown_tx.send(true);
    if let Err(e) = runner_handle.await {
        tracing::error!("Runner task panicked: {}", e);
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal. Starting graceful shutdown...");
}
