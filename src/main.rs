use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod broker;
mod cache;
mod config;
mod coordinator;
mod db;
mod error;
mod messages;
mod middleware;
mod monitor;
mod monitoring;
mod notify;
mod producers;
mod results;
mod routes;

use broker::BrokerAdapter;
use cache::KvCache;
use config::Config;
use coordinator::Coordinator;
use monitor::TaskMonitor;
use monitoring::alerts::AlertStore;
use monitoring::collector::MonitoringCollector;
use notify::providers::{EmailProvider, WebhookProvider};
use notify::NotificationEngine;
use producers::{ArchiveProducer, CleanupProducer, Component};
use results::ResultHandler;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub coordinator: Arc<Coordinator>,
    pub monitoring: Arc<MonitoringCollector>,
    pub notify_engine: Arc<NotificationEngine>,
    pub alerts: Arc<AlertStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drone_scheduler=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("starting drone task scheduler");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let broker = Arc::new(BrokerAdapter::new(config.broker.clone()));
    let cache = KvCache::connect(&config.cache).await?;
    let alerts = Arc::new(AlertStore::new());

    let result_handler = Arc::new(ResultHandler::new(pool.clone(), broker.clone()));
    let archive_producer = Arc::new(ArchiveProducer::new(
        pool.clone(),
        broker.clone(),
        config.archive_producer.clone(),
    ));
    let cleanup_producer = Arc::new(CleanupProducer::new(broker.clone(), config.cleanup_producer.clone()));
    let task_monitor = Arc::new(TaskMonitor::new(
        pool.clone(),
        broker.clone(),
        config.task_monitor.clone(),
    ));

    let coordinator = Arc::new(Coordinator::new(
        result_handler,
        archive_producer,
        cleanup_producer,
        task_monitor,
        broker,
    ));

    let providers: Vec<Arc<dyn notify::ChannelProvider>> = vec![
        Arc::new(EmailProvider::new(config.smtp.clone())),
        Arc::new(WebhookProvider::new(
            config.webhook.clone(),
            "drone-task-scheduler".to_string(),
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string()),
        )?),
    ];
    let notify_engine = Arc::new(NotificationEngine::new(
        pool.clone(),
        cache.clone(),
        config.notification_retry.clone(),
        providers,
    ));

    let monitoring = Arc::new(MonitoringCollector::new(
        pool.clone(),
        coordinator.broker.clone(),
        cache,
        alerts.clone(),
        notify_engine.clone(),
    ));

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        coordinator: coordinator.clone(),
        monitoring: monitoring.clone(),
        notify_engine: notify_engine.clone(),
        alerts,
    });

    coordinator.start().await?;
    monitoring.start().await?;
    notify_engine.start().await?;

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            if let Err(e) = result {
                tracing::error!("server error: {:?}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    notify_engine.stop().await?;
    monitoring.stop().await?;
    coordinator.stop().await;

    Ok(())
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
}
