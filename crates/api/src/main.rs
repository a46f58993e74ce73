//! Courier service binary: HTTP ingress, connection hub, and delivery
//! worker in one process.

use std::net::SocketAddr;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_hub::Hub;
use courier_notifier::{DeliveryWorker, EmailNotifier};
use courier_queue::StreamBroker;

use courier_api::routes::create_router;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "courier_api=debug,courier_queue=debug,courier_hub=debug,\
                 courier_notifier=debug,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting Courier notification service...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect the queue broker (bounded startup retry inside)
    let broker = StreamBroker::connect(&config.redis_url).await?;
    tracing::info!("Queue broker connected");

    // Start the connection hub control loop
    let (hub, hub_runner) = Hub::new();
    let hub_task = tokio::spawn(hub_runner.run());

    // Start the delivery worker
    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = DeliveryWorker::new(
        broker.clone(),
        hub.clone(),
        EmailNotifier::new(&config),
        config.worker_max_retries,
        Duration::from_secs(config.worker_retry_delay_secs),
    );
    // The worker cancels the token when it exits for any reason, so a dead
    // consumer tears the server down instead of leaving an ingress that
    // accepts jobs nothing drains.
    let worker_shutdown = shutdown.clone();
    let worker_task = tokio::spawn(async move { worker.run_linked(worker_shutdown).await });

    // Build application state and router
    let state = AppState::new(broker.clone(), hub.clone(), config.clone());
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received shutdown signal, stopping gracefully...");
                }
                _ = server_shutdown.cancelled() => {
                    tracing::info!("Delivery worker gone, stopping server");
                }
            }
        })
        .await?;

    // The listener is closed; drain the pipeline in dependency order. The
    // worker gets a grace period so an in-flight job (retry sleeps included)
    // can ack or dead-letter its entry.
    shutdown.cancel();
    if tokio::time::timeout(
        Duration::from_secs(config.shutdown_grace_secs),
        worker_task,
    )
    .await
    .is_err()
    {
        tracing::warn!("Delivery worker did not stop within the grace period");
    }

    hub.stop();
    let _ = tokio::time::timeout(Duration::from_secs(1), hub_task).await;

    broker.close().await?;
    tracing::info!("Courier notification service stopped.");
    Ok(())
}
