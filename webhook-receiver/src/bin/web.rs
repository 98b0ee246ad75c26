//! Twilio Webhooks Web Server.
//!
//! This binary:
//! - Receives Twilio webhooks on a single endpoint (plus keyed variants)
//! - Verifies the request signature
//! - Records every accepted call
//! - Broadcasts an event and enqueues the configured follow-up job

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use twilio_webhooks::store::open_store;
use twilio_webhooks::{router, AppState, Config, JobRegistry, Publisher, SpawnSink};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        webhook_path = %config.webhook_path,
        signing_secret_configured = config.signing_secret.is_some(),
        keyed_secrets = config.keyed_signing_secrets.len(),
        type_keys = ?config.type_keys,
        routes = config.jobs.len(),
        store = ?config.store,
        amqp_configured = config.cloudamqp_url.is_some(),
        "config_loaded"
    );

    if !config.verify_signature {
        warn!("webhook_signature_verification_disabled");
    }

    let store = open_store(&config)
        .await
        .context("Failed to open webhook store")?;

    let publisher = config
        .cloudamqp_url
        .clone()
        .map(|url| Publisher::new(url, config.job_queue.clone()));
    if publisher.is_some() {
        info!(queue = %config.job_queue, "rabbitmq_publisher_created");
    }

    let registry = JobRegistry::with_builtin_jobs(publisher.clone());
    let port = config.port;
    let state = AppState::new(config, store, registry, Arc::new(SpawnSink));

    for (event_type, job_class) in state.controller.dispatcher().unregistered_routes() {
        warn!(
            event_type = %event_type,
            job_class = %job_class,
            "webhook_route_job_class_not_registered"
        );
    }

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(publisher) = publisher {
        publisher.close().await;
    }

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
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
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
