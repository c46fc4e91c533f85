//! DRC-IO Agent - Disk bandwidth arbitration controller
//!
//! This binary runs as a DaemonSet on each Kubernetes node, discovering
//! priority-labeled pods and keeping Low-priority disk traffic inside its
//! configured band via cgroup-v2 `io.max`.

use anyhow::{Context, Result};
use drcio_lib::cgroup::CgroupResolver;
use drcio_lib::controller::Controller;
use drcio_lib::discovery::KubePodLister;
use drcio_lib::health::HealthRegistry;
use drcio_lib::observability::{ControllerMetrics, StructuredLogger};
use drcio_lib::StateHandle;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting drcio-agent");

    let config = config::AgentConfig::load().context("Invalid configuration")?;
    info!(node_name = %config.node_name, "Agent configured");

    // Touch the registry early so /metrics is complete from the first
    // scrape.
    let _ = ControllerMetrics::new();

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, config.poll_interval_secs);

    let health_registry = HealthRegistry::new();
    let controller_state = StateHandle::default();

    let lister = Arc::new(
        KubePodLister::new(config.api_timeout())
            .await
            .context("Failed to connect to the Kubernetes API")?,
    );

    let resolver = CgroupResolver::new(
        &config.cgroup_root,
        &config.shared_mount_path,
        config.resolve_ttl(),
    );

    let controller = Controller::new(
        config.controller_config(),
        lister,
        resolver,
        controller_state.clone(),
        health_registry.clone(),
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        controller_state,
        config.echo(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));
    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    wait_for_signal().await?;
    info!("Shutdown signal received");

    // The controller clears managed limits before exiting; wait for that
    // to finish.
    let _ = shutdown_tx.send(());
    let _ = controller_handle.await;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (the kubelet sends SIGTERM on pod deletion).
async fn wait_for_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
