//! ManMan host manager entry point.
//!
//! Boot order: configuration, tracing, engine, control plane
//! registration, broker, orphan recovery, then the command loop plus the
//! heartbeat and orphan-sweep tasks. Shutdown stops consuming, publishes
//! `offline` and drains within a short grace window.

mod api_client;
mod config;
mod datadir;
mod engine;
mod logstream;
mod supervisor;
mod workshop;

use std::sync::Arc;

use anyhow::Context;
use manman_core::bus::{self, Broker};
use manman_core::model::ServerStatus;
use tokio_util::sync::CancellationToken;

use crate::api_client::ApiClient;
use crate::config::HostConfig;
use crate::datadir::DataDirs;
use crate::engine::Engine;
use crate::supervisor::Supervisor;
use crate::workshop::AddonOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HostConfig::load().context("loading configuration")?;
    config::init_tracing(config.log_format, &config.log_level);

    let data_root = config.required_data_dir().context("HOST_DATA_DIR")?;
    let server_name = config.resolved_server_name().context("SERVER_NAME")?;
    tracing::info!(%server_name, data_root = %data_root.display(), "manman host manager starting");

    let engine = Engine::connect(&config.docker_socket).context("connecting to docker")?;
    let capabilities = engine
        .capabilities()
        .await
        .context("probing docker capabilities")?;

    let api = ApiClient::connect(&config)
        .await
        .context("connecting to control plane")?;
    let (server_id, environment) = api
        .register(&server_name, config.environment.as_deref(), &capabilities)
        .await
        .context("registering host")?;
    tracing::info!(server_id, environment = ?environment, "host registered");

    let broker = Arc::new(
        Broker::connect(&config.rabbitmq_url, bus::connect_policy())
            .await
            .context("connecting to broker")?,
    );

    let dirs = DataDirs::new(data_root, environment.clone());
    let orchestrator = AddonOrchestrator::new(
        engine.clone(),
        broker.clone(),
        dirs.clone(),
        server_id,
        environment.clone(),
        config.steamcmd_image.clone(),
        config.max_concurrent_downloads,
    );

    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(
        server_id,
        environment,
        engine,
        broker.clone(),
        dirs,
        api,
        orchestrator,
        config.stop_grace_secs as i64,
        cancel.clone(),
    );

    supervisor.publish_host_status(ServerStatus::Online).await;
    if let Err(e) = supervisor.recover_orphans().await {
        tracing::error!(error = %e, "orphan recovery failed; continuing");
    }

    let heartbeat = {
        let supervisor = supervisor.clone();
        let interval = config.heartbeat_interval_secs;
        tokio::spawn(async move { supervisor.run_heartbeat(interval).await })
    };
    let sweep = {
        let supervisor = supervisor.clone();
        let interval = config.orphan_sweep_interval_secs;
        tokio::spawn(async move { supervisor.run_orphan_sweep(interval).await })
    };
    let command_loop = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run_command_loop().await })
    };

    shutdown_signal().await;
    tracing::info!("shutting down: draining command loop");
    cancel.cancel();

    let drain = async {
        let _ = command_loop.await;
        let _ = heartbeat.await;
        let _ = sweep.await;
    };
    if tokio::time::timeout(std::time::Duration::from_secs(10), drain)
        .await
        .is_err()
    {
        tracing::warn!("drain timed out, shutting down anyway");
    }

    supervisor.publish_host_status(ServerStatus::Offline).await;
    broker.close().await;
    tracing::info!(
        dropped_log_lines = supervisor.dropped_log_lines(),
        "shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
