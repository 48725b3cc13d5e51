//! ManMan control plane entry point.
//!
//! Startup order: configuration, tracing, database (plus migrations),
//! broker, object store, consumers, sweeper, gRPC server. Shutdown drains
//! in reverse on SIGINT/SIGTERM.

mod api;
mod config;
mod consumers;
mod lifecycle;
mod logs;
mod object_store;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use manman_core::bus::{self, Broker};
use manman_core::catalog::CatalogStore;
use manman_proto::v1::man_man_api_server::ManManApiServer;
use manman_proto::v1::workshop_service_server::WorkshopServiceServer;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::api::{ApiService, WorkshopApi};
use crate::config::ServerConfig;
use crate::object_store::ObjectStore;
use crate::state::AppState;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load().context("loading configuration")?;
    config::init_tracing(config.log_format, &config.log_level);
    tracing::info!(port = config.port, "manman control plane starting");

    let catalog = CatalogStore::connect(&config.database_url(), config.db_max_connections)
        .await
        .context("connecting to database")?;
    catalog.run_migrations().await.context("running migrations")?;

    let broker = Arc::new(
        Broker::connect(&config.rabbitmq_url, bus::connect_policy())
            .await
            .context("connecting to broker")?,
    );
    let objects = ObjectStore::from_config(&config).await;

    let state = AppState::new(catalog, broker.clone(), objects, config.clone());

    let cancel = CancellationToken::new();
    let consumer_handles = consumers::spawn_all(state.clone(), cancel.clone())
        .await
        .context("starting consumers")?;
    let sweeper_handle = tokio::spawn(consumers::run_sweeper(state.clone(), cancel.clone()));

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ManManApiServer<ApiService>>()
        .await;
    health_reporter
        .set_serving::<WorkshopServiceServer<WorkshopApi>>()
        .await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(manman_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("building reflection service")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "gRPC server listening");

    Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(
            ManManApiServer::new(ApiService::new(state.clone()))
                .max_decoding_message_size(MAX_MESSAGE_SIZE)
                .max_encoding_message_size(MAX_MESSAGE_SIZE),
        )
        .add_service(
            WorkshopServiceServer::new(WorkshopApi::new(state.clone()))
                .max_decoding_message_size(MAX_MESSAGE_SIZE)
                .max_encoding_message_size(MAX_MESSAGE_SIZE),
        )
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("gRPC server failed")?;

    tracing::info!("shutting down: draining consumers");
    cancel.cancel();
    for handle in consumer_handles {
        let _ = handle.await;
    }
    let _ = sweeper_handle.await;
    broker.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
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
