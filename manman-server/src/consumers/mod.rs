//! Durable consumers folding bus traffic back into the catalog, plus the
//! offline sweeper.

mod sweeper;

pub use sweeper::run_sweeper;

use manman_core::bus::messages::{
    HostHealthUpdate, HostStatusUpdate, InstallationStatusUpdate, LogBatchMessage,
    SessionStatusUpdate,
};
use manman_core::bus::{self, topics};
use manman_core::{Error, ErrorKind, Result};
use tokio_util::sync::CancellationToken;

use crate::logs;
use crate::state::AppState;

/// Declare the shared queues and spawn one consumer task per topic.
pub async fn spawn_all(
    state: AppState,
    cancel: CancellationToken,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let broker = &state.broker;
    broker
        .declare_queue(topics::QUEUE_SESSION_STATUS, &[topics::SESSION_STATUS_PATTERN])
        .await?;
    broker
        .declare_queue(topics::QUEUE_HOST_STATUS, &[topics::HOST_STATUS_PATTERN])
        .await?;
    broker
        .declare_queue(topics::QUEUE_HOST_HEALTH, &[topics::HOST_HEALTH_PATTERN])
        .await?;
    broker
        .declare_queue(
            topics::QUEUE_WORKSHOP_STATUS,
            &[topics::WORKSHOP_INSTALLATION_STATUS],
        )
        .await?;
    broker
        .declare_queue(topics::QUEUE_LOGS, &[topics::LOGS_BATCHED])
        .await?;

    let mut handles = Vec::new();
    handles.push(spawn_consumer(
        state.clone(),
        cancel.clone(),
        topics::QUEUE_SESSION_STATUS,
        "session-status",
        1,
        |state, payload| async move { handle_session_status(&state, &payload).await },
    ).await?);
    handles.push(spawn_consumer(
        state.clone(),
        cancel.clone(),
        topics::QUEUE_HOST_STATUS,
        "host-status",
        1,
        |state, payload| async move { handle_host_status(&state, &payload).await },
    ).await?);
    handles.push(spawn_consumer(
        state.clone(),
        cancel.clone(),
        topics::QUEUE_HOST_HEALTH,
        "host-health",
        8,
        |state, payload| async move { handle_host_health(&state, &payload).await },
    ).await?);
    handles.push(spawn_consumer(
        state.clone(),
        cancel.clone(),
        topics::QUEUE_WORKSHOP_STATUS,
        "workshop-status",
        1,
        |state, payload| async move { handle_workshop_status(&state, &payload).await },
    ).await?);
    handles.push(spawn_consumer(
        state.clone(),
        cancel.clone(),
        topics::QUEUE_LOGS,
        "log-batches",
        8,
        |state, payload| async move { handle_log_batch(&state, &payload).await },
    ).await?);
    Ok(handles)
}

async fn spawn_consumer<F, Fut>(
    state: AppState,
    cancel: CancellationToken,
    queue: &'static str,
    tag: &'static str,
    prefetch: u16,
    handler: F,
) -> Result<tokio::task::JoinHandle<()>>
where
    F: Fn(AppState, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    let channel = state.broker.create_channel().await?;
    Ok(tokio::spawn(async move {
        let handler_state = state.clone();
        let result = bus::consume(channel, queue, tag, prefetch, cancel, move |payload| {
            handler(handler_state.clone(), payload)
        })
        .await;
        if let Err(e) = result {
            tracing::error!(target: "manman::consumers", %queue, error = %e, "consumer exited with error");
        }
    }))
}

/// Fold a session status report into the catalog. Stale or out-of-order
/// transitions are ignored; a terminal session is never resurrected.
async fn handle_session_status(state: &AppState, payload: &[u8]) -> Result<()> {
    let update: SessionStatusUpdate = serde_json::from_slice(payload)?;
    match state.catalog.apply_session_status(&update).await {
        Ok(Some(session)) => {
            tracing::info!(
                target: "manman::consumers",
                session_id = session.session_id,
                status = session.status.as_str(),
                "session status applied"
            );
            Ok(())
        }
        Ok(None) => {
            tracing::debug!(
                target: "manman::consumers",
                session_id = update.session_id,
                status = update.status.as_str(),
                "stale session transition ignored"
            );
            Ok(())
        }
        Err(e) if e.kind == ErrorKind::NotFound => {
            // A report for a session the catalog never saw cannot succeed
            // on redelivery.
            Err(Error::permanent(format!(
                "status for unknown session {}",
                update.session_id
            )))
        }
        Err(e) => Err(e),
    }
}

async fn handle_host_status(state: &AppState, payload: &[u8]) -> Result<()> {
    let update: HostStatusUpdate = serde_json::from_slice(payload)?;
    state
        .catalog
        .set_server_status(update.server_id, update.status)
        .await?;
    tracing::info!(
        target: "manman::consumers",
        server_id = update.server_id,
        status = update.status.as_str(),
        "host status applied"
    );
    Ok(())
}

async fn handle_host_health(state: &AppState, payload: &[u8]) -> Result<()> {
    let update: HostHealthUpdate = serde_json::from_slice(payload)?;
    state
        .catalog
        .record_heartbeat(
            update.server_id,
            update.status,
            update.timestamp,
            &update.capabilities,
        )
        .await
}

async fn handle_workshop_status(state: &AppState, payload: &[u8]) -> Result<()> {
    let update: InstallationStatusUpdate = serde_json::from_slice(payload)?;
    match state.catalog.apply_installation_status(&update).await {
        Ok(Some(_)) | Ok(None) => Ok(()),
        Err(e) if e.kind == ErrorKind::NotFound => Err(Error::permanent(format!(
            "status for unknown installation {}",
            update.installation_id
        ))),
        Err(e) => Err(e),
    }
}

async fn handle_log_batch(state: &AppState, payload: &[u8]) -> Result<()> {
    let batch: LogBatchMessage = serde_json::from_slice(payload)?;
    logs::archive_batch(state, &batch).await
}
