//! Background sweeper: hosts with silent heartbeats go `offline`, and an
//! offline host's live sessions are marked `crashed` once a further grace
//! period elapses.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use manman_core::model::ServerStatus;

use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

pub async fn run_sweeper(state: AppState, cancel: CancellationToken) {
    let offline_after = chrono::Duration::seconds(state.config.offline_after_secs as i64);
    let crash_after = offline_after
        + chrono::Duration::seconds(state.config.offline_session_grace_secs as i64);

    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = sweep_once(&state, offline_after, crash_after).await {
            tracing::warn!(target: "manman::sweeper", error = %e, "sweep failed");
        }
    }
    tracing::info!(target: "manman::sweeper", "sweeper stopped");
}

async fn sweep_once(
    state: &AppState,
    offline_after: chrono::Duration,
    crash_after: chrono::Duration,
) -> manman_core::Result<()> {
    // Pass 1: silence past the heartbeat threshold flips the host offline.
    for server in state.catalog.stale_online_servers(offline_after).await? {
        tracing::warn!(
            target: "manman::sweeper",
            server_id = server.server_id,
            name = %server.name,
            "heartbeat silent, marking host offline"
        );
        state
            .catalog
            .set_server_status(server.server_id, ServerStatus::Offline)
            .await?;
    }

    // Pass 2: once the grace period has also elapsed, the host's live
    // sessions cannot still be supervised; mark them crashed.
    let cutoff = Utc::now() - crash_after;
    let mut page = manman_core::catalog::Page {
        offset: 0,
        limit: manman_core::catalog::Page::MAX_PAGE_SIZE,
    };
    loop {
        let servers = state.catalog.list_servers(page).await?;
        let server_count = servers.len();
        for server in servers {
            let silent_too_long = server.status == ServerStatus::Offline
                && server.last_seen.is_none_or(|seen| seen < cutoff);
            if !silent_too_long {
                continue;
            }
            let crashed = state
                .catalog
                .crash_sessions_on_server(server.server_id, "host_offline")
                .await?;
            for session in &crashed {
                tracing::warn!(
                    target: "manman::sweeper",
                    server_id = server.server_id,
                    session_id = session.session_id,
                    "live session on offline host marked crashed"
                );
            }
        }
        if (server_count as i64) < page.limit {
            break;
        }
        page.offset += page.limit;
    }
    Ok(())
}
