//! Session repository and the catalog side of the status state machine.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::bus::messages::SessionStatusUpdate;
use crate::error::{Error, Result};
use crate::model::{Session, SessionStatus};

#[derive(FromRow)]
struct SessionRow {
    session_id: i64,
    sgc_id: i64,
    status: String,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    error_message: Option<String>,
}

impl TryFrom<SessionRow> for Session {
    type Error = Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Session {
            session_id: row.session_id,
            sgc_id: row.sgc_id,
            status: SessionStatus::parse(&row.status)?,
            started_at: row.started_at,
            stopped_at: row.stopped_at,
            exit_code: row.exit_code,
            error_message: row.error_message,
        })
    }
}

const SESSION_COLUMNS: &str =
    "session_id, sgc_id, status, started_at, stopped_at, exit_code, error_message";

/// Filters for `ListSessions`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub live_only: bool,
    pub server_id: Option<i64>,
    pub status_in: Vec<SessionStatus>,
    pub sgc_id: Option<i64>,
}

impl CatalogStore {
    pub async fn create_session(&self, sgc_id: i64) -> Result<Session> {
        let row: SessionRow = sqlx::query_as(&format!(
            "INSERT INTO sessions (sgc_id) VALUES ($1) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(sgc_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("session {session_id}")))?
            .try_into()
    }

    pub async fn list_sessions(&self, filter: &SessionFilter, page: Page) -> Result<Vec<Session>> {
        let statuses: Vec<String> = filter
            .status_in
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT s.session_id, s.sgc_id, s.status, s.started_at, s.stopped_at,
                    s.exit_code, s.error_message
             FROM sessions s
             JOIN server_game_configs sgc ON sgc.sgc_id = s.sgc_id
             WHERE ($1::boolean = FALSE OR s.status NOT IN ('stopped', 'crashed'))
               AND ($2::bigint IS NULL OR sgc.server_id = $2)
               AND (cardinality($3::text[]) = 0 OR s.status = ANY($3))
               AND ($4::bigint IS NULL OR s.sgc_id = $4)
             ORDER BY s.session_id LIMIT $5 OFFSET $6"
        ))
        .bind(filter.live_only)
        .bind(filter.server_id)
        .bind(&statuses)
        .bind(filter.sgc_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Non-terminal sessions for one deployment.
    pub async fn live_sessions_for_sgc(&self, sgc_id: i64) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE sgc_id = $1 AND status NOT IN ('stopped', 'crashed')
             ORDER BY session_id"
        ))
        .bind(sgc_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Non-terminal sessions on one host (orphan recovery, offline sweep).
    pub async fn live_sessions_on_server(&self, server_id: i64) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT s.session_id, s.sgc_id, s.status, s.started_at, s.stopped_at,
                    s.exit_code, s.error_message
             FROM sessions s
             JOIN server_game_configs sgc ON sgc.sgc_id = s.sgc_id
             WHERE sgc.server_id = $1 AND s.status NOT IN ('stopped', 'crashed')
             ORDER BY s.session_id",
        )
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Fold a status report into the catalog under the monotonic rule.
    ///
    /// Returns the updated row, or `None` when the transition was ignored
    /// (out of order, duplicate, or aimed at a terminal session). The
    /// update is guarded by an optimistic `WHERE status = $old` so racing
    /// consumers cannot double-apply.
    pub async fn apply_session_status(
        &self,
        update: &SessionStatusUpdate,
    ) -> Result<Option<Session>> {
        let current = self.get_session(update.session_id).await?;
        if !current.status.can_transition_to(update.status) {
            return Ok(None);
        }

        let started_at = match update.status {
            SessionStatus::Running if current.started_at.is_none() => Some(update.timestamp),
            _ => current.started_at,
        };
        let stopped_at = match update.status {
            SessionStatus::Stopped | SessionStatus::Crashed if current.stopped_at.is_none() => {
                Some(update.timestamp)
            }
            _ => current.stopped_at,
        };

        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "UPDATE sessions
             SET status = $3, started_at = $4, stopped_at = $5,
                 exit_code = COALESCE($6, exit_code),
                 error_message = COALESCE($7, error_message)
             WHERE session_id = $1 AND status = $2
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(update.session_id)
        .bind(current.status.as_str())
        .bind(update.status.as_str())
        .bind(started_at)
        .bind(stopped_at)
        .bind(update.exit_code)
        .bind(update.error_message.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            // Lost the optimistic race; the other writer's transition won.
            None => Ok(None),
        }
    }

    /// Mark every live session on a host `crashed` (host went offline).
    /// Returns the sessions that were transitioned.
    pub async fn crash_sessions_on_server(
        &self,
        server_id: i64,
        reason: &str,
    ) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "UPDATE sessions s
             SET status = 'crashed', stopped_at = now(), error_message = $2
             FROM server_game_configs sgc
             WHERE sgc.sgc_id = s.sgc_id AND sgc.server_id = $1
               AND s.status NOT IN ('stopped', 'crashed')
             RETURNING s.session_id, s.sgc_id, s.status, s.started_at, s.stopped_at,
                       s.exit_code, s.error_message",
        )
        .bind(server_id)
        .bind(reason)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
