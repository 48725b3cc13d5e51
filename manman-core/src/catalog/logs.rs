//! Log reference and backup repositories.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::error::{Error, Result};
use crate::model::{Backup, LogReference, LogSource};

#[derive(FromRow)]
struct LogReferenceRow {
    log_ref_id: i64,
    session_id: i64,
    file_path: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    line_count: i64,
    source: String,
}

impl TryFrom<LogReferenceRow> for LogReference {
    type Error = Error;

    fn try_from(row: LogReferenceRow) -> Result<Self> {
        Ok(LogReference {
            log_ref_id: row.log_ref_id,
            session_id: row.session_id,
            file_path: row.file_path,
            start_time: row.start_time,
            end_time: row.end_time,
            line_count: row.line_count,
            source: LogSource::parse(&row.source)?,
        })
    }
}

#[derive(FromRow)]
struct BackupRow {
    backup_id: i64,
    session_id: i64,
    sgc_id: i64,
    object_url: String,
    size_bytes: i64,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BackupRow> for Backup {
    fn from(row: BackupRow) -> Self {
        Backup {
            backup_id: row.backup_id,
            session_id: row.session_id,
            sgc_id: row.sgc_id,
            object_url: row.object_url,
            size_bytes: row.size_bytes,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

const LOG_REF_COLUMNS: &str =
    "log_ref_id, session_id, file_path, start_time, end_time, line_count, source";
const BACKUP_COLUMNS: &str =
    "backup_id, session_id, sgc_id, object_url, size_bytes, description, created_at";

impl CatalogStore {
    pub async fn insert_log_reference(
        &self,
        session_id: i64,
        file_path: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        line_count: i64,
        source: LogSource,
    ) -> Result<LogReference> {
        let row: LogReferenceRow = sqlx::query_as(&format!(
            "INSERT INTO log_references (session_id, file_path, start_time, end_time, line_count, source)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {LOG_REF_COLUMNS}"
        ))
        .bind(session_id)
        .bind(file_path)
        .bind(start_time)
        .bind(end_time)
        .bind(line_count)
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    /// Log references whose window intersects `[start, end]`, in
    /// ascending start order.
    pub async fn log_references_in_window(
        &self,
        session_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogReference>> {
        let rows: Vec<LogReferenceRow> = sqlx::query_as(&format!(
            "SELECT {LOG_REF_COLUMNS} FROM log_references
             WHERE session_id = $1 AND start_time <= $3 AND end_time >= $2
             ORDER BY start_time, log_ref_id"
        ))
        .bind(session_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Earliest start and latest end across a session's archived logs.
    pub async fn log_bounds(
        &self,
        session_id: i64,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT MIN(start_time), MAX(end_time) FROM log_references WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some((Some(min), Some(max))) => Some((min, max)),
            _ => None,
        })
    }

    pub async fn record_backup(
        &self,
        session_id: i64,
        sgc_id: i64,
        object_url: &str,
        size_bytes: i64,
        description: Option<&str>,
    ) -> Result<Backup> {
        let row: BackupRow = sqlx::query_as(&format!(
            "INSERT INTO backups (session_id, sgc_id, object_url, size_bytes, description)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {BACKUP_COLUMNS}"
        ))
        .bind(session_id)
        .bind(sgc_id)
        .bind(object_url)
        .bind(size_bytes)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn list_backups(
        &self,
        sgc_id: Option<i64>,
        session_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Backup>> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups
             WHERE ($1::bigint IS NULL OR sgc_id = $1)
               AND ($2::bigint IS NULL OR session_id = $2)
             ORDER BY backup_id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(sgc_id)
        .bind(session_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
