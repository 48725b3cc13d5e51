//! Host registry and capability samples.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::error::{Error, Result};
use crate::model::{CapabilitySample, Server, ServerStatus};

#[derive(FromRow)]
struct ServerRow {
    server_id: i64,
    name: String,
    environment: Option<String>,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    is_default: bool,
}

impl TryFrom<ServerRow> for Server {
    type Error = Error;

    fn try_from(row: ServerRow) -> Result<Self> {
        Ok(Server {
            server_id: row.server_id,
            name: row.name,
            environment: row.environment,
            status: ServerStatus::parse(&row.status)?,
            last_seen: row.last_seen,
            is_default: row.is_default,
        })
    }
}

const SERVER_COLUMNS: &str = "server_id, name, environment, status, last_seen, is_default";

impl CatalogStore {
    /// Idempotent registration: find-or-create by name, set the row
    /// `online` with a fresh `last_seen`, append a capability sample.
    /// The first registered host becomes the default.
    pub async fn register_server(
        &self,
        name: &str,
        environment: Option<&str>,
        capabilities: &CapabilitySample,
    ) -> Result<Server> {
        if name.trim().is_empty() {
            return Err(Error::validation("server name must not be empty"));
        }
        let mut tx = self.pool.begin().await?;
        let existing: Option<ServerRow> = sqlx::query_as(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE name = $1 FOR UPDATE"
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let row: ServerRow = match existing {
            Some(row) => {
                sqlx::query_as(&format!(
                    "UPDATE servers SET status = 'online', last_seen = now(),
                            environment = COALESCE($2, environment)
                     WHERE server_id = $1
                     RETURNING {SERVER_COLUMNS}"
                ))
                .bind(row.server_id)
                .bind(environment)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "INSERT INTO servers (name, environment, status, last_seen, is_default)
                     VALUES ($1, $2, 'online', now(),
                             NOT EXISTS (SELECT 1 FROM servers))
                     RETURNING {SERVER_COLUMNS}"
                ))
                .bind(name)
                .bind(environment)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query(
            "INSERT INTO server_capabilities
                 (server_id, total_memory_mb, available_memory_mb, cpu_cores,
                  available_cpu_millicores, docker_version)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(row.server_id)
        .bind(capabilities.total_memory_mb)
        .bind(capabilities.available_memory_mb)
        .bind(capabilities.cpu_cores)
        .bind(capabilities.available_cpu_millicores)
        .bind(&capabilities.docker_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    pub async fn get_server(&self, server_id: i64) -> Result<Server> {
        let row: Option<ServerRow> = sqlx::query_as(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE server_id = $1"
        ))
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("server {server_id}")))?
            .try_into()
    }

    pub async fn list_servers(&self, page: Page) -> Result<Vec<Server>> {
        let rows: Vec<ServerRow> = sqlx::query_as(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers ORDER BY server_id LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn set_server_status(&self, server_id: i64, status: ServerStatus) -> Result<()> {
        sqlx::query("UPDATE servers SET status = $2 WHERE server_id = $1")
            .bind(server_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Heartbeat bookkeeping: status, `last_seen` and a capability sample.
    pub async fn record_heartbeat(
        &self,
        server_id: i64,
        status: ServerStatus,
        seen_at: DateTime<Utc>,
        capabilities: &CapabilitySample,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE servers SET status = $2, last_seen = $3 WHERE server_id = $1")
            .bind(server_id)
            .bind(status.as_str())
            .bind(seen_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO server_capabilities
                 (server_id, total_memory_mb, available_memory_mb, cpu_cores,
                  available_cpu_millicores, docker_version, observed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(server_id)
        .bind(capabilities.total_memory_mb)
        .bind(capabilities.available_memory_mb)
        .bind(capabilities.cpu_cores)
        .bind(capabilities.available_cpu_millicores)
        .bind(&capabilities.docker_version)
        .bind(seen_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn latest_capability(&self, server_id: i64) -> Result<Option<CapabilitySample>> {
        #[derive(FromRow)]
        struct Row {
            total_memory_mb: i64,
            available_memory_mb: i64,
            cpu_cores: i32,
            available_cpu_millicores: i64,
            docker_version: String,
        }
        let row: Option<Row> = sqlx::query_as(
            "SELECT total_memory_mb, available_memory_mb, cpu_cores,
                    available_cpu_millicores, docker_version
             FROM server_capabilities WHERE server_id = $1
             ORDER BY observed_at DESC LIMIT 1",
        )
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| CapabilitySample {
            total_memory_mb: r.total_memory_mb,
            available_memory_mb: r.available_memory_mb,
            cpu_cores: r.cpu_cores,
            available_cpu_millicores: r.available_cpu_millicores,
            docker_version: r.docker_version,
        }))
    }

    /// Hosts still marked `online` whose heartbeat is older than the
    /// threshold; input to the offline sweeper.
    pub async fn stale_online_servers(&self, older_than: Duration) -> Result<Vec<Server>> {
        let cutoff = Utc::now() - older_than;
        let rows: Vec<ServerRow> = sqlx::query_as(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers
             WHERE status = 'online' AND (last_seen IS NULL OR last_seen < $1)"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
