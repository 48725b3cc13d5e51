//! Deployment (server game config) repository.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::error::{Error, Result};
use crate::model::{Deployment, PortBinding, PortProtocol};

#[derive(FromRow)]
struct DeploymentRow {
    sgc_id: i64,
    server_id: i64,
    game_config_id: i64,
    parameters: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PortRow {
    container_port: i32,
    host_port: i32,
    protocol: String,
}

impl TryFrom<PortRow> for PortBinding {
    type Error = Error;

    fn try_from(row: PortRow) -> Result<Self> {
        Ok(PortBinding {
            container_port: u16::try_from(row.container_port)
                .map_err(|_| Error::internal("container port out of range"))?,
            host_port: u16::try_from(row.host_port)
                .map_err(|_| Error::internal("host port out of range"))?,
            protocol: PortProtocol::parse(&row.protocol)?,
        })
    }
}

impl DeploymentRow {
    fn into_deployment(self, port_bindings: Vec<PortBinding>) -> Result<Deployment> {
        Ok(Deployment {
            sgc_id: self.sgc_id,
            server_id: self.server_id,
            game_config_id: self.game_config_id,
            port_bindings,
            parameters: serde_json::from_value::<BTreeMap<String, String>>(self.parameters)
                .map_err(|e| Error::internal(format!("bad deployment parameters: {e}")))?,
            created_at: self.created_at,
        })
    }
}

/// A host port already claimed by another live deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConflict {
    pub sgc_id: i64,
    pub host_port: u16,
    pub protocol: PortProtocol,
}

impl CatalogStore {
    pub async fn create_deployment(
        &self,
        server_id: i64,
        game_config_id: i64,
        port_bindings: &[PortBinding],
        parameters: &BTreeMap<String, String>,
    ) -> Result<Deployment> {
        let mut tx = self.pool.begin().await?;
        let row: DeploymentRow = sqlx::query_as(
            "INSERT INTO server_game_configs (server_id, game_config_id, parameters)
             VALUES ($1, $2, $3)
             RETURNING sgc_id, server_id, game_config_id, parameters, created_at",
        )
        .bind(server_id)
        .bind(game_config_id)
        .bind(serde_json::to_value(parameters).map_err(Error::from)?)
        .fetch_one(&mut *tx)
        .await?;
        for binding in port_bindings {
            sqlx::query(
                "INSERT INTO sgc_port_bindings (sgc_id, container_port, host_port, protocol)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.sgc_id)
            .bind(i32::from(binding.container_port))
            .bind(i32::from(binding.host_port))
            .bind(binding.protocol.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        row.into_deployment(port_bindings.to_vec())
    }

    pub async fn get_deployment(&self, sgc_id: i64) -> Result<Deployment> {
        let row: Option<DeploymentRow> = sqlx::query_as(
            "SELECT sgc_id, server_id, game_config_id, parameters, created_at
             FROM server_game_configs WHERE sgc_id = $1",
        )
        .bind(sgc_id)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| Error::not_found(format!("deployment {sgc_id}")))?;
        let ports = self.deployment_ports(sgc_id).await?;
        row.into_deployment(ports)
    }

    pub async fn list_deployments(
        &self,
        server_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Deployment>> {
        let rows: Vec<DeploymentRow> = sqlx::query_as(
            "SELECT sgc_id, server_id, game_config_id, parameters, created_at
             FROM server_game_configs
             WHERE ($1::bigint IS NULL OR server_id = $1)
             ORDER BY sgc_id LIMIT $2 OFFSET $3",
        )
        .bind(server_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        let mut deployments = Vec::with_capacity(rows.len());
        for row in rows {
            let ports = self.deployment_ports(row.sgc_id).await?;
            deployments.push(row.into_deployment(ports)?);
        }
        Ok(deployments)
    }

    pub async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut tx = self.pool.begin().await?;
        let row: Option<DeploymentRow> = sqlx::query_as(
            "UPDATE server_game_configs SET parameters = $2
             WHERE sgc_id = $1
             RETURNING sgc_id, server_id, game_config_id, parameters, created_at",
        )
        .bind(deployment.sgc_id)
        .bind(serde_json::to_value(&deployment.parameters).map_err(Error::from)?)
        .fetch_optional(&mut *tx)
        .await?;
        let row =
            row.ok_or_else(|| Error::not_found(format!("deployment {}", deployment.sgc_id)))?;
        sqlx::query("DELETE FROM sgc_port_bindings WHERE sgc_id = $1")
            .bind(deployment.sgc_id)
            .execute(&mut *tx)
            .await?;
        for binding in &deployment.port_bindings {
            sqlx::query(
                "INSERT INTO sgc_port_bindings (sgc_id, container_port, host_port, protocol)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(deployment.sgc_id)
            .bind(i32::from(binding.container_port))
            .bind(i32::from(binding.host_port))
            .bind(binding.protocol.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        row.into_deployment(deployment.port_bindings.clone())
    }

    /// Refused while a live session exists on the deployment.
    pub async fn delete_deployment(&self, sgc_id: i64) -> Result<bool> {
        if !self.live_sessions_for_sgc(sgc_id).await?.is_empty() {
            return Err(Error::precondition(format!(
                "deployment {sgc_id} has a live session"
            )));
        }
        let result = sqlx::query("DELETE FROM server_game_configs WHERE sgc_id = $1")
            .bind(sgc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Requested bindings that collide with another live deployment's
    /// bindings on the same server.
    pub async fn port_conflicts(
        &self,
        server_id: i64,
        requested: &[PortBinding],
        exclude_sgc: Option<i64>,
    ) -> Result<Vec<PortConflict>> {
        let rows: Vec<(i64, i32, String)> = sqlx::query_as(
            "SELECT pb.sgc_id, pb.host_port, pb.protocol
             FROM sgc_port_bindings pb
             JOIN server_game_configs sgc ON sgc.sgc_id = pb.sgc_id
             WHERE sgc.server_id = $1 AND ($2::bigint IS NULL OR pb.sgc_id <> $2)",
        )
        .bind(server_id)
        .bind(exclude_sgc)
        .fetch_all(&self.pool)
        .await?;

        let mut conflicts = Vec::new();
        for binding in requested {
            for (sgc_id, host_port, protocol) in &rows {
                if i32::from(binding.host_port) == *host_port
                    && binding.protocol.as_str() == protocol
                {
                    conflicts.push(PortConflict {
                        sgc_id: *sgc_id,
                        host_port: binding.host_port,
                        protocol: binding.protocol,
                    });
                }
            }
        }
        Ok(conflicts)
    }

    async fn deployment_ports(&self, sgc_id: i64) -> Result<Vec<PortBinding>> {
        let rows: Vec<PortRow> = sqlx::query_as(
            "SELECT container_port, host_port, protocol
             FROM sgc_port_bindings WHERE sgc_id = $1
             ORDER BY host_port, protocol",
        )
        .bind(sgc_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
