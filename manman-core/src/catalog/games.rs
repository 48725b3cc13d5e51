//! Game and game-config repositories.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::error::{Error, Result};
use crate::model::{Game, GameConfig, GameMetadata, Volume};

#[derive(FromRow)]
struct GameRow {
    game_id: i64,
    name: String,
    steam_app_id: Option<i64>,
    metadata: serde_json::Value,
}

impl TryFrom<GameRow> for Game {
    type Error = Error;

    fn try_from(row: GameRow) -> Result<Self> {
        Ok(Game {
            game_id: row.game_id,
            name: row.name,
            steam_app_id: row.steam_app_id,
            metadata: serde_json::from_value::<GameMetadata>(row.metadata)
                .map_err(|e| Error::internal(format!("bad game metadata: {e}")))?,
        })
    }
}

#[derive(FromRow)]
struct GameConfigRow {
    config_id: i64,
    game_id: i64,
    name: String,
    image: String,
    args_template: serde_json::Value,
    env_template: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct VolumeRow {
    name: String,
    container_path: String,
    host_subpath: String,
    options: serde_json::Value,
}

impl GameConfigRow {
    fn into_config(self, volumes: Vec<Volume>) -> Result<GameConfig> {
        Ok(GameConfig {
            config_id: self.config_id,
            game_id: self.game_id,
            name: self.name,
            image: self.image,
            args_template: serde_json::from_value::<Vec<String>>(self.args_template)
                .map_err(|e| Error::internal(format!("bad args template: {e}")))?,
            env_template: serde_json::from_value::<BTreeMap<String, String>>(self.env_template)
                .map_err(|e| Error::internal(format!("bad env template: {e}")))?,
            volumes,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<VolumeRow> for Volume {
    type Error = Error;

    fn try_from(row: VolumeRow) -> Result<Self> {
        Ok(Volume {
            name: row.name,
            container_path: row.container_path,
            host_subpath: row.host_subpath,
            options: serde_json::from_value(row.options)
                .map_err(|e| Error::internal(format!("bad volume options: {e}")))?,
        })
    }
}

impl CatalogStore {
    pub async fn create_game(
        &self,
        name: &str,
        steam_app_id: Option<i64>,
        metadata: &GameMetadata,
    ) -> Result<Game> {
        if name.trim().is_empty() {
            return Err(Error::validation("game name must not be empty"));
        }
        let row: GameRow = sqlx::query_as(
            "INSERT INTO games (name, steam_app_id, metadata) VALUES ($1, $2, $3)
             RETURNING game_id, name, steam_app_id, metadata",
        )
        .bind(name)
        .bind(steam_app_id)
        .bind(serde_json::to_value(metadata).map_err(Error::from)?)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get_game(&self, game_id: i64) -> Result<Game> {
        let row: Option<GameRow> = sqlx::query_as(
            "SELECT game_id, name, steam_app_id, metadata FROM games WHERE game_id = $1",
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("game {game_id}")))?
            .try_into()
    }

    pub async fn list_games(&self, page: Page) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = sqlx::query_as(
            "SELECT game_id, name, steam_app_id, metadata FROM games
             ORDER BY game_id LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update_game(&self, game: &Game) -> Result<Game> {
        let row: Option<GameRow> = sqlx::query_as(
            "UPDATE games SET name = $2, steam_app_id = $3, metadata = $4
             WHERE game_id = $1
             RETURNING game_id, name, steam_app_id, metadata",
        )
        .bind(game.game_id)
        .bind(&game.name)
        .bind(game.steam_app_id)
        .bind(serde_json::to_value(&game.metadata).map_err(Error::from)?)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("game {}", game.game_id)))?
            .try_into()
    }

    /// Cascades to configs, strategies, parameters, addons and libraries.
    pub async fn delete_game(&self, game_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM games WHERE game_id = $1")
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_game_config(
        &self,
        game_id: i64,
        name: &str,
        image: &str,
        args_template: &[String],
        env_template: &BTreeMap<String, String>,
        volumes: &[Volume],
    ) -> Result<GameConfig> {
        if image.trim().is_empty() {
            return Err(Error::validation("game config image must not be empty"));
        }
        let mut tx = self.pool.begin().await?;
        let row: GameConfigRow = sqlx::query_as(
            "INSERT INTO game_configs (game_id, name, image, args_template, env_template)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING config_id, game_id, name, image, args_template, env_template, created_at",
        )
        .bind(game_id)
        .bind(name)
        .bind(image)
        .bind(serde_json::to_value(args_template).map_err(Error::from)?)
        .bind(serde_json::to_value(env_template).map_err(Error::from)?)
        .fetch_one(&mut *tx)
        .await?;
        for volume in volumes {
            sqlx::query(
                "INSERT INTO config_volumes (config_id, name, container_path, host_subpath, options)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(row.config_id)
            .bind(&volume.name)
            .bind(&volume.container_path)
            .bind(&volume.host_subpath)
            .bind(serde_json::to_value(&volume.options).map_err(Error::from)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        row.into_config(volumes.to_vec())
    }

    pub async fn get_game_config(&self, config_id: i64) -> Result<GameConfig> {
        let row: Option<GameConfigRow> = sqlx::query_as(
            "SELECT config_id, game_id, name, image, args_template, env_template, created_at
             FROM game_configs WHERE config_id = $1",
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| Error::not_found(format!("game config {config_id}")))?;
        let volumes = self.config_volumes(config_id).await?;
        row.into_config(volumes)
    }

    pub async fn list_game_configs(
        &self,
        game_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<GameConfig>> {
        let rows: Vec<GameConfigRow> = sqlx::query_as(
            "SELECT config_id, game_id, name, image, args_template, env_template, created_at
             FROM game_configs
             WHERE ($1::bigint IS NULL OR game_id = $1)
             ORDER BY config_id LIMIT $2 OFFSET $3",
        )
        .bind(game_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let volumes = self.config_volumes(row.config_id).await?;
            configs.push(row.into_config(volumes)?);
        }
        Ok(configs)
    }

    pub async fn update_game_config(&self, config: &GameConfig) -> Result<GameConfig> {
        let mut tx = self.pool.begin().await?;
        let row: Option<GameConfigRow> = sqlx::query_as(
            "UPDATE game_configs SET name = $2, image = $3, args_template = $4, env_template = $5
             WHERE config_id = $1
             RETURNING config_id, game_id, name, image, args_template, env_template, created_at",
        )
        .bind(config.config_id)
        .bind(&config.name)
        .bind(&config.image)
        .bind(serde_json::to_value(&config.args_template).map_err(Error::from)?)
        .bind(serde_json::to_value(&config.env_template).map_err(Error::from)?)
        .fetch_optional(&mut *tx)
        .await?;
        let row = row.ok_or_else(|| Error::not_found(format!("game config {}", config.config_id)))?;
        sqlx::query("DELETE FROM config_volumes WHERE config_id = $1")
            .bind(config.config_id)
            .execute(&mut *tx)
            .await?;
        for volume in &config.volumes {
            sqlx::query(
                "INSERT INTO config_volumes (config_id, name, container_path, host_subpath, options)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(config.config_id)
            .bind(&volume.name)
            .bind(&volume.container_path)
            .bind(&volume.host_subpath)
            .bind(serde_json::to_value(&volume.options).map_err(Error::from)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        row.into_config(config.volumes.clone())
    }

    /// Refused (FK restrict) while any deployment references the config.
    pub async fn delete_game_config(&self, config_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM game_configs WHERE config_id = $1")
            .bind(config_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let err = Error::from(e);
                if err.kind == crate::ErrorKind::FailedPrecondition {
                    Error::precondition(format!(
                        "game config {config_id} is referenced by a deployment"
                    ))
                } else {
                    err
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn config_volumes(&self, config_id: i64) -> Result<Vec<Volume>> {
        let rows: Vec<VolumeRow> = sqlx::query_as(
            "SELECT name, container_path, host_subpath, options
             FROM config_volumes WHERE config_id = $1 ORDER BY volume_id",
        )
        .bind(config_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
