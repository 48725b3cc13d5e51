//! Parameter definition and scoped-value repositories.

use std::collections::BTreeMap;

use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::error::{Error, Result};
use crate::model::{ParameterDefinition, ParameterType, PatchLevel};

#[derive(FromRow)]
struct DefinitionRow {
    param_id: i64,
    game_id: i64,
    key: String,
    param_type: String,
    required: bool,
    default_value: Option<String>,
    min_value: Option<i64>,
    max_value: Option<i64>,
    allowed_values: serde_json::Value,
}

impl TryFrom<DefinitionRow> for ParameterDefinition {
    type Error = Error;

    fn try_from(row: DefinitionRow) -> Result<Self> {
        Ok(ParameterDefinition {
            param_id: row.param_id,
            game_id: row.game_id,
            key: row.key,
            param_type: ParameterType::parse(&row.param_type)?,
            required: row.required,
            default_value: row.default_value,
            min_value: row.min_value,
            max_value: row.max_value,
            allowed_values: serde_json::from_value(row.allowed_values)
                .map_err(|e| Error::internal(format!("bad allowed_values: {e}")))?,
        })
    }
}

const DEFINITION_COLUMNS: &str = "param_id, game_id, key, param_type, required, default_value, \
                                  min_value, max_value, allowed_values";

impl CatalogStore {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_parameter_definition(
        &self,
        game_id: i64,
        key: &str,
        param_type: ParameterType,
        required: bool,
        default_value: Option<&str>,
        min_value: Option<i64>,
        max_value: Option<i64>,
        allowed_values: &[String],
    ) -> Result<ParameterDefinition> {
        if key.trim().is_empty() {
            return Err(Error::validation("parameter key must not be empty"));
        }
        let row: DefinitionRow = sqlx::query_as(&format!(
            "INSERT INTO parameter_definitions
                 (game_id, key, param_type, required, default_value, min_value, max_value, allowed_values)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {DEFINITION_COLUMNS}"
        ))
        .bind(game_id)
        .bind(key)
        .bind(param_type.as_str())
        .bind(required)
        .bind(default_value)
        .bind(min_value)
        .bind(max_value)
        .bind(serde_json::to_value(allowed_values).map_err(Error::from)?)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn list_parameter_definitions(
        &self,
        game_id: i64,
        page: Page,
    ) -> Result<Vec<ParameterDefinition>> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM parameter_definitions
             WHERE game_id = $1 ORDER BY param_id LIMIT $2 OFFSET $3"
        ))
        .bind(game_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// All definitions for a game, unpaginated (renderer input).
    pub async fn parameter_definitions_for_game(
        &self,
        game_id: i64,
    ) -> Result<Vec<ParameterDefinition>> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM parameter_definitions
             WHERE game_id = $1 ORDER BY param_id"
        ))
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete_parameter_definition(&self, param_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM parameter_definitions WHERE param_id = $1")
            .bind(param_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert one scoped value; `None` clears it.
    pub async fn set_parameter_value(
        &self,
        param_id: i64,
        scope: PatchLevel,
        entity_id: i64,
        value: Option<&str>,
    ) -> Result<bool> {
        match value {
            Some(value) => {
                sqlx::query(
                    "INSERT INTO parameter_values (param_id, scope, entity_id, value)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (param_id, scope, entity_id) DO UPDATE SET value = $4",
                )
                .bind(param_id)
                .bind(scope.as_str())
                .bind(entity_id)
                .bind(value)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            None => {
                let result = sqlx::query(
                    "DELETE FROM parameter_values
                     WHERE param_id = $1 AND scope = $2 AND entity_id = $3",
                )
                .bind(param_id)
                .bind(scope.as_str())
                .bind(entity_id)
                .execute(&self.pool)
                .await?;
                Ok(result.rows_affected() > 0)
            }
        }
    }

    /// Values stored at one scope, keyed by parameter key.
    pub async fn parameter_values_at(
        &self,
        scope: PatchLevel,
        entity_id: i64,
    ) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT d.key, v.value
             FROM parameter_values v
             JOIN parameter_definitions d ON d.param_id = v.param_id
             WHERE v.scope = $1 AND v.entity_id = $2",
        )
        .bind(scope.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }
}
