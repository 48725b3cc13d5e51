//! Configuration strategy, binding and patch repositories.

use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::error::{Error, Result};
use crate::model::{
    BindingType, ConfigurationPatch, ConfigurationStrategy, PatchFormat, PatchLevel,
    StrategyOptions, StrategyParameterBinding, StrategyType,
};

#[derive(FromRow)]
struct StrategyRow {
    strategy_id: i64,
    game_id: i64,
    name: String,
    strategy_type: String,
    target_path: Option<String>,
    base_template: Option<String>,
    render_options: serde_json::Value,
    apply_order: i32,
}

impl TryFrom<StrategyRow> for ConfigurationStrategy {
    type Error = Error;

    fn try_from(row: StrategyRow) -> Result<Self> {
        let strategy_type = StrategyType::parse(&row.strategy_type)?;
        // Rows written before options were typed carry an empty bag; fall
        // back to the variant the type implies.
        let render_options = if row.render_options.is_null()
            || row.render_options.as_object().is_some_and(|o| o.is_empty())
        {
            StrategyOptions::default_for(strategy_type)
        } else {
            serde_json::from_value(row.render_options)
                .map_err(|e| Error::internal(format!("bad render options: {e}")))?
        };
        Ok(ConfigurationStrategy {
            strategy_id: row.strategy_id,
            game_id: row.game_id,
            name: row.name,
            strategy_type,
            target_path: row.target_path,
            base_template: row.base_template,
            render_options,
            apply_order: row.apply_order,
        })
    }
}

#[derive(FromRow)]
struct BindingRow {
    binding_id: i64,
    strategy_id: i64,
    param_id: i64,
    binding_type: String,
    target_key: String,
    value_template: Option<String>,
    condition_expr: Option<String>,
}

impl TryFrom<BindingRow> for StrategyParameterBinding {
    type Error = Error;

    fn try_from(row: BindingRow) -> Result<Self> {
        Ok(StrategyParameterBinding {
            binding_id: row.binding_id,
            strategy_id: row.strategy_id,
            param_id: row.param_id,
            binding_type: BindingType::parse(&row.binding_type)?,
            target_key: row.target_key,
            value_template: row.value_template,
            condition_expr: row.condition_expr,
        })
    }
}

#[derive(FromRow)]
struct PatchRow {
    patch_id: i64,
    strategy_id: i64,
    patch_level: String,
    entity_id: i64,
    patch_content: String,
    patch_format: String,
}

impl TryFrom<PatchRow> for ConfigurationPatch {
    type Error = Error;

    fn try_from(row: PatchRow) -> Result<Self> {
        Ok(ConfigurationPatch {
            patch_id: row.patch_id,
            strategy_id: row.strategy_id,
            patch_level: PatchLevel::parse(&row.patch_level)?,
            entity_id: row.entity_id,
            patch_content: row.patch_content,
            patch_format: PatchFormat::parse(&row.patch_format)?,
        })
    }
}

const STRATEGY_COLUMNS: &str = "strategy_id, game_id, name, strategy_type, target_path, \
                                base_template, render_options, apply_order";
const BINDING_COLUMNS: &str =
    "binding_id, strategy_id, param_id, binding_type, target_key, value_template, condition_expr";
const PATCH_COLUMNS: &str =
    "patch_id, strategy_id, patch_level, entity_id, patch_content, patch_format";

impl CatalogStore {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_strategy(
        &self,
        game_id: i64,
        name: &str,
        strategy_type: StrategyType,
        target_path: Option<&str>,
        base_template: Option<&str>,
        render_options: &StrategyOptions,
        apply_order: i32,
    ) -> Result<ConfigurationStrategy> {
        if strategy_type.writes_file() && target_path.is_none() {
            return Err(Error::validation(format!(
                "strategy type {} requires a target_path",
                strategy_type.as_str()
            )));
        }
        let row: StrategyRow = sqlx::query_as(&format!(
            "INSERT INTO configuration_strategies
                 (game_id, name, strategy_type, target_path, base_template, render_options, apply_order)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {STRATEGY_COLUMNS}"
        ))
        .bind(game_id)
        .bind(name)
        .bind(strategy_type.as_str())
        .bind(target_path)
        .bind(base_template)
        .bind(serde_json::to_value(render_options).map_err(Error::from)?)
        .bind(apply_order)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get_strategy(&self, strategy_id: i64) -> Result<ConfigurationStrategy> {
        let row: Option<StrategyRow> = sqlx::query_as(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM configuration_strategies WHERE strategy_id = $1"
        ))
        .bind(strategy_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("strategy {strategy_id}")))?
            .try_into()
    }

    pub async fn list_strategies(
        &self,
        game_id: i64,
        page: Page,
    ) -> Result<Vec<ConfigurationStrategy>> {
        let rows: Vec<StrategyRow> = sqlx::query_as(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM configuration_strategies
             WHERE game_id = $1 ORDER BY apply_order, strategy_id LIMIT $2 OFFSET $3"
        ))
        .bind(game_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// All strategies of a game, unpaginated (renderer input).
    pub async fn strategies_for_game(&self, game_id: i64) -> Result<Vec<ConfigurationStrategy>> {
        let rows: Vec<StrategyRow> = sqlx::query_as(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM configuration_strategies
             WHERE game_id = $1 ORDER BY apply_order, strategy_id"
        ))
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update_strategy(
        &self,
        strategy: &ConfigurationStrategy,
    ) -> Result<ConfigurationStrategy> {
        let row: Option<StrategyRow> = sqlx::query_as(&format!(
            "UPDATE configuration_strategies
             SET name = $2, strategy_type = $3, target_path = $4, base_template = $5,
                 render_options = $6, apply_order = $7
             WHERE strategy_id = $1
             RETURNING {STRATEGY_COLUMNS}"
        ))
        .bind(strategy.strategy_id)
        .bind(&strategy.name)
        .bind(strategy.strategy_type.as_str())
        .bind(strategy.target_path.as_deref())
        .bind(strategy.base_template.as_deref())
        .bind(serde_json::to_value(&strategy.render_options).map_err(Error::from)?)
        .bind(strategy.apply_order)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("strategy {}", strategy.strategy_id)))?
            .try_into()
    }

    pub async fn delete_strategy(&self, strategy_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM configuration_strategies WHERE strategy_id = $1")
            .bind(strategy_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_strategy_binding(
        &self,
        strategy_id: i64,
        param_id: i64,
        binding_type: BindingType,
        target_key: &str,
        value_template: Option<&str>,
        condition_expr: Option<&str>,
    ) -> Result<StrategyParameterBinding> {
        if binding_type == BindingType::Template && value_template.is_none() {
            return Err(Error::validation(
                "template bindings require a value_template",
            ));
        }
        let row: BindingRow = sqlx::query_as(&format!(
            "INSERT INTO strategy_parameter_bindings
                 (strategy_id, param_id, binding_type, target_key, value_template, condition_expr)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {BINDING_COLUMNS}"
        ))
        .bind(strategy_id)
        .bind(param_id)
        .bind(binding_type.as_str())
        .bind(target_key)
        .bind(value_template)
        .bind(condition_expr)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn list_strategy_bindings(
        &self,
        strategy_id: i64,
    ) -> Result<Vec<StrategyParameterBinding>> {
        let rows: Vec<BindingRow> = sqlx::query_as(&format!(
            "SELECT {BINDING_COLUMNS} FROM strategy_parameter_bindings
             WHERE strategy_id = $1 ORDER BY binding_id"
        ))
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn bindings_for_strategies(
        &self,
        strategy_ids: &[i64],
    ) -> Result<Vec<StrategyParameterBinding>> {
        let rows: Vec<BindingRow> = sqlx::query_as(&format!(
            "SELECT {BINDING_COLUMNS} FROM strategy_parameter_bindings
             WHERE strategy_id = ANY($1) ORDER BY binding_id"
        ))
        .bind(strategy_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete_strategy_binding(&self, binding_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM strategy_parameter_bindings WHERE binding_id = $1")
            .bind(binding_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_configuration_patch(
        &self,
        strategy_id: i64,
        patch_level: PatchLevel,
        entity_id: i64,
        patch_content: &str,
        patch_format: PatchFormat,
    ) -> Result<ConfigurationPatch> {
        let row: PatchRow = sqlx::query_as(&format!(
            "INSERT INTO configuration_patches
                 (strategy_id, patch_level, entity_id, patch_content, patch_format)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (strategy_id, patch_level, entity_id)
             DO UPDATE SET patch_content = $4, patch_format = $5
             RETURNING {PATCH_COLUMNS}"
        ))
        .bind(strategy_id)
        .bind(patch_level.as_str())
        .bind(entity_id)
        .bind(patch_content)
        .bind(patch_format.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn list_configuration_patches(
        &self,
        strategy_id: i64,
    ) -> Result<Vec<ConfigurationPatch>> {
        let rows: Vec<PatchRow> = sqlx::query_as(&format!(
            "SELECT {PATCH_COLUMNS} FROM configuration_patches
             WHERE strategy_id = $1 ORDER BY patch_id"
        ))
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete_configuration_patch(&self, patch_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM configuration_patches WHERE patch_id = $1")
            .bind(patch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The patch layers relevant to one session's render, ordered
    /// least-specific first (game_config, server_game_config, session).
    pub async fn patches_for_render(
        &self,
        strategy_ids: &[i64],
        game_config_id: i64,
        sgc_id: i64,
        session_id: Option<i64>,
    ) -> Result<Vec<ConfigurationPatch>> {
        let rows: Vec<PatchRow> = sqlx::query_as(&format!(
            "SELECT {PATCH_COLUMNS} FROM configuration_patches
             WHERE strategy_id = ANY($1)
               AND ((patch_level = 'game_config' AND entity_id = $2)
                 OR (patch_level = 'server_game_config' AND entity_id = $3)
                 OR (patch_level = 'session' AND entity_id = $4))
             ORDER BY CASE patch_level
                 WHEN 'game_config' THEN 0
                 WHEN 'server_game_config' THEN 1
                 ELSE 2 END, patch_id"
        ))
        .bind(strategy_ids)
        .bind(game_config_id)
        .bind(sgc_id)
        .bind(session_id.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
