//! Operator action repositories.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::CatalogStore;
use crate::error::{Error, Result};
use crate::model::{
    ActionDefinition, ActionExecution, ActionLevel, FieldConstraints, FieldType, InputField,
    InputOption,
};

#[derive(FromRow)]
struct ActionRow {
    action_id: i64,
    level: String,
    entity_id: i64,
    name: String,
    description: String,
    command_template: String,
}

#[derive(FromRow)]
struct FieldRow {
    field_id: i64,
    key: String,
    label: String,
    field_type: String,
    required: bool,
    default_value: Option<String>,
    constraints: serde_json::Value,
}

impl CatalogStore {
    pub async fn create_action(
        &self,
        level: ActionLevel,
        entity_id: i64,
        name: &str,
        description: &str,
        command_template: &str,
        fields: &[InputField],
    ) -> Result<ActionDefinition> {
        if command_template.trim().is_empty() {
            return Err(Error::validation("action command template must not be empty"));
        }
        let mut tx = self.pool.begin().await?;
        let row: ActionRow = sqlx::query_as(
            "INSERT INTO action_definitions (level, entity_id, name, description, command_template)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING action_id, level, entity_id, name, description, command_template",
        )
        .bind(level.as_str())
        .bind(entity_id)
        .bind(name)
        .bind(description)
        .bind(command_template)
        .fetch_one(&mut *tx)
        .await?;

        let mut stored_fields = Vec::with_capacity(fields.len());
        for field in fields {
            let field_row: FieldRow = sqlx::query_as(
                "INSERT INTO action_input_fields
                     (action_id, key, label, field_type, required, default_value, constraints)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING field_id, key, label, field_type, required, default_value, constraints",
            )
            .bind(row.action_id)
            .bind(&field.key)
            .bind(&field.label)
            .bind(field.field_type.as_str())
            .bind(field.required)
            .bind(field.default_value.as_deref())
            .bind(serde_json::to_value(&field.constraints).map_err(Error::from)?)
            .fetch_one(&mut *tx)
            .await?;
            for option in &field.options {
                sqlx::query(
                    "INSERT INTO action_input_options (field_id, value, label) VALUES ($1, $2, $3)",
                )
                .bind(field_row.field_id)
                .bind(&option.value)
                .bind(&option.label)
                .execute(&mut *tx)
                .await?;
            }
            stored_fields.push(InputField {
                field_id: field_row.field_id,
                options: field.options.clone(),
                ..field.clone()
            });
        }
        tx.commit().await?;

        Ok(ActionDefinition {
            action_id: row.action_id,
            level,
            entity_id,
            name: name.to_string(),
            description: description.to_string(),
            command_template: command_template.to_string(),
            fields: stored_fields,
        })
    }

    pub async fn get_action(&self, action_id: i64) -> Result<ActionDefinition> {
        let row: Option<ActionRow> = sqlx::query_as(
            "SELECT action_id, level, entity_id, name, description, command_template
             FROM action_definitions WHERE action_id = $1",
        )
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| Error::not_found(format!("action {action_id}")))?;
        self.hydrate_action(row).await
    }

    /// Actions defined directly at one level/entity (no chain walking;
    /// resolution happens in the model layer).
    pub async fn actions_at(
        &self,
        level: ActionLevel,
        entity_id: i64,
    ) -> Result<Vec<ActionDefinition>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT action_id, level, entity_id, name, description, command_template
             FROM action_definitions WHERE level = $1 AND entity_id = $2
             ORDER BY action_id",
        )
        .bind(level.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        let mut actions = Vec::with_capacity(rows.len());
        for row in rows {
            actions.push(self.hydrate_action(row).await?);
        }
        Ok(actions)
    }

    pub async fn delete_action(&self, action_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM action_definitions WHERE action_id = $1")
            .bind(action_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_action_execution(
        &self,
        action_id: i64,
        session_id: i64,
        rendered_command: &str,
    ) -> Result<ActionExecution> {
        let row: (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO action_executions (action_id, session_id, rendered_command)
             VALUES ($1, $2, $3)
             RETURNING execution_id, executed_at",
        )
        .bind(action_id)
        .bind(session_id)
        .bind(rendered_command)
        .fetch_one(&self.pool)
        .await?;
        Ok(ActionExecution {
            execution_id: row.0,
            action_id,
            session_id,
            rendered_command: rendered_command.to_string(),
            executed_at: row.1,
        })
    }

    async fn hydrate_action(&self, row: ActionRow) -> Result<ActionDefinition> {
        let field_rows: Vec<FieldRow> = sqlx::query_as(
            "SELECT field_id, key, label, field_type, required, default_value, constraints
             FROM action_input_fields WHERE action_id = $1 ORDER BY field_id",
        )
        .bind(row.action_id)
        .fetch_all(&self.pool)
        .await?;

        let mut fields = Vec::with_capacity(field_rows.len());
        for field_row in field_rows {
            let options: Vec<(String, String)> = sqlx::query_as(
                "SELECT value, label FROM action_input_options
                 WHERE field_id = $1 ORDER BY option_id",
            )
            .bind(field_row.field_id)
            .fetch_all(&self.pool)
            .await?;
            fields.push(InputField {
                field_id: field_row.field_id,
                key: field_row.key,
                label: field_row.label,
                field_type: FieldType::parse(&field_row.field_type)?,
                required: field_row.required,
                default_value: field_row.default_value,
                constraints: serde_json::from_value::<FieldConstraints>(field_row.constraints)
                    .map_err(|e| Error::internal(format!("bad field constraints: {e}")))?,
                options: options
                    .into_iter()
                    .map(|(value, label)| InputOption { value, label })
                    .collect(),
            });
        }

        Ok(ActionDefinition {
            action_id: row.action_id,
            level: ActionLevel::parse(&row.level)?,
            entity_id: row.entity_id,
            name: row.name,
            description: row.description,
            command_template: row.command_template,
            fields,
        })
    }
}
