//! Workshop repositories: addons, presets, the library DAG, attachments
//! and installations.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{CatalogStore, Page};
use crate::bus::messages::InstallationStatusUpdate;
use crate::error::{Error, Result};
use crate::model::{
    is_reachable, InstallationStatus, LibraryGraph, PathPreset, PlatformType, WorkshopAddon,
    WorkshopInstallation, WorkshopLibrary,
};

#[derive(FromRow)]
struct AddonRow {
    addon_id: i64,
    game_id: i64,
    workshop_id: i64,
    platform_type: String,
    name: String,
    is_collection: bool,
    preset_id: Option<i64>,
    installation_path: Option<String>,
}

impl TryFrom<AddonRow> for WorkshopAddon {
    type Error = Error;

    fn try_from(row: AddonRow) -> Result<Self> {
        Ok(WorkshopAddon {
            addon_id: row.addon_id,
            game_id: row.game_id,
            workshop_id: row.workshop_id,
            platform_type: PlatformType::parse(&row.platform_type)?,
            name: row.name,
            is_collection: row.is_collection,
            preset_id: row.preset_id,
            installation_path: row.installation_path,
        })
    }
}

#[derive(FromRow)]
struct InstallationRow {
    installation_id: i64,
    sgc_id: i64,
    addon_id: i64,
    status: String,
    installation_path: String,
    progress_percent: i32,
    error_message: Option<String>,
    download_started_at: Option<DateTime<Utc>>,
    download_completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<InstallationRow> for WorkshopInstallation {
    type Error = Error;

    fn try_from(row: InstallationRow) -> Result<Self> {
        Ok(WorkshopInstallation {
            installation_id: row.installation_id,
            sgc_id: row.sgc_id,
            addon_id: row.addon_id,
            status: InstallationStatus::parse(&row.status)?,
            installation_path: row.installation_path,
            progress_percent: row.progress_percent,
            error_message: row.error_message,
            download_started_at: row.download_started_at,
            download_completed_at: row.download_completed_at,
        })
    }
}

const ADDON_COLUMNS: &str = "addon_id, game_id, workshop_id, platform_type, name, is_collection, \
                             preset_id, installation_path";
const INSTALLATION_COLUMNS: &str =
    "installation_id, sgc_id, addon_id, status, installation_path, progress_percent, \
     error_message, download_started_at, download_completed_at";

impl CatalogStore {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_addon(
        &self,
        game_id: i64,
        workshop_id: i64,
        platform_type: PlatformType,
        name: &str,
        is_collection: bool,
        preset_id: Option<i64>,
        installation_path: Option<&str>,
    ) -> Result<WorkshopAddon> {
        if preset_id.is_none() && installation_path.is_none() {
            return Err(Error::validation(
                "addon needs a path preset or an installation path",
            ));
        }
        let row: AddonRow = sqlx::query_as(&format!(
            "INSERT INTO workshop_addons
                 (game_id, workshop_id, platform_type, name, is_collection, preset_id, installation_path)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ADDON_COLUMNS}"
        ))
        .bind(game_id)
        .bind(workshop_id)
        .bind(platform_type.as_str())
        .bind(name)
        .bind(is_collection)
        .bind(preset_id)
        .bind(installation_path)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get_addon(&self, addon_id: i64) -> Result<WorkshopAddon> {
        let row: Option<AddonRow> = sqlx::query_as(&format!(
            "SELECT {ADDON_COLUMNS} FROM workshop_addons WHERE addon_id = $1"
        ))
        .bind(addon_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("addon {addon_id}")))?
            .try_into()
    }

    pub async fn list_addons(
        &self,
        game_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<WorkshopAddon>> {
        let rows: Vec<AddonRow> = sqlx::query_as(&format!(
            "SELECT {ADDON_COLUMNS} FROM workshop_addons
             WHERE ($1::bigint IS NULL OR game_id = $1)
             ORDER BY addon_id LIMIT $2 OFFSET $3"
        ))
        .bind(game_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete_addon(&self, addon_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workshop_addons WHERE addon_id = $1")
            .bind(addon_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_path_preset(
        &self,
        game_id: i64,
        name: &str,
        path_template: &str,
    ) -> Result<PathPreset> {
        if path_template.trim().is_empty() {
            return Err(Error::validation("path template must not be empty"));
        }
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO workshop_path_presets (game_id, name, path_template)
             VALUES ($1, $2, $3) RETURNING preset_id",
        )
        .bind(game_id)
        .bind(name)
        .bind(path_template)
        .fetch_one(&self.pool)
        .await?;
        Ok(PathPreset {
            preset_id: row.0,
            game_id,
            name: name.to_string(),
            path_template: path_template.to_string(),
        })
    }

    pub async fn get_path_preset(&self, preset_id: i64) -> Result<PathPreset> {
        let row: Option<(i64, i64, String, String)> = sqlx::query_as(
            "SELECT preset_id, game_id, name, path_template
             FROM workshop_path_presets WHERE preset_id = $1",
        )
        .bind(preset_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(preset_id, game_id, name, path_template)| PathPreset {
            preset_id,
            game_id,
            name,
            path_template,
        })
        .ok_or_else(|| Error::not_found(format!("path preset {preset_id}")))
    }

    pub async fn list_path_presets(&self, game_id: i64) -> Result<Vec<PathPreset>> {
        let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
            "SELECT preset_id, game_id, name, path_template
             FROM workshop_path_presets WHERE game_id = $1 ORDER BY preset_id",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(preset_id, game_id, name, path_template)| PathPreset {
                preset_id,
                game_id,
                name,
                path_template,
            })
            .collect())
    }

    pub async fn delete_path_preset(&self, preset_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workshop_path_presets WHERE preset_id = $1")
            .bind(preset_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let err = Error::from(e);
                if err.kind == crate::ErrorKind::FailedPrecondition {
                    Error::precondition(format!("path preset {preset_id} is in use by an addon"))
                } else {
                    err
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_library(&self, game_id: i64, name: &str) -> Result<WorkshopLibrary> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO workshop_libraries (game_id, name) VALUES ($1, $2) RETURNING library_id",
        )
        .bind(game_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(WorkshopLibrary {
            library_id: row.0,
            game_id,
            name: name.to_string(),
        })
    }

    pub async fn list_libraries(
        &self,
        game_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<WorkshopLibrary>> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT library_id, game_id, name FROM workshop_libraries
             WHERE ($1::bigint IS NULL OR game_id = $1)
             ORDER BY library_id LIMIT $2 OFFSET $3",
        )
        .bind(game_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(library_id, game_id, name)| WorkshopLibrary {
                library_id,
                game_id,
                name,
            })
            .collect())
    }

    pub async fn delete_library(&self, library_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workshop_libraries WHERE library_id = $1")
            .bind(library_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_library_addon(&self, library_id: i64, addon_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO library_addons (library_id, addon_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(library_id)
        .bind(addon_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_library_addon(&self, library_id: i64, addon_id: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM library_addons WHERE library_id = $1 AND addon_id = $2")
                .bind(library_id)
                .bind(addon_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add a parent -> child reference; rejected when the parent is
    /// already reachable from the child (the edge would close a cycle).
    pub async fn add_library_reference(&self, parent: i64, child: i64) -> Result<bool> {
        if parent == child {
            return Err(Error::precondition("a library cannot reference itself"));
        }
        let mut tx = self.pool.begin().await?;
        let edges: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT parent_library_id, child_library_id FROM library_references FOR UPDATE",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut graph = LibraryGraph::new();
        for (from, to) in edges {
            graph.entry(from).or_default().push(to);
        }
        if is_reachable(&graph, child, parent) {
            return Err(Error::precondition(format!(
                "reference {parent} -> {child} would create a cycle"
            )));
        }
        let result = sqlx::query(
            "INSERT INTO library_references (parent_library_id, child_library_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(parent)
        .bind(child)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_library_reference(&self, parent: i64, child: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM library_references
             WHERE parent_library_id = $1 AND child_library_id = $2",
        )
        .bind(parent)
        .bind(child)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn attach_library(&self, sgc_id: i64, library_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO sgc_workshop_libraries (sgc_id, library_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(sgc_id)
        .bind(library_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn detach_library(&self, sgc_id: i64, library_id: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM sgc_workshop_libraries WHERE sgc_id = $1 AND library_id = $2")
                .bind(sgc_id)
                .bind(library_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The addons reachable from a deployment's attached libraries,
    /// following library references (BFS in the model layer).
    pub async fn reachable_addons(&self, sgc_id: i64) -> Result<Vec<WorkshopAddon>> {
        let roots: Vec<(i64,)> =
            sqlx::query_as("SELECT library_id FROM sgc_workshop_libraries WHERE sgc_id = $1")
                .bind(sgc_id)
                .fetch_all(&self.pool)
                .await?;
        if roots.is_empty() {
            return Ok(vec![]);
        }
        let edges: Vec<(i64, i64)> =
            sqlx::query_as("SELECT parent_library_id, child_library_id FROM library_references")
                .fetch_all(&self.pool)
                .await?;
        let mut graph = LibraryGraph::new();
        for (from, to) in edges {
            graph.entry(from).or_default().push(to);
        }
        let root_ids: Vec<i64> = roots.into_iter().map(|(id,)| id).collect();
        let reachable: Vec<i64> = crate::model::reachable_libraries(&graph, &root_ids)
            .into_iter()
            .collect();

        let rows: Vec<AddonRow> = sqlx::query_as(&format!(
            "SELECT DISTINCT a.addon_id, a.game_id, a.workshop_id, a.platform_type, a.name,
                    a.is_collection, a.preset_id, a.installation_path
             FROM workshop_addons a
             JOIN library_addons la ON la.addon_id = a.addon_id
             WHERE la.library_id = ANY($1)
             ORDER BY a.addon_id"
        ))
        .bind(&reachable)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// The install path an addon resolves to: its explicit path, or its
    /// preset's template.
    pub async fn resolve_install_path(&self, addon: &WorkshopAddon) -> Result<String> {
        if let Some(ref path) = addon.installation_path {
            return Ok(path.clone());
        }
        let preset_id = addon.preset_id.ok_or_else(|| {
            Error::internal(format!("addon {} has neither path nor preset", addon.addon_id))
        })?;
        let preset = self.get_path_preset(preset_id).await?;
        Ok(preset.resolve(addon))
    }

    /// Find-or-create the installation row for `(sgc_id, addon_id)`.
    pub async fn find_or_create_installation(
        &self,
        sgc_id: i64,
        addon_id: i64,
        installation_path: &str,
    ) -> Result<WorkshopInstallation> {
        let row: InstallationRow = sqlx::query_as(&format!(
            "INSERT INTO workshop_installations (sgc_id, addon_id, installation_path)
             VALUES ($1, $2, $3)
             ON CONFLICT (sgc_id, addon_id) DO UPDATE SET sgc_id = EXCLUDED.sgc_id
             RETURNING {INSTALLATION_COLUMNS}"
        ))
        .bind(sgc_id)
        .bind(addon_id)
        .bind(installation_path)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get_installation(&self, installation_id: i64) -> Result<WorkshopInstallation> {
        let row: Option<InstallationRow> = sqlx::query_as(&format!(
            "SELECT {INSTALLATION_COLUMNS} FROM workshop_installations WHERE installation_id = $1"
        ))
        .bind(installation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::not_found(format!("installation {installation_id}")))?
            .try_into()
    }

    pub async fn installation_for(
        &self,
        sgc_id: i64,
        addon_id: i64,
    ) -> Result<Option<WorkshopInstallation>> {
        let row: Option<InstallationRow> = sqlx::query_as(&format!(
            "SELECT {INSTALLATION_COLUMNS} FROM workshop_installations
             WHERE sgc_id = $1 AND addon_id = $2"
        ))
        .bind(sgc_id)
        .bind(addon_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn list_installations(
        &self,
        sgc_id: Option<i64>,
        status_in: &[InstallationStatus],
        page: Page,
    ) -> Result<Vec<WorkshopInstallation>> {
        let statuses: Vec<String> = status_in.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<InstallationRow> = sqlx::query_as(&format!(
            "SELECT {INSTALLATION_COLUMNS} FROM workshop_installations
             WHERE ($1::bigint IS NULL OR sgc_id = $1)
               AND (cardinality($2::text[]) = 0 OR status = ANY($2))
             ORDER BY installation_id LIMIT $3 OFFSET $4"
        ))
        .bind(sgc_id)
        .bind(&statuses)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Fold a workshop status report into the catalog under the monotonic
    /// guard. Returns `None` when the report was stale.
    pub async fn apply_installation_status(
        &self,
        update: &InstallationStatusUpdate,
    ) -> Result<Option<WorkshopInstallation>> {
        let current = self.get_installation(update.installation_id).await?;
        if !current.status.can_transition_to(update.status) {
            return Ok(None);
        }

        let started_at = match update.status {
            InstallationStatus::Downloading if current.download_started_at.is_none() => {
                Some(update.timestamp)
            }
            _ => current.download_started_at,
        };
        let completed_at = match update.status {
            InstallationStatus::Installed | InstallationStatus::Failed
                if current.download_completed_at.is_none() =>
            {
                Some(update.timestamp)
            }
            _ => current.download_completed_at,
        };

        let row: Option<InstallationRow> = sqlx::query_as(&format!(
            "UPDATE workshop_installations
             SET status = $3, progress_percent = GREATEST(progress_percent, $4),
                 error_message = COALESCE($5, error_message),
                 download_started_at = $6, download_completed_at = $7
             WHERE installation_id = $1 AND status = $2
             RETURNING {INSTALLATION_COLUMNS}"
        ))
        .bind(update.installation_id)
        .bind(current.status.as_str())
        .bind(update.status.as_str())
        .bind(update.progress_percent)
        .bind(update.error_message.as_deref())
        .bind(started_at)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// Explicit retry: put a failed installation back to `pending` so a
    /// fresh `DownloadAddon` can run. Failed rows do not auto-retry.
    pub async fn reset_installation(&self, installation_id: i64) -> Result<WorkshopInstallation> {
        let row: Option<InstallationRow> = sqlx::query_as(&format!(
            "UPDATE workshop_installations
             SET status = 'pending', progress_percent = 0, error_message = NULL,
                 download_started_at = NULL, download_completed_at = NULL
             WHERE installation_id = $1 AND status IN ('failed', 'removed')
             RETURNING {INSTALLATION_COLUMNS}"
        ))
        .bind(installation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| {
            Error::precondition(format!(
                "installation {installation_id} is not in a retryable state"
            ))
        })?
        .try_into()
    }
}
