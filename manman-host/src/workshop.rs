//! Workshop addon orchestrator.
//!
//! Downloads run in throwaway steamcmd containers, bounded by a per-host
//! semaphore and serialized per installation by an in-process set plus
//! the catalog's `UNIQUE(sgc_id, addon_id)`. Progress is scraped from the
//! container's output and reported over the bus; the content is relocated
//! into the deployment data dir when the download succeeds.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use regex::Regex;
use tokio::sync::Semaphore;

use manman_core::bus::messages::{DownloadAddonCommand, InstallationStatusUpdate};
use manman_core::bus::{topics, Broker};
use manman_core::model::InstallationStatus;
use manman_core::{Error, Result};

use crate::datadir::DataDirs;
use crate::engine::{ContainerSpec, Engine, LABEL_ENV, LABEL_SERVER, LABEL_SGC, LABEL_TYPE, TYPE_DOWNLOAD};

/// Install dir inside the download container.
const CONTAINER_INSTALL_DIR: &str = "/manman/workshop";

#[derive(Clone)]
pub struct AddonOrchestrator {
    engine: Engine,
    broker: Arc<Broker>,
    dirs: DataDirs,
    server_id: i64,
    environment: Option<String>,
    steamcmd_image: String,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashMap<i64, ()>>,
}

impl AddonOrchestrator {
    pub fn new(
        engine: Engine,
        broker: Arc<Broker>,
        dirs: DataDirs,
        server_id: i64,
        environment: Option<String>,
        steamcmd_image: String,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            broker,
            dirs,
            server_id,
            environment,
            steamcmd_image,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Deterministic download container name:
    /// `workshop-download-[<env>-]<sgc_id>-<addon_id>`.
    fn container_name(&self, sgc_id: i64, addon_id: i64) -> String {
        match self.environment.as_deref() {
            Some(env) if !env.is_empty() => format!("workshop-download-{env}-{sgc_id}-{addon_id}"),
            _ => format!("workshop-download-{sgc_id}-{addon_id}"),
        }
    }

    /// Run one download to completion. Idempotent: an in-flight
    /// installation is skipped; a failure is recorded on the row and
    /// surfaced as permanent so the broker does not redeliver.
    pub async fn download(&self, cmd: &DownloadAddonCommand) -> Result<()> {
        if self.in_flight.insert(cmd.installation_id, ()).is_some() {
            tracing::debug!(
                target: "manman::workshop",
                installation_id = cmd.installation_id,
                "download already in flight, skipping"
            );
            return Ok(());
        }
        let result = self.download_inner(cmd).await;
        self.in_flight.remove(&cmd.installation_id);

        if let Err(ref e) = result {
            self.publish_status(cmd, InstallationStatus::Failed, 0, Some(e.to_string()))
                .await;
        }
        result
    }

    async fn download_inner(&self, cmd: &DownloadAddonCommand) -> Result<()> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::internal("download semaphore closed"))?;

        self.publish_status(cmd, InstallationStatus::Downloading, 0, None)
            .await;

        self.dirs.ensure_deployment(cmd.sgc_id, &[])?;
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let temp = self.dirs.workshop_temp(cmd.sgc_id, cmd.addon_id, unix);
        std::fs::create_dir_all(&temp)
            .map_err(|e| Error::resource(format!("creating {}: {e}", temp.display())))?;

        let name = self.container_name(cmd.sgc_id, cmd.addon_id);
        // A container left over from a prior failed run blocks creation.
        self.engine.remove(&name).await?;
        self.engine.ensure_image(&self.steamcmd_image).await?;

        let mut labels = HashMap::new();
        labels.insert(LABEL_SGC.to_string(), cmd.sgc_id.to_string());
        labels.insert(LABEL_SERVER.to_string(), self.server_id.to_string());
        labels.insert(LABEL_TYPE.to_string(), TYPE_DOWNLOAD.to_string());
        if let Some(ref env) = self.environment {
            labels.insert(LABEL_ENV.to_string(), env.clone());
        }

        let spec = ContainerSpec {
            name: name.clone(),
            image: self.steamcmd_image.clone(),
            env: vec![],
            cmd: vec![
                "+force_install_dir".into(),
                CONTAINER_INSTALL_DIR.into(),
                "+login".into(),
                "anonymous".into(),
                "+workshop_download_item".into(),
                cmd.steam_app_id.to_string(),
                cmd.workshop_id.to_string(),
                "+quit".into(),
            ],
            labels,
            binds: vec![format!("{}:{}", temp.display(), CONTAINER_INSTALL_DIR)],
            ports: vec![],
            open_stdin: false,
        };
        let run = self.run_download_container(cmd, &name, &temp, &spec).await;

        let _ = self.engine.remove(&name).await;
        if let Err(e) = std::fs::remove_dir_all(&temp) {
            tracing::debug!(target: "manman::workshop", error = %e, "temp cleanup failed");
        }
        run?;

        self.publish_status(cmd, InstallationStatus::Installed, 100, None)
            .await;
        tracing::info!(
            target: "manman::workshop",
            installation_id = cmd.installation_id,
            addon_id = cmd.addon_id,
            "addon installed"
        );
        Ok(())
    }

    async fn run_download_container(
        &self,
        cmd: &DownloadAddonCommand,
        name: &str,
        temp: &Path,
        spec: &ContainerSpec,
    ) -> Result<()> {
        self.engine.create(spec).await?;
        self.engine.start(name).await?;

        // Progress scraper: steamcmd prints percentages as it downloads.
        let progress_task = tokio::spawn(progress_watcher(
            self.engine.clone(),
            self.broker.clone(),
            cmd.clone(),
            name.to_string(),
        ));

        let exit_code = self.engine.wait_exit(name).await?;
        progress_task.abort();

        if exit_code != 0 {
            return Err(Error::permanent(format!(
                "workshop download exited with code {exit_code}"
            )));
        }

        let content = temp
            .join("steamapps/workshop/content")
            .join(cmd.steam_app_id.to_string())
            .join(cmd.workshop_id.to_string());
        let target = self.dirs.install_path(cmd.sgc_id, &cmd.install_path);
        relocate_content(&content, &target, cmd.workshop_id)
    }

    async fn publish_status(
        &self,
        cmd: &DownloadAddonCommand,
        status: InstallationStatus,
        progress_percent: i32,
        error_message: Option<String>,
    ) {
        let update = InstallationStatusUpdate {
            installation_id: cmd.installation_id,
            sgc_id: cmd.sgc_id,
            addon_id: cmd.addon_id,
            status,
            progress_percent,
            error_message,
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .broker
            .publish_json(topics::WORKSHOP_INSTALLATION_STATUS, &update)
            .await
        {
            tracing::warn!(
                target: "manman::workshop",
                installation_id = cmd.installation_id,
                error = %e,
                "installation status publish failed"
            );
        }
    }
}

/// Follow the container log and publish progress whenever the scraped
/// percentage changes.
async fn progress_watcher(
    engine: Engine,
    broker: Arc<Broker>,
    cmd: DownloadAddonCommand,
    name: String,
) {
    let re = match Regex::new(r"(\d+)%") {
        Ok(re) => re,
        Err(_) => return,
    };
    let mut stream = engine.logs(&name, true);
    let mut last = 0i32;
    while let Some(chunk) = stream.next().await {
        let Ok(output) = chunk else { break };
        let text = String::from_utf8_lossy(&output.into_bytes()).into_owned();
        if let Some(progress) = extract_progress(&re, &text) {
            if progress > last && progress < 100 {
                last = progress;
                let update = InstallationStatusUpdate {
                    installation_id: cmd.installation_id,
                    sgc_id: cmd.sgc_id,
                    addon_id: cmd.addon_id,
                    status: InstallationStatus::Downloading,
                    progress_percent: progress,
                    error_message: None,
                    timestamp: Utc::now(),
                };
                let _ = broker
                    .publish_json(topics::WORKSHOP_INSTALLATION_STATUS, &update)
                    .await;
            }
        }
    }
}

/// Last percentage mentioned in a chunk of output.
fn extract_progress(re: &Regex, text: &str) -> Option<i32> {
    re.captures_iter(text)
        .filter_map(|caps| caps[1].parse::<i32>().ok())
        .filter(|p| (0..=100).contains(p))
        .last()
}

/// Move downloaded content into the addon's install path.
///
/// A single `*_legacy.bin` file is renamed to `<workshop_id>.vpk` (the
/// Source-family convention); other single files keep their name;
/// directory trees move recursively.
// TODO: key relocation rules off platform_type once a second platform
// needs different handling.
pub fn relocate_content(content_dir: &Path, install_path: &Path, workshop_id: i64) -> Result<()> {
    let entries: Vec<_> = std::fs::read_dir(content_dir)
        .map_err(|e| Error::permanent(format!("download produced no content: {e}")))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| Error::permanent(format!("reading download content: {e}")))?;
    if entries.is_empty() {
        return Err(Error::permanent("download produced an empty directory"));
    }

    std::fs::create_dir_all(install_path)
        .map_err(|e| Error::resource(format!("creating {}: {e}", install_path.display())))?;

    if entries.len() == 1 && entries[0].path().is_file() {
        let src = entries[0].path();
        let file_name = src
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("content")
            .to_string();
        let target_name = if file_name.ends_with("_legacy.bin") {
            format!("{workshop_id}.vpk")
        } else {
            file_name
        };
        return move_path(&src, &install_path.join(target_name));
    }

    for entry in entries {
        let src = entry.path();
        let Some(file_name) = src.file_name() else {
            continue;
        };
        move_path(&src, &install_path.join(file_name))?;
    }
    Ok(())
}

/// Rename when possible, deep-copy-then-delete across filesystems.
fn move_path(src: &Path, dst: &Path) -> Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_recursive(src, dst)?;
    let removal = if src.is_dir() {
        std::fs::remove_dir_all(src)
    } else {
        std::fs::remove_file(src)
    };
    removal.map_err(|e| Error::resource(format!("removing {}: {e}", src.display())))
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dst)
            .map_err(|e| Error::resource(format!("creating {}: {e}", dst.display())))?;
        for entry in std::fs::read_dir(src)
            .map_err(|e| Error::resource(format!("reading {}: {e}", src.display())))?
        {
            let entry = entry.map_err(|e| Error::resource(format!("reading dir entry: {e}")))?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(src, dst)
            .map(|_| ())
            .map_err(|e| Error::resource(format!("copying to {}: {e}", dst.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_extraction_takes_last_match() {
        let re = Regex::new(r"(\d+)%").unwrap();
        assert_eq!(extract_progress(&re, "downloading 10%... 25% done"), Some(25));
        assert_eq!(extract_progress(&re, "no numbers here"), None);
        assert_eq!(extract_progress(&re, "weird 400% spike"), None);
    }

    #[test]
    fn single_legacy_bin_becomes_vpk() {
        let tmp = tempfile::tempdir().unwrap();
        let content = tmp.path().join("content");
        std::fs::create_dir_all(&content).unwrap();
        std::fs::write(content.join("123_legacy.bin"), b"pak").unwrap();
        let install = tmp.path().join("addons");
        relocate_content(&content, &install, 123456789).unwrap();
        assert!(install.join("123456789.vpk").is_file());
    }

    #[test]
    fn single_regular_file_keeps_name() {
        let tmp = tempfile::tempdir().unwrap();
        let content = tmp.path().join("content");
        std::fs::create_dir_all(&content).unwrap();
        std::fs::write(content.join("map.bsp"), b"map").unwrap();
        let install = tmp.path().join("addons");
        relocate_content(&content, &install, 1).unwrap();
        assert!(install.join("map.bsp").is_file());
    }

    #[test]
    fn directory_tree_moves_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let content = tmp.path().join("content");
        std::fs::create_dir_all(content.join("materials/models")).unwrap();
        std::fs::write(content.join("materials/models/skin.vmt"), b"vmt").unwrap();
        std::fs::write(content.join("addon.txt"), b"meta").unwrap();
        let install = tmp.path().join("addons/pack");
        relocate_content(&content, &install, 1).unwrap();
        assert!(install.join("materials/models/skin.vmt").is_file());
        assert!(install.join("addon.txt").is_file());
        assert!(!content.join("addon.txt").exists());
    }

    #[test]
    fn empty_download_is_permanent_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let content = tmp.path().join("content");
        std::fs::create_dir_all(&content).unwrap();
        let err = relocate_content(&content, &tmp.path().join("addons"), 1).unwrap_err();
        assert!(err.is_permanent());
    }
}
