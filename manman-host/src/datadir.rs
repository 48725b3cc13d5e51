//! Host data directory layout.
//!
//! Every deployment owns `<HOST_DATA_DIR>/sgc-[<env>-]<sgc_id>/`; volume
//! subpaths and rendered configuration files live beneath it, and a
//! transient `.workshop-temp/<addon_id>-<unix>/` holds in-flight
//! downloads. Directories are created world-writable so any container uid
//! can use them.

use std::path::{Path, PathBuf};

use manman_core::bus::messages::RenderedFile;
use manman_core::model::{Deployment, Volume};
use manman_core::{Error, Result};

#[derive(Clone)]
pub struct DataDirs {
    root: PathBuf,
    environment: Option<String>,
}

impl DataDirs {
    pub fn new(root: PathBuf, environment: Option<String>) -> Self {
        Self { root, environment }
    }

    /// `<root>/sgc-[<env>-]<sgc_id>`
    pub fn deployment_dir(&self, sgc_id: i64) -> PathBuf {
        self.root
            .join(Deployment::data_dir_name(sgc_id, self.environment.as_deref()))
    }

    /// Absolute host path for a volume's subpath.
    pub fn volume_path(&self, sgc_id: i64, volume: &Volume) -> PathBuf {
        self.deployment_dir(sgc_id).join(&volume.host_subpath)
    }

    /// Transient download scratch dir for one addon.
    pub fn workshop_temp(&self, sgc_id: i64, addon_id: i64, unix: u64) -> PathBuf {
        self.deployment_dir(sgc_id)
            .join(".workshop-temp")
            .join(format!("{addon_id}-{unix}"))
    }

    /// Absolute install path for an addon (install paths are relative to
    /// the deployment dir).
    pub fn install_path(&self, sgc_id: i64, relative: &str) -> PathBuf {
        self.deployment_dir(sgc_id).join(relative)
    }

    /// Create the deployment tree with every volume subpath.
    pub fn ensure_deployment(&self, sgc_id: i64, volumes: &[Volume]) -> Result<()> {
        create_open_dir(&self.deployment_dir(sgc_id))?;
        for volume in volumes {
            create_open_dir(&self.volume_path(sgc_id, volume))?;
        }
        Ok(())
    }

    /// Materialize rendered configuration files beneath the deployment
    /// dir. Paths are kept inside the tree; escapes are rejected.
    pub fn write_rendered_files(&self, sgc_id: i64, files: &[RenderedFile]) -> Result<()> {
        let base = self.deployment_dir(sgc_id);
        for file in files {
            let target = safe_join(&base, &file.path)?;
            if let Some(parent) = target.parent() {
                create_open_dir(parent)?;
            }
            std::fs::write(&target, &file.content).map_err(|e| {
                Error::resource(format!("writing {}: {e}", target.display()))
            })?;
        }
        Ok(())
    }
}

/// Join a relative path, rejecting traversal out of `base`.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::validation(format!(
            "path {relative:?} escapes the deployment directory"
        )));
    }
    Ok(base.join(rel))
}

fn create_open_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| Error::resource(format!("creating {}: {e}", path.display())))?;
    // Containers run with arbitrary uids; the tree must stay writable.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
            .map_err(|e| Error::resource(format!("chmod {}: {e}", path.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn dirs(root: &Path, env: Option<&str>) -> DataDirs {
        DataDirs::new(root.to_path_buf(), env.map(str::to_string))
    }

    #[test]
    fn deployment_dir_carries_environment() {
        let d = dirs(Path::new("/data"), Some("dev"));
        assert_eq!(d.deployment_dir(42), Path::new("/data/sgc-dev-42"));
        let d = dirs(Path::new("/data"), None);
        assert_eq!(d.deployment_dir(42), Path::new("/data/sgc-42"));
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(safe_join(Path::new("/data/sgc-1"), "../../etc/passwd").is_err());
        assert!(safe_join(Path::new("/data/sgc-1"), "/etc/passwd").is_err());
        assert!(safe_join(Path::new("/data/sgc-1"), "cfg/server.cfg").is_ok());
    }

    #[test]
    fn rendered_files_land_in_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dirs(tmp.path(), Some("dev"));
        d.ensure_deployment(
            7,
            &[Volume {
                name: "data".into(),
                container_path: "/data".into(),
                host_subpath: "game-data".into(),
                options: BTreeMap::new(),
            }],
        )
        .unwrap();
        d.write_rendered_files(
            7,
            &[RenderedFile {
                path: "cfg/server.properties".into(),
                content: "max-players=50".into(),
            }],
        )
        .unwrap();
        let written = tmp.path().join("sgc-dev-7/cfg/server.properties");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "max-players=50");
        assert!(tmp.path().join("sgc-dev-7/game-data").is_dir());
    }
}
