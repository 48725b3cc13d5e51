//! Workshop addons, libraries and per-deployment installations.
//!
//! Libraries form a DAG attached to deployments; the reachable addon set
//! must be installed before a session leaves `starting`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Steam,
    Custom,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steam => "steam",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "steam" => Ok(Self::Steam),
            "custom" => Ok(Self::Custom),
            other => Err(Error::validation(format!("unknown platform type {other:?}"))),
        }
    }
}

/// External content unit. Exactly one of `preset_id` / `installation_path`
/// is set; creation enforces the invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkshopAddon {
    pub addon_id: i64,
    pub game_id: i64,
    pub workshop_id: i64,
    pub platform_type: PlatformType,
    pub name: String,
    pub is_collection: bool,
    pub preset_id: Option<i64>,
    pub installation_path: Option<String>,
}

/// Named install-path template: relative to the deployment data dir,
/// substituting `{workshop_id}` and `{addon_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPreset {
    pub preset_id: i64,
    pub game_id: i64,
    pub name: String,
    pub path_template: String,
}

impl PathPreset {
    pub fn resolve(&self, addon: &WorkshopAddon) -> String {
        self.path_template
            .replace("{workshop_id}", &addon.workshop_id.to_string())
            .replace("{addon_id}", &addon.addon_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkshopLibrary {
    pub library_id: i64,
    pub game_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Pending,
    Downloading,
    Installed,
    Failed,
    Removed,
}

impl InstallationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Installed => "installed",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "installed" => Ok(Self::Installed),
            "failed" => Ok(Self::Failed),
            "removed" => Ok(Self::Removed),
            other => Err(Error::validation(format!(
                "unknown installation status {other:?}"
            ))),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Installed | Self::Failed => 2,
            Self::Removed => 3,
        }
    }

    /// Monotonic guard applied by the workshop status consumer; protects
    /// against out-of-order delivery. An explicit retry resets the row via
    /// the catalog, not through this rule.
    pub fn can_transition_to(&self, next: InstallationStatus) -> bool {
        next.rank() > self.rank() || (*self == Self::Downloading && next == Self::Downloading)
    }
}

/// Per-deployment materialization of one addon; unique on
/// `(sgc_id, addon_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkshopInstallation {
    pub installation_id: i64,
    pub sgc_id: i64,
    pub addon_id: i64,
    pub status: InstallationStatus,
    pub installation_path: String,
    pub progress_percent: i32,
    pub error_message: Option<String>,
    pub download_started_at: Option<DateTime<Utc>>,
    pub download_completed_at: Option<DateTime<Utc>>,
}

/// Library-to-library edges as an adjacency list.
pub type LibraryGraph = BTreeMap<i64, Vec<i64>>;

/// Whether `target` is reachable from `start` following references.
/// Bounded DFS; used to reject edges that would close a cycle.
pub fn is_reachable(graph: &LibraryGraph, start: i64, target: i64) -> bool {
    if start == target {
        return true;
    }
    let mut seen = BTreeSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        for &next in graph.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if next == target {
                return true;
            }
            stack.push(next);
        }
    }
    false
}

/// The set of libraries reachable from `roots` (BFS, cycle-safe even
/// though edge insertion forbids cycles).
pub fn reachable_libraries(graph: &LibraryGraph, roots: &[i64]) -> BTreeSet<i64> {
    let mut seen: BTreeSet<i64> = roots.iter().copied().collect();
    let mut queue: VecDeque<i64> = roots.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        for &next in graph.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(i64, i64)]) -> LibraryGraph {
        let mut g = LibraryGraph::new();
        for &(from, to) in edges {
            g.entry(from).or_default().push(to);
        }
        g
    }

    #[test]
    fn cycle_edge_is_detected() {
        // 1 -> 2 -> 3; adding 3 -> 1 would close a cycle, detected because
        // 3 already reaches... 1 does reach 3.
        let g = graph(&[(1, 2), (2, 3)]);
        assert!(is_reachable(&g, 1, 3));
        assert!(!is_reachable(&g, 3, 1));
    }

    #[test]
    fn reachable_set_covers_diamond() {
        let g = graph(&[(1, 2), (1, 3), (2, 4), (3, 4)]);
        let set = reachable_libraries(&g, &[1]);
        assert_eq!(set, BTreeSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn reachable_set_from_multiple_roots() {
        let g = graph(&[(1, 2), (3, 4)]);
        let set = reachable_libraries(&g, &[1, 3]);
        assert_eq!(set, BTreeSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn installation_status_is_monotonic() {
        use InstallationStatus::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Installed));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Downloading.can_transition_to(Downloading)); // progress updates
        assert!(Installed.can_transition_to(Removed));
        assert!(!Installed.can_transition_to(Downloading));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn preset_resolution_substitutes_ids() {
        let preset = PathPreset {
            preset_id: 1,
            game_id: 1,
            name: "addons".into(),
            path_template: "left4dead2/addons/{workshop_id}".into(),
        };
        let addon = WorkshopAddon {
            addon_id: 11,
            game_id: 1,
            workshop_id: 123456789,
            platform_type: PlatformType::Steam,
            name: "map pack".into(),
            is_collection: false,
            preset_id: Some(1),
            installation_path: None,
        };
        assert_eq!(preset.resolve(&addon), "left4dead2/addons/123456789");
    }
}
