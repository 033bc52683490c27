//! Run-state file
//!
//! `.clabflow/state.json` remembers, per topology, the last run's resource
//! statuses and per-node bootstrap records (established login, credential
//! revision) so the next run can resume from them.

use crate::error::{CloudError, Result};
use crate::reconciler::SyncReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".clabflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Whole run-state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Keyed by topology safe name
    pub topologies: BTreeMap<String, TopologyRecord>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            topologies: BTreeMap::new(),
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topology(&self, name: &str) -> Option<&TopologyRecord> {
        self.topologies.get(name)
    }

    pub fn topology_mut(&mut self, name: &str, namespace: &str) -> &mut TopologyRecord {
        self.updated_at = Utc::now();
        self.topologies
            .entry(name.to_string())
            .or_insert_with(|| TopologyRecord::new(namespace))
    }

    pub fn remove_topology(&mut self, name: &str) -> Option<TopologyRecord> {
        let removed = self.topologies.remove(name);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }
}

/// Everything remembered about one topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyRecord {
    pub namespace: String,
    #[serde(default)]
    pub source: Option<String>,
    /// `kind/name` → last status
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Node name → bootstrap record
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeRecord>,
    pub updated_at: DateTime<Utc>,
}

impl TopologyRecord {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            source: None,
            resources: BTreeMap::new(),
            nodes: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Replace resource records with the outcome of a run
    pub fn record_sync(&mut self, report: &SyncReport) {
        let now = Utc::now();
        for resource in &report.resources {
            let key = resource.id.to_string();
            if resource.status == crate::reconciler::ResourceStatus::Deleted {
                self.resources.remove(&key);
                continue;
            }
            self.resources.insert(
                key,
                ResourceRecord {
                    status: resource.status.to_string(),
                    updated_at: now,
                },
            );
        }
        self.updated_at = now;
    }

    /// Drop node records for nodes no longer in the topology.
    ///
    /// Their credentials are invalid from now on. Returns the dropped names.
    pub fn retain_nodes<'a>(&mut self, current: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let keep: std::collections::BTreeSet<&str> = current.into_iter().collect();
        let removed: Vec<String> = self
            .nodes
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        for name in &removed {
            self.nodes.remove(name);
            tracing::debug!(node = %name, "Dropped record of removed node");
        }
        if !removed.is_empty() {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn set_node(&mut self, name: impl Into<String>, record: NodeRecord) {
        self.nodes.insert(name.into(), record);
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Last bootstrap result of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub state: String,
    /// Label of the login that last succeeded
    #[serde(default)]
    pub established_login: Option<String>,
    /// Revision of the credential last pushed
    #[serde(default)]
    pub credential_revision: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Reads and writes the run-state file under a project directory
pub struct StateManager {
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    pub async fn load(&self) -> Result<RunState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, starting fresh");
            return Ok(RunState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: RunState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state for {} topologies", state.topologies.len());
        Ok(state)
    }

    /// Save, keeping the previous file as a backup
    pub async fn save(&self, state: &RunState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;
        tracing::debug!("Saved state for {} topologies", state.topologies.len());
        Ok(())
    }

    /// Take the advisory lock; a lock older than an hour is considered stale
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} (pid {}) since {}",
                    lock_info.holder, lock_info.pid, lock_info.acquired_at
                )));
            }
            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&lock_info)?).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    #[serde(default)]
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held while a run owns the state directory; released on drop
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn node_record(login: &str) -> NodeRecord {
        NodeRecord {
            state: "complete".to_string(),
            established_login: Some(login.to_string()),
            credential_revision: Some("42".to_string()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = RunState::new();
        state
            .topology_mut("dc1", "clab-dc1")
            .set_node("leaf1", node_record("admin"));
        manager.save(&state).await.unwrap();

        let loaded = manager.load().await.unwrap();
        let record = loaded.topology("dc1").unwrap();
        assert_eq!(record.namespace, "clab-dc1");
        assert_eq!(
            record.nodes["leaf1"].established_login.as_deref(),
            Some("admin")
        );
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        assert!(manager.load().await.unwrap().topologies.is_empty());
    }

    #[tokio::test]
    async fn test_save_keeps_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        manager.save(&RunState::new()).await.unwrap();
        manager.save(&RunState::new()).await.unwrap();
        assert!(temp_dir.path().join(".clabflow/state.json.backup").exists());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        let mut state = RunState::new();
        state.version = STATE_VERSION + 1;
        manager.save(&state).await.unwrap();
        assert!(matches!(
            manager.load().await,
            Err(CloudError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock().await.unwrap();
        assert!(matches!(
            manager.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));
        lock.release().await.unwrap();
        assert!(manager.acquire_lock().await.is_ok());
    }

    #[test]
    fn test_removed_nodes_lose_their_records() {
        let mut record = TopologyRecord::new("clab-dc1");
        record.set_node("leaf1", node_record("admin"));
        record.set_node("leaf2", node_record("admin"));

        let removed = record.retain_nodes(["leaf1"]);
        assert_eq!(removed, vec!["leaf2".to_string()]);
        assert!(record.nodes.contains_key("leaf1"));
        assert!(!record.nodes.contains_key("leaf2"));
    }
}
