//! Atomic JSON persistence for deployment records.
//!
//! Every write goes through a temp-file-plus-rename so a crash never leaves
//! a half-written `index.json` or deployment record behind.

use crate::error::AgentError;
use crate::models::{DeploymentIndex, DeploymentRecord, DeploymentStatus, IndexEntry};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct StateStore {
    deployment_dir: PathBuf,
    index_file: PathBuf,
}

impl StateStore {
    pub fn new(deployment_dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let deployment_dir = deployment_dir.into();
        std::fs::create_dir_all(&deployment_dir)?;
        let index_file = deployment_dir.join("index.json");
        let store = Self { deployment_dir, index_file };
        if !store.index_file.exists() {
            store.atomic_write_json(&store.index_file, &DeploymentIndex::default())?;
        }
        Ok(store)
    }

    /// Write `data` to `filepath` via a same-directory temp file, `fsync`,
    /// then `rename` — the rename is what makes the write atomic. The temp
    /// file is removed if any step before the rename fails.
    fn atomic_write_json<T: Serialize>(&self, filepath: &Path, data: &T) -> Result<(), AgentError> {
        let dir = filepath.parent().unwrap_or(&self.deployment_dir);
        std::fs::create_dir_all(dir)?;

        let tmp_path = dir.join(format!(".tmp_{}.json", uuid_like_suffix()));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            let json = serde_json::to_vec_pretty(data)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            file.write_all(&json)?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(AgentError::configuration_error(
                format!("Failed to write {}: {e}", filepath.display()),
                serde_json::json!({ "filepath": filepath.display().to_string() }),
            ));
        }

        std::fs::rename(&tmp_path, filepath).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            AgentError::configuration_error(
                format!("Failed to write {}: {e}", filepath.display()),
                serde_json::json!({ "filepath": filepath.display().to_string() }),
            )
        })
    }

    fn read_json<T: DeserializeOwned>(&self, filepath: &Path) -> Result<T, AgentError> {
        let bytes = std::fs::read(filepath).map_err(|e| {
            AgentError::configuration_error(
                format!("Failed to read {}: {e}", filepath.display()),
                serde_json::json!({ "filepath": filepath.display().to_string() }),
            )
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AgentError::configuration_error(
                format!("Failed to read {}: {e}", filepath.display()),
                serde_json::json!({ "filepath": filepath.display().to_string() }),
            )
        })
    }

    fn deployment_path(&self, deployment_id: &str) -> PathBuf {
        self.deployment_dir.join(format!("{deployment_id}.json"))
    }

    /// Persist `record`'s own file, then remove-and-reinsert its entry in
    /// `index.json` so the index always reflects the record's latest status.
    pub fn save(&self, record: &DeploymentRecord) -> Result<(), AgentError> {
        self.atomic_write_json(&self.deployment_path(&record.deployment_id), record)?;

        let mut index: DeploymentIndex = self.read_json(&self.index_file)?;
        index
            .deployments
            .retain(|e| e.deployment_id != record.deployment_id);
        index.deployments.push(IndexEntry {
            deployment_id: record.deployment_id.clone(),
            status: record.status,
            repo_url: record.repo_url.clone(),
            updated_at: Utc::now(),
        });
        self.atomic_write_json(&self.index_file, &index)?;

        info!(
            deployment_id = %record.deployment_id,
            status = %record.status,
            repo_url = %record.repo_url,
            "deployment saved"
        );
        Ok(())
    }

    pub fn load(&self, deployment_id: &str) -> Result<Option<DeploymentRecord>, AgentError> {
        let path = self.deployment_path(deployment_id);
        if !path.exists() {
            warn!(deployment_id, "deployment not found");
            return Ok(None);
        }
        Ok(Some(self.read_json(&path)?))
    }

    /// Most recent `Running` deployment for `repo_url`, optionally excluding
    /// one deployment ID (typically the one that just failed).
    pub fn find_latest_successful(
        &self,
        repo_url: &str,
        exclude: Option<&str>,
    ) -> Result<Option<DeploymentRecord>, AgentError> {
        let index: DeploymentIndex = self.read_json(&self.index_file)?;

        let mut candidates: Vec<&IndexEntry> = index
            .deployments
            .iter()
            .filter(|e| {
                e.repo_url == repo_url
                    && e.status == DeploymentStatus::Running
                    && exclude != Some(e.deployment_id.as_str())
            })
            .collect();

        candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        match candidates.first() {
            Some(entry) => self.load(&entry.deployment_id),
            None => Ok(None),
        }
    }

    pub fn list_all(&self) -> Result<Vec<IndexEntry>, AgentError> {
        let index: DeploymentIndex = self.read_json(&self.index_file)?;
        Ok(index.deployments)
    }
}

/// Lightweight unique suffix for temp file names; doesn't need to be a real
/// UUID, just collision-free across concurrent writers in the same process.
fn uuid_like_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    format!("{pid}-{n}-{}", std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentStatus;

    fn sample_record(id: &str, repo: &str, status: DeploymentStatus) -> DeploymentRecord {
        DeploymentRecord {
            deployment_id: id.to_string(),
            repo_url: repo.to_string(),
            branch: "main".to_string(),
            commit_sha: "abc123".to_string(),
            project_type: "docker".to_string(),
            image_name: "demo".to_string(),
            image_tag: "demo:latest".to_string(),
            image_id: None,
            container_name: "demo".to_string(),
            container_id: None,
            host_port: 8080,
            container_port: 80,
            status,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            build_logs_path: None,
            error: None,
            rollback_from: None,
            steps: Vec::new(),
            healthcheck: None,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let record = sample_record("dep-20260730-abc123", "https://github.com/u/r.git", DeploymentStatus::Running);
        store.save(&record).unwrap();

        let loaded = store.load("dep-20260730-abc123").unwrap().unwrap();
        assert_eq!(loaded.deployment_id, record.deployment_id);
        assert_eq!(loaded.status, DeploymentStatus::Running);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        assert!(store.load("dep-20260730-missing").unwrap().is_none());
    }

    #[test]
    fn re_saving_updates_index_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let mut record = sample_record("dep-20260730-dup", "https://github.com/u/r.git", DeploymentStatus::Pending);
        store.save(&record).unwrap();
        record.status = DeploymentStatus::Running;
        store.save(&record).unwrap();

        let all = store.list_all().unwrap();
        let matches: Vec<_> = all.iter().filter(|e| e.deployment_id == "dep-20260730-dup").collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].status, DeploymentStatus::Running);
    }

    #[test]
    fn finds_latest_successful_excluding_given_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        let repo = "https://github.com/u/r.git";

        let older = sample_record("dep-20260728-old", repo, DeploymentStatus::Running);
        store.save(&older).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = sample_record("dep-20260729-new", repo, DeploymentStatus::Running);
        store.save(&newer).unwrap();

        let latest = store.find_latest_successful(repo, None).unwrap().unwrap();
        assert_eq!(latest.deployment_id, "dep-20260729-new");

        let excluded = store
            .find_latest_successful(repo, Some("dep-20260729-new"))
            .unwrap()
            .unwrap();
        assert_eq!(excluded.deployment_id, "dep-20260728-old");
    }
}
