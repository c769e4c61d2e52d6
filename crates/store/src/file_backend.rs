//! File-based run store: one JSON document per run.
//!
//! Layout: `<data_dir>/<run_id>.json`, holding the run and the latest
//! artifact of each stage. Every mutation rewrites the document through a
//! temporary file and a rename, so a reader never sees a half-written run.
//!
//! Default location: `~/.lorekeep/runs/`

use async_trait::async_trait;
use chrono::Utc;
use lorekeep_core::error::StoreError;
use lorekeep_core::store::check_transition;
use lorekeep_core::{Artifact, ArtifactPayload, Run, RunId, RunStore, RunUpdate, StageState, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct RunDocument {
    run: Run,
    #[serde(default)]
    artifacts: BTreeMap<String, Artifact>,
}

/// A directory-backed run store.
///
/// Mutations within one process are serialized by a mutex; each one is a
/// read-modify-write of a single run document.
pub struct FileRunStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRunStore {
    /// Open (or lazily create) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File run store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        let safe = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe {
            return Err(StoreError::Storage(format!("invalid run id '{run_id}'")));
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }

    async fn read(&self, run_id: &str) -> Result<Option<RunDocument>, StoreError> {
        let path = self.path_for(run_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Storage(format!("Failed to read {}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: run_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn read_existing(&self, run_id: &str) -> Result<RunDocument, StoreError> {
        self.read(run_id)
            .await?
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    async fn write(&self, doc: &RunDocument) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create run directory: {e}")))?;

        let path = self.path_for(&doc.run.id)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(doc)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize run: {e}")))?;

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace {}: {e}", path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn create_run(&self, run: Run) -> Result<RunId, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read(&run.id).await?.is_some() {
            return Err(StoreError::RunExists(run.id));
        }
        let id = run.id.clone();
        self.write(&RunDocument {
            run,
            artifacts: BTreeMap::new(),
        })
        .await?;
        Ok(id)
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.read(id).await?.map(|doc| doc.run))
    }

    async fn upsert_run_status(&self, id: &str, update: RunUpdate) -> Result<Run, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_existing(id).await?;
        doc.run.apply(&update);
        self.write(&doc).await?;
        Ok(doc.run)
    }

    async fn transition_stage(
        &self,
        run_id: &str,
        stage: &str,
        expected: &[StageStatus],
        next: StageState,
    ) -> Result<StageState, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_existing(run_id).await?;
        let current = doc.run.stage(stage);
        check_transition(run_id, stage, &current, expected)?;
        doc.run.stages.insert(stage.to_string(), next);
        doc.run.updated_at = Utc::now();
        self.write(&doc).await?;
        Ok(current)
    }

    async fn insert_artifact(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
    ) -> Result<Artifact, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_existing(run_id).await?;
        let artifact = Artifact::new(run_id, stage, payload);
        doc.artifacts.insert(stage.to_string(), artifact.clone());
        self.write(&doc).await?;
        Ok(artifact)
    }

    async fn commit_stage(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
        notes: Vec<String>,
    ) -> Result<Artifact, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_existing(run_id).await?;
        let current = doc.run.stage(stage);
        check_transition(run_id, stage, &current, &[StageStatus::Running])?;

        let artifact = Artifact::new(run_id, stage, payload);
        doc.run
            .stages
            .insert(stage.to_string(), current.ok(artifact.id.clone(), notes));
        doc.run.updated_at = Utc::now();
        doc.artifacts.insert(stage.to_string(), artifact.clone());
        self.write(&doc).await?;
        Ok(artifact)
    }

    async fn reset_stage(&self, run_id: &str, stage: &str) -> Result<StageState, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_existing(run_id).await?;
        let previous = doc.run.stage(stage);
        doc.run.stages.insert(stage.to_string(), StageState::default());
        doc.run.updated_at = Utc::now();
        doc.artifacts.remove(stage);
        self.write(&doc).await?;
        Ok(previous)
    }

    async fn find_artifact(&self, run_id: &str, stage: &str) -> Result<Option<Artifact>, StoreError> {
        Ok(self
            .read(run_id)
            .await?
            .and_then(|mut doc| doc.artifacts.remove(stage)))
    }

    async fn remove_artifact(&self, run_id: &str, stage: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut doc) = self.read(run_id).await? else {
            return Ok(false);
        };
        let removed = doc.artifacts.remove(stage).is_some();
        if removed {
            self.write(&doc).await?;
        }
        Ok(removed)
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("Failed to list runs: {e}"))),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to list runs: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read(id).await {
                Ok(Some(doc)) => runs.push((doc.run.created_at, doc.run.id)),
                Ok(None) => {}
                Err(e) => warn!(run_id = id, error = %e, "Skipping unreadable run document"),
            }
        }

        runs.sort();
        Ok(runs.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::{ContentKind, FactPack, RunRequest, RunStatus};

    fn run() -> Run {
        Run::new(RunRequest::new(ContentKind::Location).param("prompt", "a drowned chapel"))
    }

    #[tokio::test]
    async fn run_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let id = store.create_run(run()).await.unwrap();
        store
            .upsert_run_status(&id, RunUpdate::status(RunStatus::Running).at_stage("planner"))
            .await
            .unwrap();

        let reopened = FileRunStore::new(dir.path());
        let loaded = reopened.get_run(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.current_stage.as_deref(), Some("planner"));
    }

    #[tokio::test]
    async fn artifacts_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let id = store.create_run(run()).await.unwrap();
        let artifact = store
            .insert_artifact(&id, "retriever", ArtifactPayload::FactPack(FactPack::default()))
            .await
            .unwrap();

        let reopened = FileRunStore::new(dir.path());
        let found = reopened.find_artifact(&id, "retriever").await.unwrap().unwrap();
        assert_eq!(found.id, artifact.id);
        assert_eq!(found.digest, artifact.digest);
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let id = store.create_run(run()).await.unwrap();
        store
            .transition_stage(&id, "planner", &[StageStatus::Idle], StageState::running())
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{id}.json")]);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_and_skipped_in_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        let id = store.create_run(run()).await.unwrap();
        std::fs::write(dir.path().join("run_broken.json"), "{ not json").unwrap();

        assert!(matches!(
            store.get_run("run_broken").await,
            Err(StoreError::Corrupt { .. })
        ));
        assert_eq!(store.list_runs().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path());
        assert!(store.get_run("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("not-yet"));
        assert!(store.list_runs().await.unwrap().is_empty());
    }
}
