//! In-memory run store: useful for testing and one-shot CLI runs.

use async_trait::async_trait;
use chrono::Utc;
use lorekeep_core::error::StoreError;
use lorekeep_core::store::check_transition;
use lorekeep_core::{Artifact, ArtifactPayload, Run, RunId, RunStore, RunUpdate, StageState, StageStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    runs: HashMap<RunId, Run>,
    /// Insertion order of run ids.
    order: Vec<RunId>,
    artifacts: HashMap<(RunId, String), Artifact>,
}

/// A run store that keeps everything behind one `RwLock`.
///
/// Every mutation takes the write lock, so compare-and-set is trivially
/// atomic.
#[derive(Clone, Default)]
pub struct InMemoryRunStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_run(&self, run: Run) -> Result<RunId, StoreError> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.id) {
            return Err(StoreError::RunExists(run.id));
        }
        let id = run.id.clone();
        state.order.push(id.clone());
        state.runs.insert(id.clone(), run);
        Ok(id)
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.state.read().await.runs.get(id).cloned())
    }

    async fn upsert_run_status(&self, id: &str, update: RunUpdate) -> Result<Run, StoreError> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;
        run.apply(&update);
        Ok(run.clone())
    }

    async fn transition_stage(
        &self,
        run_id: &str,
        stage: &str,
        expected: &[StageStatus],
        next: StageState,
    ) -> Result<StageState, StoreError> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        let current = run.stage(stage);
        check_transition(run_id, stage, &current, expected)?;
        run.stages.insert(stage.to_string(), next);
        run.updated_at = Utc::now();
        Ok(current)
    }

    async fn insert_artifact(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
    ) -> Result<Artifact, StoreError> {
        let mut state = self.state.write().await;
        if !state.runs.contains_key(run_id) {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        let artifact = Artifact::new(run_id, stage, payload);
        state
            .artifacts
            .insert((run_id.to_string(), stage.to_string()), artifact.clone());
        Ok(artifact)
    }

    async fn commit_stage(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
        notes: Vec<String>,
    ) -> Result<Artifact, StoreError> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        let current = run.stage(stage);
        check_transition(run_id, stage, &current, &[StageStatus::Running])?;

        let artifact = Artifact::new(run_id, stage, payload);
        run.stages
            .insert(stage.to_string(), current.ok(artifact.id.clone(), notes));
        run.updated_at = Utc::now();
        state
            .artifacts
            .insert((run_id.to_string(), stage.to_string()), artifact.clone());
        Ok(artifact)
    }

    async fn reset_stage(&self, run_id: &str, stage: &str) -> Result<StageState, StoreError> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        let previous = run.stage(stage);
        run.stages.insert(stage.to_string(), StageState::default());
        run.updated_at = Utc::now();
        state.artifacts.remove(&(run_id.to_string(), stage.to_string()));
        Ok(previous)
    }

    async fn find_artifact(&self, run_id: &str, stage: &str) -> Result<Option<Artifact>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .artifacts
            .get(&(run_id.to_string(), stage.to_string()))
            .cloned())
    }

    async fn remove_artifact(&self, run_id: &str, stage: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        Ok(state
            .artifacts
            .remove(&(run_id.to_string(), stage.to_string()))
            .is_some())
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        Ok(self.state.read().await.order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::{ContentKind, FactPack, RunRequest, RunStatus};

    fn run() -> Run {
        Run::new(RunRequest::new(ContentKind::Npc).param("prompt", "a weary ferryman"))
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryRunStore::new();
        let id = store.create_run(run()).await.unwrap();
        let loaded = store.get_run(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
        assert!(store.get_run("run_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_run_rejected() {
        let store = InMemoryRunStore::new();
        let r = run();
        store.create_run(r.clone()).await.unwrap();
        assert!(matches!(store.create_run(r).await, Err(StoreError::RunExists(_))));
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryRunStore::new();
        let id = store.create_run(run()).await.unwrap();

        let previous = store
            .transition_stage(&id, "planner", &[StageStatus::Idle], StageState::running())
            .await
            .unwrap();
        assert_eq!(previous.status, StageStatus::Idle);

        let second = store
            .transition_stage(&id, "planner", &[StageStatus::Idle], StageState::running())
            .await;
        assert!(matches!(second, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn artifact_replace_and_remove() {
        let store = InMemoryRunStore::new();
        let id = store.create_run(run()).await.unwrap();

        let first = store
            .insert_artifact(&id, "retriever", ArtifactPayload::FactPack(FactPack::default()))
            .await
            .unwrap();
        let second = store
            .insert_artifact(&id, "retriever", ArtifactPayload::FactPack(FactPack::default()))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let found = store.find_artifact(&id, "retriever").await.unwrap().unwrap();
        assert_eq!(found.id, second.id);

        assert!(store.remove_artifact(&id, "retriever").await.unwrap());
        assert!(!store.remove_artifact(&id, "retriever").await.unwrap());
    }

    #[tokio::test]
    async fn artifact_for_unknown_run_rejected() {
        let store = InMemoryRunStore::new();
        let result = store
            .insert_artifact("run_nope", "planner", ArtifactPayload::FactPack(FactPack::default()))
            .await;
        assert!(matches!(result, Err(StoreError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn list_runs_in_creation_order() {
        let store = InMemoryRunStore::new();
        let a = store.create_run(run()).await.unwrap();
        let b = store.create_run(run()).await.unwrap();
        assert_eq!(store.list_runs().await.unwrap(), vec![a, b]);
    }
}
