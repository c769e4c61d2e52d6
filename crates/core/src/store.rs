//! Run store trait: persistence of runs, stage states, and artifacts.
//!
//! The orchestrator is the only writer. Backends must make
//! [`RunStore::transition_stage`] an atomic compare-and-set per
//! `(run, stage)` key so two concurrent advances of the same run cannot
//! both succeed, and must write a stage's artifact together with its `ok`
//! state ([`RunStore::commit_stage`]).

use crate::artifact::{Artifact, ArtifactId, ArtifactPayload};
use crate::error::StoreError;
use crate::run::{Run, RunId, RunUpdate, StageState, StageStatus};
use async_trait::async_trait;

/// The core persistence trait.
///
/// Implementations: in-memory (testing), JSON file, SQLite.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Persist a new run. Fails if the id is taken.
    async fn create_run(&self, run: Run) -> std::result::Result<RunId, StoreError>;

    /// Load a run by id.
    async fn get_run(&self, id: &str) -> std::result::Result<Option<Run>, StoreError>;

    /// Apply a partial update to a run's top-level status fields.
    async fn upsert_run_status(&self, id: &str, update: RunUpdate) -> std::result::Result<Run, StoreError>;

    /// Atomically replace a stage's state if its current status is one of
    /// `expected`. Returns the previous state on success and
    /// [`StoreError::Conflict`] otherwise.
    async fn transition_stage(
        &self,
        run_id: &str,
        stage: &str,
        expected: &[StageStatus],
        next: StageState,
    ) -> std::result::Result<StageState, StoreError>;

    /// Persist a stage artifact, replacing any earlier one for the same
    /// `(run, stage)`.
    async fn insert_artifact(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
    ) -> std::result::Result<Artifact, StoreError>;

    /// Persist the stage artifact and mark the stage `ok` in one atomic
    /// step. Fails with [`StoreError::Conflict`], storing nothing, unless the
    /// stage is `running`.
    async fn commit_stage(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
        notes: Vec<String>,
    ) -> std::result::Result<Artifact, StoreError>;

    /// Put a stage back to `idle` and drop its artifact in one atomic step.
    /// Returns the previous state.
    async fn reset_stage(&self, run_id: &str, stage: &str) -> std::result::Result<StageState, StoreError>;

    /// The latest artifact for `(run, stage)`.
    async fn find_artifact(&self, run_id: &str, stage: &str) -> std::result::Result<Option<Artifact>, StoreError>;

    /// Remove the artifact for `(run, stage)`. Returns whether one existed.
    async fn remove_artifact(&self, run_id: &str, stage: &str) -> std::result::Result<bool, StoreError>;

    /// All run ids, oldest first.
    async fn list_runs(&self) -> std::result::Result<Vec<RunId>, StoreError>;

    /// Convenience: the artifact id recorded for a stage, if any.
    async fn artifact_id(&self, run_id: &str, stage: &str) -> std::result::Result<Option<ArtifactId>, StoreError> {
        Ok(self
            .get_run(run_id)
            .await?
            .and_then(|run| run.stage(stage).artifact_id))
    }
}

/// Shared compare-and-set check used by backends.
pub fn check_transition(
    run_id: &str,
    stage: &str,
    current: &StageState,
    expected: &[StageStatus],
) -> std::result::Result<(), StoreError> {
    if expected.contains(&current.status) {
        return Ok(());
    }
    Err(StoreError::Conflict {
        run_id: run_id.to_string(),
        stage: stage.to_string(),
        expected: expected
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("|"),
        found: current.status.to_string(),
    })
}
