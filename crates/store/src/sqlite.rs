//! SQLite run store.
//!
//! Three tables:
//! - `runs`: one row per run, the run document without its stage map
//! - `stages`: one row per `(run, stage)`, the compare-and-set target
//! - `artifacts`: the latest artifact per `(run, stage)`
//!
//! Stage transitions run inside a transaction and finish with a conditional
//! `UPDATE ... WHERE status = ?`, so a concurrent writer that changed the
//! status in between makes the update hit zero rows and the transition fails
//! with a conflict.

use async_trait::async_trait;
use chrono::Utc;
use lorekeep_core::error::StoreError;
use lorekeep_core::store::check_transition;
use lorekeep_core::{Artifact, ArtifactPayload, Run, RunId, RunStore, RunUpdate, StageState, StageStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteRunStore {
    pool: SqlitePool,
}

fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Storage(format!("{context}: {e}"))
}

fn corrupt(key: &str) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
    move |e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("serialization: {e}")))
}

impl SqliteRunStore {
    /// Open a store at `path`, creating the database and schema if needed.
    ///
    /// `"sqlite::memory:"` gives an ephemeral single-connection database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Each connection to an in-memory database is its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite run store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "runs table",
                r#"
                CREATE TABLE IF NOT EXISTS runs (
                    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                    id          TEXT UNIQUE NOT NULL,
                    status      TEXT NOT NULL,
                    document    TEXT NOT NULL,
                    created_at  TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "stages table",
                r#"
                CREATE TABLE IF NOT EXISTS stages (
                    run_id  TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    stage   TEXT NOT NULL,
                    status  TEXT NOT NULL,
                    state   TEXT NOT NULL,
                    PRIMARY KEY (run_id, stage)
                )
                "#,
            ),
            (
                "artifacts table",
                r#"
                CREATE TABLE IF NOT EXISTS artifacts (
                    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    stage       TEXT NOT NULL,
                    id          TEXT NOT NULL,
                    kind        TEXT NOT NULL,
                    digest      TEXT NOT NULL,
                    document    TEXT NOT NULL,
                    PRIMARY KEY (run_id, stage)
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn load_stages(&self, run_id: &str) -> Result<BTreeMap<String, StageState>, StoreError> {
        let rows = sqlx::query("SELECT stage, state FROM stages WHERE run_id = ?1")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("load stages"))?;

        let mut stages = BTreeMap::new();
        for row in rows {
            let stage: String = row.try_get("stage").map_err(storage("stage column"))?;
            let state: String = row.try_get("state").map_err(storage("state column"))?;
            let key = format!("{run_id}/{stage}");
            let parsed: StageState = serde_json::from_str(&state).map_err(corrupt(&key))?;
            stages.insert(stage, parsed);
        }
        Ok(stages)
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_run(&self, run: Run) -> Result<RunId, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;

        let exists = sqlx::query("SELECT 1 FROM runs WHERE id = ?1")
            .bind(&run.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage("lookup run"))?;
        if exists.is_some() {
            return Err(StoreError::RunExists(run.id));
        }

        let mut header = run.clone();
        header.stages.clear();
        sqlx::query(
            "INSERT INTO runs (id, status, document, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&run.id)
        .bind(run.status.to_string())
        .bind(encode(&header)?)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage("insert run"))?;

        for (stage, state) in &run.stages {
            sqlx::query("INSERT INTO stages (run_id, stage, status, state) VALUES (?1, ?2, ?3, ?4)")
                .bind(&run.id)
                .bind(stage)
                .bind(state.status.to_string())
                .bind(encode(state)?)
                .execute(&mut *tx)
                .await
                .map_err(storage("insert stage"))?;
        }

        tx.commit().await.map_err(storage("commit"))?;
        debug!(run_id = %run.id, "Run created");
        Ok(run.id)
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query("SELECT document FROM runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load run"))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let document: String = row.try_get("document").map_err(storage("document column"))?;
        let mut run: Run = serde_json::from_str(&document).map_err(corrupt(id))?;
        run.stages = self.load_stages(id).await?;
        Ok(Some(run))
    }

    async fn upsert_run_status(&self, id: &str, update: RunUpdate) -> Result<Run, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;

        let row = sqlx::query("SELECT document FROM runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage("load run"))?
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;
        let document: String = row.try_get("document").map_err(storage("document column"))?;
        let mut run: Run = serde_json::from_str(&document).map_err(corrupt(id))?;
        run.apply(&update);

        sqlx::query("UPDATE runs SET status = ?1, document = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(run.status.to_string())
            .bind(encode(&run)?)
            .bind(run.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage("update run"))?;

        tx.commit().await.map_err(storage("commit"))?;
        run.stages = self.load_stages(id).await?;
        Ok(run)
    }

    async fn transition_stage(
        &self,
        run_id: &str,
        stage: &str,
        expected: &[StageStatus],
        next: StageState,
    ) -> Result<StageState, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        let previous = swap_stage(&mut tx, run_id, stage, expected, |_| next).await?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(previous)
    }

    async fn insert_artifact(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
    ) -> Result<Artifact, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage("acquire"))?;
        require_run(&mut conn, run_id).await?;
        let artifact = Artifact::new(run_id, stage, payload);
        write_artifact(&mut conn, &artifact).await?;
        debug!(run_id, stage, artifact_id = %artifact.id, "Artifact stored");
        Ok(artifact)
    }

    async fn commit_stage(
        &self,
        run_id: &str,
        stage: &str,
        payload: ArtifactPayload,
        notes: Vec<String>,
    ) -> Result<Artifact, StoreError> {
        let artifact = Artifact::new(run_id, stage, payload);
        let artifact_id = artifact.id.clone();

        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        swap_stage(&mut tx, run_id, stage, &[StageStatus::Running], |current| {
            current.ok(artifact_id, notes)
        })
        .await?;
        write_artifact(&mut tx, &artifact).await?;
        tx.commit().await.map_err(storage("commit"))?;

        debug!(run_id, stage, artifact_id = %artifact.id, "Stage committed");
        Ok(artifact)
    }

    async fn reset_stage(&self, run_id: &str, stage: &str) -> Result<StageState, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        let previous = swap_stage(&mut tx, run_id, stage, &StageStatus::ALL, |_| StageState::default()).await?;
        sqlx::query("DELETE FROM artifacts WHERE run_id = ?1 AND stage = ?2")
            .bind(run_id)
            .bind(stage)
            .execute(&mut *tx)
            .await
            .map_err(storage("delete artifact"))?;
        tx.commit().await.map_err(storage("commit"))?;
        Ok(previous)
    }

    async fn find_artifact(&self, run_id: &str, stage: &str) -> Result<Option<Artifact>, StoreError> {
        let row = sqlx::query("SELECT document FROM artifacts WHERE run_id = ?1 AND stage = ?2")
            .bind(run_id)
            .bind(stage)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load artifact"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document: String = row.try_get("document").map_err(storage("document column"))?;
        let key = format!("{run_id}/{stage}");
        serde_json::from_str(&document).map(Some).map_err(corrupt(&key))
    }

    async fn remove_artifact(&self, run_id: &str, stage: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM artifacts WHERE run_id = ?1 AND stage = ?2")
            .bind(run_id)
            .bind(stage)
            .execute(&self.pool)
            .await
            .map_err(storage("delete artifact"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM runs ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list runs"))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(storage("id column")))
            .collect()
    }
}

async fn require_run(conn: &mut SqliteConnection, run_id: &str) -> Result<(), StoreError> {
    let exists = sqlx::query("SELECT 1 FROM runs WHERE id = ?1")
        .bind(run_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage("lookup run"))?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::RunNotFound(run_id.to_string())),
    }
}

/// Compare-and-set of one stage row on `conn`. The caller owns the
/// transaction.
async fn swap_stage(
    conn: &mut SqliteConnection,
    run_id: &str,
    stage: &str,
    expected: &[StageStatus],
    next: impl FnOnce(StageState) -> StageState,
) -> Result<StageState, StoreError> {
    require_run(conn, run_id).await?;

    let idle = StageState::default();
    sqlx::query("INSERT OR IGNORE INTO stages (run_id, stage, status, state) VALUES (?1, ?2, ?3, ?4)")
        .bind(run_id)
        .bind(stage)
        .bind(idle.status.to_string())
        .bind(encode(&idle)?)
        .execute(&mut *conn)
        .await
        .map_err(storage("seed stage"))?;

    let row = sqlx::query("SELECT state FROM stages WHERE run_id = ?1 AND stage = ?2")
        .bind(run_id)
        .bind(stage)
        .fetch_one(&mut *conn)
        .await
        .map_err(storage("load stage"))?;
    let state: String = row.try_get("state").map_err(storage("state column"))?;
    let key = format!("{run_id}/{stage}");
    let current: StageState = serde_json::from_str(&state).map_err(corrupt(&key))?;
    check_transition(run_id, stage, &current, expected)?;

    let next = next(current.clone());
    let updated = sqlx::query(
        "UPDATE stages SET status = ?1, state = ?2 WHERE run_id = ?3 AND stage = ?4 AND status = ?5",
    )
    .bind(next.status.to_string())
    .bind(encode(&next)?)
    .bind(run_id)
    .bind(stage)
    .bind(current.status.to_string())
    .execute(&mut *conn)
    .await
    .map_err(storage("update stage"))?;

    if updated.rows_affected() != 1 {
        return Err(StoreError::Conflict {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            expected: current.status.to_string(),
            found: "a concurrent update".into(),
        });
    }

    sqlx::query("UPDATE runs SET updated_at = ?1 WHERE id = ?2")
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&mut *conn)
        .await
        .map_err(storage("touch run"))?;
    Ok(current)
}

async fn write_artifact(conn: &mut SqliteConnection, artifact: &Artifact) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO artifacts (run_id, stage, id, kind, digest, document)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(run_id, stage) DO UPDATE SET
            id = excluded.id,
            kind = excluded.kind,
            digest = excluded.digest,
            document = excluded.document
        "#,
    )
    .bind(&artifact.run_id)
    .bind(&artifact.stage)
    .bind(&artifact.id)
    .bind(artifact.payload.kind().to_string())
    .bind(&artifact.digest)
    .bind(encode(artifact)?)
    .execute(&mut *conn)
    .await
    .map_err(storage("insert artifact"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::{ContentKind, FactPack, RunRequest, RunStatus};

    async fn store() -> (tempfile::TempDir, SqliteRunStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let store = SqliteRunStore::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        (dir, store)
    }

    fn run() -> Run {
        Run::new(RunRequest::new(ContentKind::Creature).param("prompt", "a glass-winged moth"))
    }

    #[tokio::test]
    async fn create_get_and_update() {
        let (_dir, store) = store().await;
        let id = store.create_run(run()).await.unwrap();

        let updated = store
            .upsert_run_status(&id, RunUpdate::status(RunStatus::Failed).failed_at("creator", "boom"))
            .await
            .unwrap();
        assert_eq!(updated.failed_stage.as_deref(), Some("creator"));

        let loaded = store.get_run(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn duplicate_run_rejected() {
        let (_dir, store) = store().await;
        let r = run();
        store.create_run(r.clone()).await.unwrap();
        assert!(matches!(store.create_run(r).await, Err(StoreError::RunExists(_))));
    }

    #[tokio::test]
    async fn stage_transitions_are_compare_and_set() {
        let (_dir, store) = store().await;
        let id = store.create_run(run()).await.unwrap();

        store
            .transition_stage(&id, "planner", &[StageStatus::Idle], StageState::running())
            .await
            .unwrap();
        let conflict = store
            .transition_stage(&id, "planner", &[StageStatus::Idle], StageState::running())
            .await;
        assert!(matches!(conflict, Err(StoreError::Conflict { .. })));

        let previous = store
            .transition_stage(
                &id,
                "planner",
                &[StageStatus::Running],
                StageState::running().ok("art_1".into(), vec![]),
            )
            .await
            .unwrap();
        assert_eq!(previous.status, StageStatus::Running);

        let loaded = store.get_run(&id).await.unwrap().unwrap();
        assert_eq!(loaded.stage_status("planner"), StageStatus::Ok);
        assert_eq!(loaded.stage("planner").artifact_id.as_deref(), Some("art_1"));
    }

    #[tokio::test]
    async fn concurrent_claims_admit_one_winner() {
        let (_dir, store) = store().await;
        let store = std::sync::Arc::new(store);
        let id = store.create_run(run()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition_stage(&id, "creator", &[StageStatus::Idle], StageState::running())
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn artifacts_replace_and_remove() {
        let (_dir, store) = store().await;
        let id = store.create_run(run()).await.unwrap();

        store
            .insert_artifact(&id, "retriever", ArtifactPayload::FactPack(FactPack::default()))
            .await
            .unwrap();
        let second = store
            .insert_artifact(&id, "retriever", ArtifactPayload::FactPack(FactPack::default()))
            .await
            .unwrap();

        let found = store.find_artifact(&id, "retriever").await.unwrap().unwrap();
        assert_eq!(found, second);

        assert!(store.remove_artifact(&id, "retriever").await.unwrap());
        assert!(store.find_artifact(&id, "retriever").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_runs_in_creation_order() {
        let (_dir, store) = store().await;
        let a = store.create_run(run()).await.unwrap();
        let b = store.create_run(run()).await.unwrap();
        assert_eq!(store.list_runs().await.unwrap(), vec![a, b]);
    }
}
