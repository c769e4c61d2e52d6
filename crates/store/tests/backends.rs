//! The same behavioral checks against every backend.

use lorekeep_core::{
    ArtifactPayload, ContentKind, Fact, FactPack, Run, RunRequest, RunStatus, RunStore, RunUpdate, StageState,
    StageStatus, StoreError,
};
use lorekeep_store::{FileRunStore, InMemoryRunStore};

async fn exercise(store: &dyn RunStore) {
    let run = Run::new(RunRequest::new(ContentKind::Spell).param("prompt", "a spell that silences bells"));
    let id = store.create_run(run).await.unwrap();

    store
        .upsert_run_status(&id, RunUpdate::status(RunStatus::Running).at_stage("retriever"))
        .await
        .unwrap();

    store
        .transition_stage(&id, "retriever", &[StageStatus::Idle, StageStatus::Fail], StageState::running())
        .await
        .unwrap();

    let pack = FactPack {
        facts: vec![Fact::new("f1", "Bells in Verrow are cast from moon-iron.")],
        ..Default::default()
    };
    let artifact = store
        .insert_artifact(&id, "retriever", ArtifactPayload::FactPack(pack))
        .await
        .unwrap();

    store
        .transition_stage(
            &id,
            "retriever",
            &[StageStatus::Running],
            StageState::running().ok(artifact.id.clone(), vec!["1 fact".into()]),
        )
        .await
        .unwrap();

    let loaded = store.get_run(&id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RunStatus::Running);
    assert_eq!(loaded.current_stage.as_deref(), Some("retriever"));
    assert_eq!(loaded.stage_status("retriever"), StageStatus::Ok);
    assert_eq!(store.artifact_id(&id, "retriever").await.unwrap(), Some(artifact.id.clone()));

    let found = store.find_artifact(&id, "retriever").await.unwrap().unwrap();
    assert_eq!(found.digest, artifact.digest);
    assert_eq!(found.payload.as_fact_pack().unwrap().facts.len(), 1);

    // An ok stage cannot be claimed again without an explicit reset.
    let conflict = store
        .transition_stage(&id, "retriever", &[StageStatus::Idle, StageStatus::Fail], StageState::running())
        .await;
    assert!(matches!(conflict, Err(StoreError::Conflict { .. })));

    assert!(matches!(
        store.upsert_run_status("run_unknown", RunUpdate::status(RunStatus::Failed)).await,
        Err(StoreError::RunNotFound(_))
    ));

    assert_eq!(store.list_runs().await.unwrap(), vec![id]);
}

async fn exercise_commit_and_reset(store: &dyn RunStore) {
    let run = Run::new(RunRequest::new(ContentKind::Item).param("prompt", "a lantern that burns memories"));
    let id = store.create_run(run).await.unwrap();
    let pack = || ArtifactPayload::FactPack(FactPack::default());

    // Only a running stage can be committed, and a refused commit stores nothing.
    let refused = store.commit_stage(&id, "retriever", pack(), vec![]).await;
    assert!(matches!(refused, Err(StoreError::Conflict { .. })));
    assert!(store.find_artifact(&id, "retriever").await.unwrap().is_none());

    store
        .transition_stage(&id, "retriever", &[StageStatus::Idle], StageState::running())
        .await
        .unwrap();
    let artifact = store
        .commit_stage(&id, "retriever", pack(), vec!["0 facts".into()])
        .await
        .unwrap();

    let state = store.get_run(&id).await.unwrap().unwrap().stage("retriever");
    assert_eq!(state.status, StageStatus::Ok);
    assert_eq!(state.artifact_id.as_deref(), Some(artifact.id.as_str()));
    assert_eq!(state.notes, vec!["0 facts".to_string()]);
    assert_eq!(store.find_artifact(&id, "retriever").await.unwrap().unwrap().id, artifact.id);

    // A second commit of the same stage is a conflict and keeps the first artifact.
    let again = store.commit_stage(&id, "retriever", pack(), vec![]).await;
    assert!(matches!(again, Err(StoreError::Conflict { .. })));
    assert_eq!(store.find_artifact(&id, "retriever").await.unwrap().unwrap().id, artifact.id);

    let previous = store.reset_stage(&id, "retriever").await.unwrap();
    assert_eq!(previous.status, StageStatus::Ok);
    assert_eq!(store.get_run(&id).await.unwrap().unwrap().stage_status("retriever"), StageStatus::Idle);
    assert!(store.find_artifact(&id, "retriever").await.unwrap().is_none());

    assert!(matches!(
        store.reset_stage("run_unknown", "retriever").await,
        Err(StoreError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn in_memory_backend() {
    exercise(&InMemoryRunStore::new()).await;
    exercise_commit_and_reset(&InMemoryRunStore::new()).await;
}

#[tokio::test]
async fn file_backend() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&FileRunStore::new(dir.path())).await;
    exercise_commit_and_reset(&FileRunStore::new(dir.path())).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_backend() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("lorekeep.db").display());
    let store = lorekeep_store::SqliteRunStore::new(&url).await.unwrap();
    exercise(&store).await;
    exercise_commit_and_reset(&store).await;
}
