//! The stage orchestrator: drives one run through the pipeline.
//!
//! For each stage in order the orchestrator:
//!
//! 1. **Skips** it when it is already `ok` with a resolvable artifact
//! 2. **Resolves** the artifacts of its declared dependencies
//! 3. **Claims** it (`idle|fail → running`, compare-and-set in the store)
//! 4. **Executes** it, converting panics into stage failures
//! 5. **Validates** the payload against the stage's declared output kind
//! 6. **Commits** the artifact and the `ok` state in one store write
//!
//! The first failure marks the stage `fail`, the run `failed`, and stops.
//! Stages never touch the store; every side effect happens here.

use crate::pipeline::Pipeline;
use crate::stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
use chrono::Utc;
use futures::FutureExt;
use lorekeep_core::{
    Artifact, EventBus, PipelineEvent, Registry, Run, RunId, RunRequest, RunStatus, RunStore, RunUpdate, StageState,
    StageStatus, StoreError,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {run_id} failed at stage '{stage}'; use restart_from to run it again")]
    RunFailed { run_id: String, stage: String },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one stage as seen by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Outcome of a run, stages in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub stages: Vec<StageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn from_run(run: &Run, pipeline: &Pipeline) -> Self {
        let stages = pipeline
            .names()
            .into_iter()
            .map(|name| {
                let state = run.stage(name);
                StageReport {
                    name: name.to_string(),
                    status: state.status,
                    artifact_id: state.artifact_id,
                    error: state.error,
                    notes: state.notes,
                }
            })
            .collect();
        Self {
            run_id: run.id.clone(),
            status: run.status,
            stages,
            failed_stage: run.failed_stage.clone(),
            error: run.error.clone(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}

enum StageOutcome {
    Committed(Artifact),
    /// The stage failed and the run is now `failed`.
    Halted(RunReport),
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn RunStore>,
    registry: Arc<Registry>,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, store: Arc<dyn RunStore>, registry: Arc<Registry>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store,
            registry,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Persist a new queued run.
    pub async fn submit(&self, request: RunRequest) -> Result<RunId, OrchestratorError> {
        let run = Run::new(request);
        let id = self.store.create_run(run).await?;
        info!(run_id = %id, "Run submitted");
        Ok(id)
    }

    async fn load(&self, run_id: &str) -> Result<Run, OrchestratorError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))
    }

    /// The current report for a run, without executing anything.
    pub async fn report(&self, run_id: &str) -> Result<RunReport, OrchestratorError> {
        Ok(RunReport::from_run(&self.load(run_id).await?, &self.pipeline))
    }

    /// Drive a run to completion or to its first failure.
    ///
    /// Stages already `ok` are not re-executed; their artifacts are re-read
    /// as inputs. A completed run is returned as is. A failed run must be
    /// resumed with [`Orchestrator::restart_from`].
    pub async fn start_run(&self, run_id: &str) -> Result<RunReport, OrchestratorError> {
        let run = self.load(run_id).await?;
        match run.status {
            RunStatus::Completed => {
                debug!(run_id, "Run already completed");
                return Ok(RunReport::from_run(&run, &self.pipeline));
            }
            RunStatus::Failed => {
                return Err(OrchestratorError::RunFailed {
                    run_id: run_id.to_string(),
                    stage: run.failed_stage.unwrap_or_default(),
                });
            }
            RunStatus::Queued | RunStatus::Running => {}
        }

        let run = self
            .store
            .upsert_run_status(run_id, RunUpdate::status(RunStatus::Running).clear_failure())
            .await?;
        self.events.publish(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
            kind: run.kind.to_string(),
            timestamp: Utc::now(),
        });
        info!(run_id, kind = %run.kind, stages = self.pipeline.len(), "Run started");

        let mut resolved = StageInputs::new();
        for stage in self.pipeline.stages() {
            let name = stage.name();

            // Status first: an ok stage always has its artifact, because
            // both are written together.
            let status = self.load(run_id).await?.stage_status(name);
            if status == StageStatus::Ok {
                let Some(artifact) = self.store.find_artifact(run_id, name).await? else {
                    warn!(run_id, stage = name, "Stage marked ok but its artifact is missing");
                    return Err(OrchestratorError::Store(StoreError::Corrupt {
                        key: format!("{run_id}/{name}"),
                        reason: "stage is ok but has no artifact; use restart_from".into(),
                    }));
                };
                debug!(run_id, stage = name, "Stage already ok, reusing artifact");
                self.events.publish(PipelineEvent::StageSkipped {
                    run_id: run_id.to_string(),
                    stage: name.to_string(),
                    timestamp: Utc::now(),
                });
                resolved.insert(artifact);
                continue;
            }

            match self.run_stage(run_id, stage.as_ref(), &resolved).await? {
                StageOutcome::Committed(artifact) => resolved.insert(artifact),
                StageOutcome::Halted(report) => return Ok(report),
            }
        }

        let run = self
            .store
            .upsert_run_status(
                run_id,
                RunUpdate {
                    current_stage: Some(None),
                    ..RunUpdate::status(RunStatus::Completed)
                },
            )
            .await?;
        self.events.publish(PipelineEvent::RunCompleted {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
        });
        info!(run_id, "Run completed");
        Ok(RunReport::from_run(&run, &self.pipeline))
    }

    /// Execute one stage. Yields the committed artifact, or the final report
    /// when the stage failed and the run has halted.
    async fn run_stage(
        &self,
        run_id: &str,
        stage: &dyn Stage,
        resolved: &StageInputs,
    ) -> Result<StageOutcome, OrchestratorError> {
        let name = stage.name();

        // Claim first, so concurrent drivers of the same run cannot both
        // execute this stage.
        let running = StageState::running();
        self.store
            .transition_stage(
                run_id,
                name,
                &[StageStatus::Idle, StageStatus::Fail],
                running.clone(),
            )
            .await?;
        let run = self
            .store
            .upsert_run_status(run_id, RunUpdate::status(RunStatus::Running).at_stage(name))
            .await?;
        self.events.publish(PipelineEvent::StageStarted {
            run_id: run_id.to_string(),
            stage: name.to_string(),
            timestamp: Utc::now(),
        });
        debug!(run_id, stage = name, "Stage started");

        let started = Instant::now();
        let outcome = match gather_inputs(stage, resolved) {
            Ok(inputs) => {
                let ctx = RunContext {
                    run,
                    registry: self.registry.clone(),
                    events: self.events.clone(),
                };
                execute_guarded(stage, &ctx, &inputs).await
            }
            Err(e) => Err(e),
        };
        let outcome = outcome.and_then(|output| {
            output.payload.expect_kind(stage.output_kind())?;
            Ok(output)
        });

        match outcome {
            Ok(output) => Ok(StageOutcome::Committed(self.commit(run_id, name, output, started).await?)),
            Err(e) => Ok(StageOutcome::Halted(self.fail(run_id, name, running, e).await?)),
        }
    }

    async fn commit(
        &self,
        run_id: &str,
        name: &str,
        output: StageOutput,
        started: Instant,
    ) -> Result<Artifact, OrchestratorError> {
        let StageOutput { payload, notes } = output;
        let artifact = self.store.commit_stage(run_id, name, payload, notes).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.events.publish(PipelineEvent::StageCompleted {
            run_id: run_id.to_string(),
            stage: name.to_string(),
            artifact_id: artifact.id.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
        info!(run_id, stage = name, artifact_id = %artifact.id, duration_ms, "Stage completed");
        Ok(artifact)
    }

    async fn fail(
        &self,
        run_id: &str,
        name: &str,
        running: StageState,
        err: StageError,
    ) -> Result<RunReport, OrchestratorError> {
        let message = err.to_string();
        error!(run_id, stage = name, error = %message, "Stage failed");

        self.store
            .transition_stage(run_id, name, &[StageStatus::Running], running.fail(&message, err.notes()))
            .await?;
        let run = self
            .store
            .upsert_run_status(run_id, RunUpdate::status(RunStatus::Failed).at_stage(name).failed_at(name, &message))
            .await?;

        self.events.publish(PipelineEvent::StageFailed {
            run_id: run_id.to_string(),
            stage: name.to_string(),
            error: message.clone(),
            timestamp: Utc::now(),
        });
        self.events.publish(PipelineEvent::RunFailed {
            run_id: run_id.to_string(),
            stage: name.to_string(),
            error: message,
            timestamp: Utc::now(),
        });
        Ok(RunReport::from_run(&run, &self.pipeline))
    }

    /// Reset `stage` and every later stage to `idle`, drop their artifacts,
    /// and drive the run again from there.
    pub async fn restart_from(&self, run_id: &str, stage: &str) -> Result<RunReport, OrchestratorError> {
        let position = self
            .pipeline
            .position(stage)
            .ok_or_else(|| OrchestratorError::UnknownStage(stage.to_string()))?;
        self.load(run_id).await?;

        for later in &self.pipeline.stages()[position..] {
            self.store.reset_stage(run_id, later.name()).await?;
        }
        self.store
            .upsert_run_status(
                run_id,
                RunUpdate {
                    current_stage: Some(None),
                    ..RunUpdate::status(RunStatus::Queued).clear_failure()
                },
            )
            .await?;
        info!(run_id, stage, "Run reset for restart");

        self.start_run(run_id).await
    }
}

/// Pick out the declared dependencies. A dependency without an artifact is
/// a stage-input error.
fn gather_inputs(stage: &dyn Stage, resolved: &StageInputs) -> Result<StageInputs, StageError> {
    let mut inputs = StageInputs::new();
    for dependency in stage.dependencies() {
        let artifact = resolved.get(&dependency)?;
        inputs.insert(artifact.clone());
    }
    Ok(inputs)
}

/// Run a stage, turning a panic inside it into a [`StageError::Panicked`].
async fn execute_guarded(stage: &dyn Stage, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
    match AssertUnwindSafe(stage.execute(ctx, inputs)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(StageError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.pipeline)
            .field("store", &self.store.name())
            .finish()
    }
}
