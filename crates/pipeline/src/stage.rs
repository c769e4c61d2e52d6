//! The stage contract.
//!
//! A stage is a pure function of its run context and the artifacts of its
//! declared dependencies. It never touches the store; the orchestrator
//! persists whatever it returns.

use async_trait::async_trait;
use lorekeep_chunking::SessionError;
use lorekeep_core::{
    Artifact, ArtifactKind, ArtifactPayload, Brief, DraftArtifact, EventBus, ExchangeError, FactPack, GuardResult,
    PayloadError, Registry, RetrievalError, Run,
};
use lorekeep_guards::GuardError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a stage hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub payload: ArtifactPayload,
    /// Free-form notes recorded on the stage state.
    pub notes: Vec<String>,
}

impl StageOutput {
    pub fn new(payload: ArtifactPayload) -> Self {
        Self {
            payload,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Why a stage did not produce an artifact.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("missing input from stage '{dependency}'")]
    MissingInput { dependency: String },

    #[error("stage '{dependency}' produced a {found} artifact, expected {expected}")]
    WrongInput {
        dependency: String,
        expected: ArtifactKind,
        found: ArtifactKind,
    },

    #[error("{0}")]
    Failed(String),

    #[error("guard '{guard}' rejected the draft: {}", .errors.join("; "))]
    GuardRejected { guard: String, errors: Vec<String> },

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Chunking(#[from] SessionError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl StageError {
    /// Details recorded alongside the error on the stage state.
    pub fn notes(&self) -> Vec<String> {
        match self {
            Self::GuardRejected { errors, .. } => errors.clone(),
            _ => Vec::new(),
        }
    }
}

/// Read-only view of the run a stage executes for.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run: Run,
    pub registry: Arc<Registry>,
    pub events: EventBus,
}

impl RunContext {
    pub fn run_id(&self) -> &str {
        &self.run.id
    }
}

/// Dependency artifacts keyed by stage name.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    artifacts: BTreeMap<String, Artifact>,
}

impl StageInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.stage.clone(), artifact);
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.artifacts.contains_key(stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn get(&self, stage: &str) -> Result<&Artifact, StageError> {
        self.artifacts.get(stage).ok_or_else(|| StageError::MissingInput {
            dependency: stage.to_string(),
        })
    }

    fn payload(&self, stage: &str, expected: ArtifactKind) -> Result<&ArtifactPayload, StageError> {
        let payload = &self.get(stage)?.payload;
        if payload.kind() != expected {
            return Err(StageError::WrongInput {
                dependency: stage.to_string(),
                expected,
                found: payload.kind(),
            });
        }
        Ok(payload)
    }

    pub fn brief(&self, stage: &str) -> Result<&Brief, StageError> {
        self.payload(stage, ArtifactKind::Brief)?
            .as_brief()
            .ok_or_else(|| StageError::MissingInput {
                dependency: stage.to_string(),
            })
    }

    pub fn fact_pack(&self, stage: &str) -> Result<&FactPack, StageError> {
        self.payload(stage, ArtifactKind::FactPack)?
            .as_fact_pack()
            .ok_or_else(|| StageError::MissingInput {
                dependency: stage.to_string(),
            })
    }

    pub fn draft(&self, stage: &str) -> Result<&DraftArtifact, StageError> {
        self.payload(stage, ArtifactKind::Draft)?
            .as_draft_artifact()
            .ok_or_else(|| StageError::MissingInput {
                dependency: stage.to_string(),
            })
    }

    /// Every guard report among the inputs, in stage-name order.
    pub fn guard_reports(&self) -> Vec<&GuardResult> {
        self.artifacts
            .values()
            .filter_map(|a| a.payload.as_guard_report())
            .collect()
    }
}

/// One named step of a pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Stages whose artifacts this one reads.
    fn dependencies(&self) -> Vec<String>;

    /// The payload variant this stage must produce.
    fn output_kind(&self) -> ArtifactKind;

    async fn execute(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError>;
}
