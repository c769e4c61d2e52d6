//! Runs one validation guard as its own stage.

use super::creator::CREATOR;
use super::retriever::RETRIEVER;
use crate::stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
use async_trait::async_trait;
use lorekeep_core::{ArtifactKind, ArtifactPayload, GuardResult};
use lorekeep_guards::{Guard, GuardInput};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct GuardStage {
    guard: Arc<dyn Guard>,
    dependencies: Vec<String>,
}

impl GuardStage {
    /// A guard stage reading the creator's draft plus `extra` dependencies.
    /// A retriever dependency supplies the fact pack; guard-stage
    /// dependencies supply their reports.
    pub fn new(guard: Arc<dyn Guard>, extra: &[&str]) -> Self {
        let mut dependencies = vec![CREATOR.to_string()];
        dependencies.extend(extra.iter().map(|s| s.to_string()));
        Self { guard, dependencies }
    }
}

#[async_trait]
impl Stage for GuardStage {
    fn name(&self) -> &str {
        self.guard.name()
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn output_kind(&self) -> ArtifactKind {
        ArtifactKind::GuardReport
    }

    async fn execute(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let draft = inputs.draft(CREATOR)?;
        let reports: Vec<GuardResult> = inputs.guard_reports().into_iter().cloned().collect();

        let mut input = GuardInput::new(ctx.run.kind, &draft.draft).with_reports(&reports);
        if inputs.contains(RETRIEVER) {
            input = input.with_fact_pack(inputs.fact_pack(RETRIEVER)?);
        }

        let result = self.guard.evaluate(&input)?;
        if !result.ok {
            warn!(run_id = %ctx.run_id(), guard = self.guard.name(), errors = ?result.errors, "Guard rejected draft");
            return Err(StageError::GuardRejected {
                guard: result.guard,
                errors: result.errors,
            });
        }

        let mut notes: Vec<String> = result.advisories().cloned().collect();
        if let Some(reason) = result.reason.as_ref().filter(|_| result.skipped) {
            notes.insert(0, format!("skipped: {reason}"));
        }
        debug!(run_id = %ctx.run_id(), guard = self.guard.name(), advisories = notes.len(), "Guard passed");
        Ok(StageOutput::new(ArtifactPayload::GuardReport(result)).with_notes(notes))
    }
}
