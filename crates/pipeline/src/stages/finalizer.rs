//! Reconciles the request seed with the draft into the canonical entity.

use super::creator::CREATOR;
use super::planner::PLANNER;
use crate::stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
use async_trait::async_trait;
use lorekeep_core::{ArtifactKind, ArtifactPayload, Canonical};
use lorekeep_merge::{Contribution, MergeEngine};
use tracing::info;

pub const FINALIZER: &str = "finalizer";

pub struct FinalizerStage {
    guards: Vec<String>,
}

impl FinalizerStage {
    /// A finalizer that collects advisories from the named guard stages.
    pub fn new(guards: &[&str]) -> Self {
        Self {
            guards: guards.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Stage for FinalizerStage {
    fn name(&self) -> &str {
        FINALIZER
    }

    fn dependencies(&self) -> Vec<String> {
        let mut deps = vec![PLANNER.to_string(), CREATOR.to_string()];
        deps.extend(self.guards.iter().cloned());
        deps
    }

    fn output_kind(&self) -> ArtifactKind {
        ArtifactKind::Canonical
    }

    async fn execute(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let brief = inputs.brief(PLANNER)?;
        let draft = inputs.draft(CREATOR)?;

        let engine = MergeEngine::from_registry(&ctx.registry);
        let result = engine.merge_with_expected(
            &[
                Contribution::new(PLANNER, brief.seed.clone()),
                Contribution::new(CREATOR, draft.draft.entity.clone()),
            ],
            &[CREATOR],
        );

        let mut advisories = Vec::new();
        for guard in &self.guards {
            let artifact = inputs.get(guard)?;
            if let Some(report) = artifact.payload.as_guard_report() {
                advisories.extend(report.advisories().map(|a| format!("{}: {a}", report.guard)));
            }
        }

        let mut conflicts = draft.provenance.conflicts.clone();
        conflicts.extend(result.conflicts);
        let mut warnings = draft.provenance.warnings.clone();
        warnings.extend(result.warnings);

        let canonical = Canonical {
            kind: ctx.run.kind,
            entity: result.merged,
            canon_change: draft.draft.canon_change.clone(),
            sources_used: draft.draft.sources_used.clone(),
            open_questions: draft.draft.proposals.clone(),
            conflicts,
            warnings,
            advisories,
        };
        info!(
            run_id = %ctx.run_id(),
            fields = canonical.entity.len(),
            conflicts = canonical.conflicts.len(),
            advisories = canonical.advisories.len(),
            "Canonical entity assembled"
        );

        let notes = vec![format!(
            "{} open question(s), {} advisory note(s)",
            canonical.open_questions.len(),
            canonical.advisories.len()
        )];
        Ok(StageOutput::new(ArtifactPayload::Canonical(canonical)).with_notes(notes))
    }
}
