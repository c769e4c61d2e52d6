//! Generates the draft through one or more budgeted exchanges.
//!
//! The fact pack is delivered across as many chunks as the budget requires.
//! Each reply is folded into the chunk session; a reply that does not parse
//! is retried against the same payload up to the configured number of times.

use super::planner::PLANNER;
use super::retriever::RETRIEVER;
use crate::stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
use async_trait::async_trait;
use chrono::Utc;
use lorekeep_chunking::{ChunkBudget, ChunkPlanner, ChunkSession, SessionError};
use lorekeep_core::{ArtifactKind, ArtifactPayload, Brief, ExchangeClient, ExchangeError, PipelineEvent};
use lorekeep_merge::MergeEngine;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub const CREATOR: &str = "creator";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a meticulous worldbuilding assistant. \
Write content that is consistent with the facts provided and cite the ids of the facts you rely on. \
State anything you invent as an assumption, and raise a proposal for anything you cannot decide.";

/// Tunables for the creator stage.
#[derive(Debug, Clone)]
pub struct CreatorSettings {
    pub budget: ChunkBudget,
    pub max_chunks: usize,
    /// Extra attempts per exchange after a malformed reply.
    pub parse_retries: usize,
    pub system_instructions: String,
}

impl Default for CreatorSettings {
    fn default() -> Self {
        Self {
            budget: ChunkBudget::default(),
            max_chunks: 24,
            parse_retries: 2,
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
        }
    }
}

pub struct CreatorStage {
    client: Arc<dyn ExchangeClient>,
    settings: CreatorSettings,
}

impl CreatorStage {
    pub fn new(client: Arc<dyn ExchangeClient>, settings: CreatorSettings) -> Self {
        Self { client, settings }
    }

    /// The request as the exchange sees it.
    pub fn request(brief: &Brief) -> Value {
        let mut request = json!({
            "kind": brief.kind,
            "title": brief.title,
            "prompt": brief.prompt,
        });
        if let Some(tone) = &brief.tone {
            request["tone"] = json!(tone);
        }
        if !brief.constraints.is_empty() {
            request["constraints"] = json!(brief.constraints);
        }
        if !brief.seed.is_empty() {
            request["seed"] = Value::Object(brief.seed.clone());
        }
        request
    }

    /// One exchange, retried while the reply fails to parse.
    async fn exchange(&self, session: &mut ChunkSession, chunk: usize, payload: &str) -> Result<(), StageError> {
        let attempts = self.settings.parse_retries + 1;
        for attempt in 1..=attempts {
            let outcome = match self.client.exchange(chunk, payload).await {
                Ok(raw) => session.submit(&raw),
                Err(e) => Err(SessionError::Exchange(e)),
            };
            match outcome {
                Ok(_) => return Ok(()),
                Err(SessionError::Exchange(e)) if e.is_retryable() && attempt < attempts => {
                    warn!(chunk, attempt, error = %e, "Exchange failed, retrying");
                }
                Err(SessionError::Exchange(e)) if e.is_retryable() => {
                    warn!(chunk, attempts, error = %e, "Exchange retries exhausted");
                    return Err(StageError::Exchange(ExchangeError::Exhausted { attempts }));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StageError::Exchange(ExchangeError::Exhausted { attempts }))
    }
}

#[async_trait]
impl Stage for CreatorStage {
    fn name(&self) -> &str {
        CREATOR
    }

    fn dependencies(&self) -> Vec<String> {
        vec![PLANNER.to_string(), RETRIEVER.to_string()]
    }

    fn output_kind(&self) -> ArtifactKind {
        ArtifactKind::Draft
    }

    async fn execute(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let brief = inputs.brief(PLANNER)?;
        let pack = inputs.fact_pack(RETRIEVER)?;

        let mut session = ChunkSession::new(
            ChunkPlanner::new(self.settings.budget),
            self.settings.system_instructions.clone(),
            Self::request(brief),
            pack.facts.clone(),
            self.settings.max_chunks,
        )?;

        while let Some(plan) = session.next_exchange()? {
            ctx.events.publish(PipelineEvent::ChunkPlanned {
                run_id: ctx.run_id().to_string(),
                stage: CREATOR.to_string(),
                chunk: plan.chunk,
                facts: plan.included.len(),
                chars: plan.total_chars,
                timestamp: Utc::now(),
            });
            self.exchange(&mut session, plan.chunk, &plan.payload).await?;
        }

        let engine = MergeEngine::from_registry(&ctx.registry);
        let artifact = session.finish(&engine)?;
        info!(
            run_id = %ctx.run_id(),
            client = self.client.name(),
            chunks = artifact.provenance.chunks,
            conflicts = artifact.provenance.conflicts.len(),
            "Draft generated"
        );

        let mut notes = vec![format!("assembled from {} chunk(s)", artifact.provenance.chunks)];
        if !artifact.provenance.conflicts.is_empty() {
            notes.push(format!(
                "{} field conflict(s) resolved across chunks",
                artifact.provenance.conflicts.len()
            ));
        }
        notes.extend(artifact.provenance.warnings.iter().cloned());
        Ok(StageOutput::new(ArtifactPayload::Draft(artifact)).with_notes(notes))
    }
}
