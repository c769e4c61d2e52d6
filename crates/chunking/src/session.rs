//! A caller-driven sequence of chunk exchanges.
//!
//! The session owns the carried-forward state: the fact cursor, decisions
//! made so far and questions still open. The caller asks for the next
//! payload, performs the exchange, and hands the raw reply back. A reply
//! that does not parse leaves the state untouched, so the same payload can
//! be sent again.

use crate::planner::{ChunkPlan, ChunkPlanner, PlanError, PlanInput};
use lorekeep_core::{
    ChunkReply, Decision, DraftArtifact, ExchangeError, Fact, PayloadError, Proposal, Provenance, WireDraft,
    WireProposal, to_domain,
};
use lorekeep_merge::{Contribution, MergeEngine, PROPOSALS_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Chunk limit of {max} reached with facts still undelivered")]
    TooManyChunks { max: usize },

    #[error("No exchange is pending")]
    NothingPending,

    #[error("Session incomplete: {remaining} facts undelivered")]
    Incomplete { remaining: usize },

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

/// A parsed partial output, tagged with the chunk that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkContribution {
    pub contributor: String,
    pub fields: Map<String, Value>,
}

/// Everything needed to resume a session. Serializable so it can be
/// persisted between exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkState {
    /// Index of the next chunk to send.
    pub chunk_index: usize,
    pub estimated_total: usize,
    /// Decisions so far, oldest first. One per topic.
    pub decisions: Vec<Decision>,
    /// Open questions, first raised first.
    pub outstanding: Vec<Proposal>,
    /// Position in the ranked fact list.
    pub fact_cursor: usize,
    /// Ids of facts too large for any chunk.
    pub oversized: Vec<String>,
    pub contributions: Vec<ChunkContribution>,
}

/// What one accepted reply changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub chunk: usize,
    pub facts_delivered: usize,
    pub decisions_applied: usize,
    pub proposals_raised: usize,
    pub remaining_facts: usize,
    pub complete: bool,
}

pub struct ChunkSession {
    planner: ChunkPlanner,
    system: String,
    base: Value,
    facts: Vec<Fact>,
    state: ChunkState,
    max_chunks: usize,
}

impl ChunkSession {
    /// Start a session. Fails up front if the fixed overhead alone exceeds
    /// the hard limit.
    pub fn new(
        planner: ChunkPlanner,
        system: impl Into<String>,
        base: Value,
        facts: Vec<Fact>,
        max_chunks: usize,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            planner,
            system: system.into(),
            base,
            facts: rank(facts),
            state: ChunkState::default(),
            max_chunks: max_chunks.max(1),
        };
        session.state.estimated_total = session
            .planner
            .estimate_chunks(&session.system, &session.base, &session.facts);
        // Surface a budget overflow before any exchange happens.
        session.planner.plan(&session.input())?;
        Ok(session)
    }

    /// Continue from a snapshot taken with [`ChunkSession::snapshot`].
    pub fn resume(
        planner: ChunkPlanner,
        system: impl Into<String>,
        base: Value,
        facts: Vec<Fact>,
        max_chunks: usize,
        state: ChunkState,
    ) -> Result<Self, SessionError> {
        let facts = rank(facts);
        if state.fact_cursor > facts.len() {
            return Err(SessionError::InvalidState(format!(
                "fact cursor {} is past the {} available facts",
                state.fact_cursor,
                facts.len()
            )));
        }
        if state.contributions.len() != state.chunk_index {
            return Err(SessionError::InvalidState(format!(
                "{} contributions recorded for {} chunks",
                state.contributions.len(),
                state.chunk_index
            )));
        }
        Ok(Self {
            planner,
            system: system.into(),
            base,
            facts,
            state,
            max_chunks: max_chunks.max(1),
        })
    }

    pub fn snapshot(&self) -> ChunkState {
        self.state.clone()
    }

    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    pub fn remaining_facts(&self) -> usize {
        self.facts.len().saturating_sub(self.state.fact_cursor)
    }

    /// Every fact delivered (or skipped as oversized), and at least one
    /// exchange made. An empty fact list still gets one exchange.
    pub fn is_complete(&self) -> bool {
        self.state.chunk_index > 0 && self.remaining_facts() == 0
    }

    fn input(&self) -> PlanInput<'_> {
        PlanInput {
            system: &self.system,
            base: &self.base,
            facts: &self.facts[self.state.fact_cursor..],
            decisions: &self.state.decisions,
            questions: &self.state.outstanding,
            chunk: self.state.chunk_index,
        }
    }

    /// The payload for the next exchange, or `None` once complete.
    pub fn next_exchange(&self) -> Result<Option<ChunkPlan>, SessionError> {
        if self.is_complete() {
            return Ok(None);
        }
        if self.state.chunk_index >= self.max_chunks {
            return Err(SessionError::TooManyChunks { max: self.max_chunks });
        }
        Ok(Some(self.planner.plan(&self.input())?))
    }

    /// Apply the raw reply to the pending exchange.
    pub fn submit(&mut self, raw: &str) -> Result<SubmitOutcome, SessionError> {
        let plan = self.next_exchange()?.ok_or(SessionError::NothingPending)?;
        let reply = ChunkReply::parse(plan.chunk, raw)?;
        let wire = WireDraft::from_object(reply.partial.clone())?;

        // Nothing below can fail; state changes start here.
        let decisions_applied = reply.decisions.len();
        for decision in reply.decisions {
            let key = decision.key();
            self.state.decisions.retain(|d| d.key() != key);
            self.state.outstanding.retain(|p| !decision.resolves(p));
            self.state.decisions.push(decision);
        }

        let raised = wire
            .proposals
            .into_iter()
            .map(|p| match p {
                WireProposal::Text(question) => Proposal::new(question),
                WireProposal::Structured { question, options } => Proposal::with_options(question, options),
            })
            .filter(|p| !self.state.decisions.iter().any(|d| d.resolves(p)))
            .collect::<Vec<_>>();
        let proposals_raised = Proposal::extend_unique(&mut self.state.outstanding, raised);

        for fact in &plan.residual.oversized {
            if !self.state.oversized.contains(&fact.id) {
                warn!(fact = %fact.id, "Fact larger than an empty chunk, skipped");
                self.state.oversized.push(fact.id.clone());
            }
        }

        self.state.contributions.push(ChunkContribution {
            contributor: format!("chunk-{}", plan.chunk),
            fields: reply.partial,
        });
        self.state.fact_cursor += plan.consumed;
        self.state.chunk_index += 1;

        let remaining_facts = self.remaining_facts();
        let ahead = if remaining_facts == 0 {
            0
        } else {
            self.planner
                .estimate_chunks(&self.system, &self.base, &self.facts[self.state.fact_cursor..])
        };
        self.state.estimated_total = self.state.chunk_index + ahead;

        debug!(
            chunk = plan.chunk,
            delivered = plan.included.len(),
            remaining_facts,
            outstanding = self.state.outstanding.len(),
            "Chunk reply applied"
        );

        Ok(SubmitOutcome {
            chunk: plan.chunk,
            facts_delivered: plan.included.len(),
            decisions_applied,
            proposals_raised,
            remaining_facts,
            complete: self.is_complete(),
        })
    }

    /// Fold every chunk's partial output into one draft. Later chunks win
    /// scalar conflicts; open questions are whatever is still outstanding.
    pub fn finish(self, engine: &MergeEngine) -> Result<DraftArtifact, SessionError> {
        if !self.is_complete() {
            return Err(SessionError::Incomplete {
                remaining: self.remaining_facts(),
            });
        }

        let contributions: Vec<Contribution> = self
            .state
            .contributions
            .iter()
            .map(|c| Contribution::new(c.contributor.clone(), c.fields.clone()))
            .collect();
        let mut result = engine.merge(&contributions);
        result.merged.remove(PROPOSALS_FIELD);

        let mut draft = to_domain(WireDraft::from_object(result.merged)?)?;
        draft.proposals = self.state.outstanding;

        let mut warnings = result.warnings;
        warnings.extend(
            self.state
                .oversized
                .iter()
                .map(|id| format!("fact {id} exceeds the chunk budget and was skipped")),
        );

        info!(
            chunks = self.state.chunk_index,
            conflicts = result.conflicts.len(),
            open_questions = draft.proposals.len(),
            "Chunked draft assembled"
        );

        Ok(DraftArtifact {
            draft,
            provenance: Provenance {
                conflicts: result.conflicts,
                warnings,
                chunks: self.state.chunk_index,
            },
        })
    }
}

fn rank(mut facts: Vec<Fact>) -> Vec<Fact> {
    facts.sort_by(|a, b| b.rank.total_cmp(&a.rank));
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ChunkBudget;
    use lorekeep_core::VersionPolicy;
    use serde_json::json;

    fn session(facts: Vec<Fact>, limit: usize) -> ChunkSession {
        let planner = ChunkPlanner::new(ChunkBudget {
            hard_limit: limit,
            decision_budget: 300,
            question_budget: 300,
        });
        ChunkSession::new(planner, "You write lore.", json!({"kind": "item"}), facts, 10).unwrap()
    }

    #[test]
    fn empty_fact_list_needs_one_exchange() {
        let mut s = session(vec![], 2000);
        assert!(!s.is_complete());
        assert!(s.next_exchange().unwrap().is_some());
        let outcome = s
            .submit(r#"{"name": "Lantern", "canonChange": "Adds the lantern"}"#)
            .unwrap();
        assert!(outcome.complete);
        assert!(s.next_exchange().unwrap().is_none());
        assert!(matches!(s.submit("{}"), Err(SessionError::NothingPending)));
    }

    #[test]
    fn parse_failure_leaves_state_unchanged() {
        let mut s = session(vec![Fact::new("f1", "Old.")], 2000);
        let before = s.snapshot();
        let payload = s.next_exchange().unwrap().unwrap().payload;

        assert!(matches!(s.submit("not json"), Err(SessionError::Exchange(_))));
        assert_eq!(s.snapshot(), before);
        assert_eq!(s.next_exchange().unwrap().unwrap().payload, payload);
    }

    #[test]
    fn decisions_resolve_outstanding_questions() {
        let facts: Vec<Fact> = (0..6).map(|i| Fact::new(format!("f{i}"), "x".repeat(60))).collect();
        let probe = ChunkPlanner::default();
        let base = json!({"kind": "item"});
        let overhead = probe.overhead(&PlanInput {
            system: "You write lore.",
            base: &base,
            facts: &[],
            decisions: &[],
            questions: &[],
            chunk: 0,
        });
        let mut s = session(facts, overhead + 300);

        s.submit(r#"{"canonChange": "a", "proposals": ["Who forged it?"]}"#).unwrap();
        assert_eq!(s.state().outstanding.len(), 1);
        let next = s.next_exchange().unwrap().unwrap();
        assert!(next.payload.contains("- Who forged it?"));

        let outcome = s
            .submit(r#"{"canonChange": "b", "decisions": {"who forged IT?": "the Vell clan"}}"#)
            .unwrap();
        assert_eq!(outcome.decisions_applied, 1);
        assert!(s.state().outstanding.is_empty());
        let next = s.next_exchange().unwrap();
        if let Some(plan) = next {
            assert!(plan.payload.contains("who forged IT? => \"the Vell clan\""));
        }
    }

    #[test]
    fn decided_topics_are_not_reopened() {
        let mut s = session(vec![], 2000);
        s.state.decisions.push(Decision::new("Banner?", json!("red")));
        s.submit(r#"{"canonChange": "a", "proposals": ["banner?", "Motto?"]}"#).unwrap();
        let keys: Vec<String> = s.state().outstanding.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["motto?"]);
    }

    #[test]
    fn resume_continues_from_snapshot() {
        let facts: Vec<Fact> = (0..3).map(|i| Fact::new(format!("f{i}"), "fact")).collect();
        let mut s = session(facts.clone(), 2000);
        s.submit(r#"{"canonChange": "a", "proposals": ["Why?"]}"#).unwrap();
        let state = s.snapshot();

        let resumed = ChunkSession::resume(
            ChunkPlanner::new(ChunkBudget {
                hard_limit: 2000,
                decision_budget: 300,
                question_budget: 300,
            }),
            "You write lore.",
            json!({"kind": "item"}),
            facts,
            10,
            state.clone(),
        )
        .unwrap();
        assert_eq!(resumed.snapshot(), state);
        assert!(resumed.is_complete());
    }

    #[test]
    fn resume_rejects_cursor_past_end() {
        let state = ChunkState {
            fact_cursor: 5,
            ..Default::default()
        };
        let err = ChunkSession::resume(ChunkPlanner::default(), "", json!({}), vec![], 4, state)
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::InvalidState(_)));
    }

    #[test]
    fn finish_before_complete_is_an_error() {
        let s = session(vec![Fact::new("f1", "x")], 2000);
        let err = s.finish(&MergeEngine::new(VersionPolicy::default())).err().unwrap();
        assert!(matches!(err, SessionError::Incomplete { remaining: 1 }));
    }

    #[test]
    fn finish_merges_chunks_with_outstanding_questions() {
        let mut s = session(vec![], 2000);
        s.submit(
            r#"{"name": "Lantern", "tone": "dark", "sourcesUsed": ["f1"],
                "canonChange": "Adds the lantern", "proposals": ["Who lit it?"]}"#,
        )
        .unwrap();
        let artifact = s.finish(&MergeEngine::new(VersionPolicy::default())).unwrap();
        assert_eq!(artifact.draft.entity["name"], "Lantern");
        assert_eq!(artifact.draft.sources_used, vec!["f1"]);
        assert_eq!(artifact.draft.proposals, vec![Proposal::new("Who lit it?")]);
        assert_eq!(artifact.provenance.chunks, 1);
    }
}
