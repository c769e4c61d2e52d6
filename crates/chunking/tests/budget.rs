use lorekeep_chunking::{ChunkBudget, ChunkPlanner, ChunkSession, PlanError, PlanInput};
use lorekeep_core::{Decision, Fact, Proposal, VersionPolicy};
use lorekeep_merge::MergeEngine;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::HashSet;

const LIMIT: usize = 8000;

fn planner() -> ChunkPlanner {
    ChunkPlanner::new(ChunkBudget {
        hard_limit: LIMIT,
        decision_budget: 800,
        question_budget: 600,
    })
}

/// A system text sized so the fixed overhead is exactly `target`.
fn system_for_overhead(base: &Value, target: usize) -> String {
    let empty = planner().overhead(&PlanInput {
        system: "",
        base,
        facts: &[],
        decisions: &[],
        questions: &[],
        chunk: 0,
    });
    "s".repeat(target - empty)
}

/// Fact lines of exactly sixty characters: `- [f123] ` plus fifty plus newline.
fn sixty_char_facts(n: usize) -> Vec<Fact> {
    (0..n)
        .map(|i| Fact::new(format!("f{i:03}"), "w".repeat(50)).ranked(1.0 - i as f32 / 1000.0))
        .collect()
}

#[test]
fn first_chunk_takes_what_fits_after_overhead() {
    let base = json!({"kind": "location", "prompt": "A drowned city"});
    let system = system_for_overhead(&base, 1500);
    let facts = sixty_char_facts(400);
    let input = PlanInput {
        system: &system,
        base: &base,
        facts: &facts,
        decisions: &[],
        questions: &[],
        chunk: 0,
    };

    assert_eq!(planner().overhead(&input), 1500);
    let plan = planner().plan(&input).unwrap();

    assert_eq!(plan.included.len(), 108);
    assert_eq!(plan.residual.facts.len(), 292);
    assert_eq!(plan.included.first().map(String::as_str), Some("f000"));
    assert_eq!(plan.residual.facts[0].id, "f108");
    assert_eq!(plan.total_chars, 1500 + 108 * 60);
    assert!(plan.total_chars <= LIMIT);
}

#[test]
fn oversized_request_is_rejected_with_diagnostic() {
    let base = json!({"prompt": "p".repeat(9000)});
    let err = planner()
        .plan(&PlanInput {
            system: "short",
            base: &base,
            facts: &[],
            decisions: &[],
            questions: &[],
            chunk: 0,
        })
        .unwrap_err();
    let PlanError::BudgetExceeded { diagnostic } = err;
    assert_eq!(diagnostic.hard_limit, LIMIT);
    assert!(diagnostic.total > LIMIT);
    assert!(diagnostic.recommendation.contains("request"));
    assert!(diagnostic.to_string().contains("exceeds the hard limit of 8000"));
}

#[test]
fn session_delivers_every_fact_once() {
    let base = json!({"kind": "location", "prompt": "A drowned city"});
    let system = system_for_overhead(&base, 1500);
    let facts = sixty_char_facts(400);
    let mut session = ChunkSession::new(planner(), system, base, facts, 24).unwrap();
    assert_eq!(session.state().estimated_total, 4);

    let mut delivered = Vec::new();
    let mut chunk = 0;
    while let Some(plan) = session.next_exchange().unwrap() {
        assert!(plan.total_chars <= LIMIT);
        delivered.extend(plan.included.clone());
        let reply = json!({
            "name": "Vell Hollow",
            "depth": chunk,
            "sourcesUsed": plan.included.iter().take(2).collect::<Vec<_>>(),
            "canonChange": "Adds the drowned city of Vell Hollow",
        });
        session.submit(&reply.to_string()).unwrap();
        chunk += 1;
    }

    assert_eq!(chunk, 4);
    assert_eq!(delivered.len(), 400);
    let unique: HashSet<&String> = delivered.iter().collect();
    assert_eq!(unique.len(), 400);

    let artifact = session.finish(&MergeEngine::new(VersionPolicy::default())).unwrap();
    assert_eq!(artifact.provenance.chunks, 4);
    assert_eq!(artifact.draft.entity["depth"], 3);
    assert_eq!(artifact.draft.sources_used.len(), 8);
    let depth = artifact
        .provenance
        .conflicts
        .iter()
        .find(|c| c.field == "depth")
        .unwrap();
    assert_eq!(depth.contributor_ids(), vec!["chunk-0", "chunk-1", "chunk-2", "chunk-3"]);
}

#[test]
fn session_stops_at_chunk_limit() {
    let base = json!({});
    let system = system_for_overhead(&base, 7000);
    let mut session = ChunkSession::new(planner(), system, base, sixty_char_facts(100), 2).unwrap();
    for _ in 0..2 {
        session.next_exchange().unwrap().unwrap();
        session.submit(r#"{"canonChange": "x"}"#).unwrap();
    }
    assert!(session.next_exchange().is_err());
}

fn arb_fact() -> impl Strategy<Value = Fact> {
    ("f[0-9]{1,4}", "[a-zé ]{0,400}", 0.0f32..1.0).prop_map(|(id, text, rank)| Fact::new(id, text).ranked(rank))
}

proptest! {
    #[test]
    fn payload_never_exceeds_hard_limit(
        system in "[a-z ]{0,3000}",
        facts in prop::collection::vec(arb_fact(), 0..60),
        topics in prop::collection::vec("[A-Za-z ?]{1,80}", 0..30),
        questions in prop::collection::vec("[A-Za-z ?]{1,80}", 0..30),
        limit in 1500usize..6000,
    ) {
        let planner = ChunkPlanner::new(ChunkBudget {
            hard_limit: limit,
            decision_budget: 500,
            question_budget: 400,
        });
        let decisions: Vec<Decision> = topics.iter().map(|t| Decision::new(t.clone(), json!(t.len()))).collect();
        let questions: Vec<Proposal> = questions.into_iter().map(Proposal::new).collect();
        let base = json!({"kind": "lore"});
        let input = PlanInput {
            system: &system,
            base: &base,
            facts: &facts,
            decisions: &decisions,
            questions: &questions,
            chunk: 0,
        };

        match planner.plan(&input) {
            Ok(plan) => {
                prop_assert!(plan.total_chars <= limit);
                prop_assert_eq!(plan.total_chars, plan.payload.chars().count());
                prop_assert_eq!(
                    plan.included.len() + plan.residual.facts.len() + plan.residual.oversized.len(),
                    facts.len()
                );
            }
            Err(PlanError::BudgetExceeded { diagnostic }) => {
                prop_assert!(diagnostic.total > limit);
            }
        }
    }
}
