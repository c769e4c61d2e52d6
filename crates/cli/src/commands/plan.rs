//! `lorekeep plan`: Show how a request would be chunked, without
//! exchanging anything.

use super::{creator_settings, load_config};
use crate::RequestArgs;
use crate::inputs::{CliResult, build_request, load_corpus};
use lorekeep_chunking::{ChunkPlanner, PlanError, PlanInput};
use lorekeep_core::{Artifact, EventBus, Fact, Run};
use lorekeep_pipeline::{
    CreatorStage, PLANNER, PlannerStage, RetrieverStage, RunContext, Stage, StageInputs, StaticFactRetriever,
};
use std::path::Path;
use std::sync::Arc;

pub async fn run(request: RequestArgs, corpus: Option<&Path>, payloads: bool) -> CliResult<()> {
    let config = load_config()?;
    let settings = creator_settings(&config);
    let request = build_request(&request)?;

    // Run the planner and retriever stages in isolation.
    let ctx = RunContext {
        run: Run::new(request),
        registry: Arc::new(config.registry()),
        events: EventBus::default(),
    };
    let brief = PlannerStage::new().execute(&ctx, &StageInputs::new()).await?;
    let mut inputs = StageInputs::new();
    inputs.insert(Artifact::new(ctx.run_id(), PLANNER, brief.payload));
    let retriever = RetrieverStage::new(Arc::new(StaticFactRetriever::new(load_corpus(corpus)?)));
    let pack = retriever.execute(&ctx, &inputs).await?;

    let brief = inputs.brief(PLANNER)?;
    let facts: Vec<Fact> = pack.payload.as_fact_pack().map(|p| p.facts.clone()).unwrap_or_default();
    let base = CreatorStage::request(brief);
    let planner = ChunkPlanner::new(settings.budget);

    println!("📐 Chunk plan for \"{}\" ({})", brief.title, brief.kind);
    println!(
        "  Budget:    {} chars (decisions {}, questions {})",
        settings.budget.hard_limit, settings.budget.decision_budget, settings.budget.question_budget
    );
    println!("  Facts:     {} retrieved", facts.len());
    println!(
        "  Estimate:  {} chunk(s)",
        planner.estimate_chunks(&settings.system_instructions, &base, &facts)
    );

    let mut remaining = facts;
    let mut chunk = 0;
    loop {
        let input = PlanInput {
            system: &settings.system_instructions,
            base: &base,
            facts: &remaining,
            decisions: &[],
            questions: &[],
            chunk,
        };
        let plan = match planner.plan(&input) {
            Ok(plan) => plan,
            Err(PlanError::BudgetExceeded { diagnostic }) => {
                println!("\n  ❌ {diagnostic}");
                return Err("request does not fit the exchange budget".into());
            }
        };

        println!(
            "\n  Chunk {}: {} chars, {} fact(s)",
            chunk + 1,
            plan.total_chars,
            plan.included.len()
        );
        for section in &plan.sections {
            println!(
                "    {:<10} {:>6} chars  {}/{}",
                section.name, section.chars, section.items_included, section.items_total
            );
        }
        for fact in &plan.residual.oversized {
            println!("    ⚠️  fact '{}' is too large for any chunk and is skipped", fact.id);
        }
        if payloads {
            println!("\n{}", plan.payload);
        }

        remaining = plan.residual.facts;
        chunk += 1;
        if remaining.is_empty() {
            break;
        }
        if chunk >= settings.max_chunks {
            println!(
                "\n  ⚠️  {} fact(s) left after the {}-chunk limit",
                remaining.len(),
                settings.max_chunks
            );
            break;
        }
    }
    Ok(())
}
