//! `lorekeep run`: Submit a request and drive it through the pipeline.

use super::status::print_report;
use super::{load_config, orchestrator};
use crate::RequestArgs;
use crate::inputs::{CliResult, build_request, load_corpus};
use crate::replay::ReplayExchangeClient;
use lorekeep_core::{PipelineEvent, RunStatus};
use lorekeep_pipeline::{FINALIZER, StaticFactRetriever};
use std::path::Path;
use std::sync::Arc;

pub async fn run(
    request: RequestArgs,
    replies: &Path,
    corpus: Option<&Path>,
    resume: Option<String>,
    from: Option<String>,
) -> CliResult<()> {
    let config = load_config()?;
    let client = ReplayExchangeClient::open(replies)
        .map_err(|e| format!("Failed to read replies from {}: {e}", replies.display()))?;
    let client = Arc::new(client);
    let retriever = Arc::new(StaticFactRetriever::new(load_corpus(corpus)?));
    let orch = orchestrator(&config, retriever, client.clone()).await?;

    let mut events = orch.events().subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &*event {
                PipelineEvent::StageStarted { stage, .. } => eprintln!("  ▶ {stage}"),
                PipelineEvent::ChunkPlanned { chunk, facts, chars, .. } => {
                    eprintln!("    chunk {}: {facts} fact(s), {chars} chars", chunk + 1)
                }
                PipelineEvent::StageSkipped { stage, .. } => eprintln!("  ↷ {stage} (already ok)"),
                PipelineEvent::RunCompleted { .. } | PipelineEvent::RunFailed { .. } => break,
                _ => {}
            }
        }
    });

    let report = match (resume, from) {
        (Some(run_id), Some(stage)) => orch.restart_from(&run_id, &stage).await?,
        (Some(run_id), None) => orch.start_run(&run_id).await?,
        (None, _) => {
            let request = build_request(&request)?;
            let run_id = orch.submit(request).await?;
            eprintln!("🪶 Submitted {run_id}");
            orch.start_run(&run_id).await?
        }
    };
    drop(orch);
    let _ = progress.await;

    println!();
    print_report(&report);
    if client.remaining() > 0 {
        tracing::warn!(unused = client.remaining(), "Replay file has replies left over");
    }

    match report.status {
        RunStatus::Completed => {
            if report.stage(FINALIZER).is_some() {
                println!("\n  Inspect the canonical entity with: lorekeep status {} --artifacts", report.run_id);
            }
            Ok(())
        }
        _ => Err(format!(
            "run {} failed at '{}'",
            report.run_id,
            report.failed_stage.as_deref().unwrap_or("?")
        )
        .into()),
    }
}
