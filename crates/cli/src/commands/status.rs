//! `lorekeep status`: Show stored runs.

use super::{load_config, orchestrator, open_store};
use crate::inputs::CliResult;
use crate::replay::ReplayExchangeClient;
use lorekeep_core::{RunStatus, StageStatus};
use lorekeep_pipeline::{RunReport, StaticFactRetriever};
use std::sync::Arc;

pub async fn run(run_id: Option<&str>, artifacts: bool) -> CliResult<()> {
    let config = load_config()?;

    let Some(run_id) = run_id else {
        let store = open_store(&config).await?;
        let ids = store.list_runs().await?;
        if ids.is_empty() {
            println!("No runs stored in {}", config.storage_path().display());
            return Ok(());
        }
        println!("📚 Runs ({}, {} backend):\n", ids.len(), store.name());
        for id in ids {
            if let Some(run) = store.get_run(&id).await? {
                println!(
                    "  {id}  {:<9}  {:<9}  {}",
                    run.status.to_string(),
                    run.kind.as_str(),
                    run.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        return Ok(());
    };

    // Reporting never executes a stage; the collaborators are inert.
    let orch = orchestrator(
        &config,
        Arc::new(StaticFactRetriever::default()),
        Arc::new(ReplayExchangeClient::new(Vec::new())),
    )
    .await?;
    let report = orch.report(run_id).await?;
    print_report(&report);

    if artifacts {
        for stage in &report.stages {
            if let Some(artifact) = orch.store().find_artifact(run_id, &stage.name).await? {
                println!("\n── {} ({}, sha256 {}) ──", stage.name, artifact.id, artifact.digest);
                println!("{}", serde_json::to_string_pretty(&artifact.payload)?);
            }
        }
    }
    Ok(())
}

fn marker(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Idle => "·",
        StageStatus::Running => "…",
        StageStatus::Ok => "✅",
        StageStatus::Fail => "❌",
    }
}

pub fn print_report(report: &RunReport) {
    println!("Run {} — {}", report.run_id, report.status);
    for stage in &report.stages {
        let artifact = stage.artifact_id.as_deref().unwrap_or("");
        println!("  {} {:<14} {:<8} {artifact}", marker(stage.status), stage.name, stage.status.to_string());
        if let Some(error) = &stage.error {
            println!("      error: {error}");
        }
        for note in &stage.notes {
            println!("      • {note}");
        }
    }
    if report.status == RunStatus::Failed {
        if let Some(stage) = &report.failed_stage {
            println!(
                "\n  ⚠️  Halted at '{stage}'. Fix the cause, then: lorekeep run --resume {} --from {stage}",
                report.run_id
            );
        }
    }
}
