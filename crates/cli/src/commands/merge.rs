//! `lorekeep merge`: Merge JSON contribution files.

use super::load_config;
use crate::inputs::{CliResult, read_json};
use lorekeep_core::MergeResult;
use lorekeep_merge::{Contribution, MergeEngine};
use std::path::{Path, PathBuf};

/// Contributor name for a file: its stem.
fn contributor(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn merge_files(engine: &MergeEngine, files: &[PathBuf], expect: &[String]) -> CliResult<MergeResult> {
    let mut contributions = Vec::with_capacity(files.len());
    for path in files {
        let value: serde_json::Value = read_json(path)?;
        if !value.is_object() {
            return Err(format!("{}: a contribution must be a JSON object", path.display()).into());
        }
        contributions.push(Contribution::from_value(contributor(path), value));
    }
    let expected: Vec<&str> = expect.iter().map(String::as_str).collect();
    Ok(engine.merge_with_expected(&contributions, &expected))
}

pub async fn run(files: &[PathBuf], expect: &[String]) -> CliResult<()> {
    let config = load_config()?;
    let engine = MergeEngine::from_registry(&config.registry());
    let result = merge_files(&engine, files, expect)?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.conflicts.is_empty() {
        eprintln!("\n{} conflict(s) resolved:", result.conflicts.len());
        for conflict in &result.conflicts {
            eprintln!(
                "  {} [{}] from {}",
                conflict.field,
                conflict.resolution_strategy,
                conflict.contributor_ids().join(", ")
            );
        }
    }
    for warning in &result.warnings {
        eprintln!("⚠️  {warning}");
    }
    Ok(())
}
