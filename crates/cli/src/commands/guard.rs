//! `lorekeep guard`: Run the built-in guards over a draft file.

use super::load_config;
use crate::inputs::{CliResult, read_json};
use lorekeep_core::{ContentKind, FactPack, GuardResult, Registry, WireDraft, to_domain};
use lorekeep_guards::{BoundsGuard, GuardInput, GuardSet, LimiterGuard};
use std::path::Path;
use std::sync::Arc;

pub fn evaluate(
    registry: &Registry,
    kind: ContentKind,
    draft: &Path,
    facts: Option<&Path>,
) -> CliResult<Vec<GuardResult>> {
    let wire: WireDraft = read_json(draft)?;
    let draft = to_domain(wire)?;
    let pack: Option<FactPack> = facts.map(read_json::<FactPack>).transpose()?;

    let mut input = GuardInput::new(kind, &draft);
    if let Some(pack) = &pack {
        input = input.with_fact_pack(pack);
    }

    let set = match &pack {
        Some(_) => GuardSet::builtin(registry),
        // Without a fact pack there is nothing to cite against.
        None => {
            let mut set = GuardSet::new();
            set.register(Arc::new(LimiterGuard::new(registry.limiter.clone())));
            set.register(Arc::new(BoundsGuard::new(registry.bounds.clone())));
            set
        }
    };
    Ok(set.evaluate_all(&input)?)
}

pub async fn run(draft: &Path, kind: ContentKind, facts: Option<&Path>) -> CliResult<()> {
    let config = load_config()?;
    let results = evaluate(&config.registry(), kind, draft, facts)?;

    let mut failed = Vec::new();
    for result in &results {
        let marker = match (result.ok, result.skipped) {
            (_, true) => "↷",
            (true, false) => "✅",
            (false, false) => "❌",
        };
        println!("{marker} {}", result.guard);
        if let Some(reason) = &result.reason {
            println!("    {reason}");
        }
        for error in &result.errors {
            println!("    error: {error}");
        }
        for flag in &result.flags {
            println!("    flag: {flag}");
        }
        for suggestion in &result.suggestions {
            println!("    suggestion: {suggestion}");
        }
        if !result.ok {
            failed.push(result.guard.as_str());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!("draft rejected by {}", failed.join(", ")).into())
    }
}
