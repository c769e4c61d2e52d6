//! Citation guard: every cited source must be a retrieved fact.

use crate::{FACT_CHECK, Guard, GuardError, GuardInput};
use lorekeep_core::GuardResult;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct CitationGuard;

impl CitationGuard {
    pub fn new() -> Self {
        Self
    }
}

impl Guard for CitationGuard {
    fn name(&self) -> &str {
        FACT_CHECK
    }

    fn description(&self) -> &str {
        "Cited sources resolve to retrieved facts; ungrounded assumptions are flagged"
    }

    fn check(&self, input: &GuardInput<'_>) -> Result<GuardResult, GuardError> {
        let pack = input.fact_pack.ok_or_else(|| GuardError::MissingInput {
            guard: self.name().to_string(),
            input: "fact pack",
        })?;
        let draft = input.draft;

        let mut errors = Vec::new();
        let mut flags = Vec::new();
        let mut suggestions = Vec::new();

        let mut seen = HashSet::new();
        for id in &draft.sources_used {
            if !seen.insert(id.as_str()) {
                flags.push(format!("source '{id}' is cited more than once"));
                continue;
            }
            if !pack.contains(id) {
                errors.push(format!("source '{id}' does not resolve to a retrieved fact"));
            }
        }

        for assumption in &draft.assumptions {
            flags.push(format!("ungrounded assumption: {assumption}"));
        }
        if draft.sources_used.is_empty() && !pack.facts.is_empty() {
            flags.push(format!(
                "draft cites none of the {} retrieved facts",
                pack.facts.len()
            ));
        }
        for gap in &pack.gaps {
            suggestions.push(format!("no grounding was found for '{gap}'"));
        }

        Ok(GuardResult::from_findings(self.name(), errors, flags, suggestions))
    }
}
