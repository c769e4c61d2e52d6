//! Validation Guards: post-hoc plausibility checks over a produced draft.
//!
//! A guard inspects a draft (plus whatever supporting artifacts it declares)
//! and renders a [`GuardResult`]:
//!
//! ```text
//! ┌─────────┐    ┌─────────────┐    ┌──────────────────────┐
//! │  Draft   │───▶│    Guard    │───▶│     GuardResult      │
//! │ FactPack │    │ (fact_check │    │ ok=false → halt run  │
//! │ reports  │    │  balance_…) │    │ ok=true + flags →    │
//! └─────────┘    └─────────────┘    │   advisory output    │
//!                                    └──────────────────────┘
//! ```
//!
//! A guard that does not apply to the content kind returns a skipped
//! result instead of running its checks.

mod bounds;
mod citation;
mod limiter;

pub use bounds::BoundsGuard;
pub use citation::CitationGuard;
pub use limiter::LimiterGuard;

use lorekeep_core::{ContentKind, Draft, FactPack, GuardResult, Registry};
use std::sync::Arc;
use tracing::debug;

pub const FACT_CHECK: &str = "fact_check";
pub const BALANCE_CHECK: &str = "balance_check";
pub const PHYSICS_CHECK: &str = "physics_check";

/// Errors that keep a guard from rendering a result at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardError {
    #[error("guard '{guard}' requires a {input} input")]
    MissingInput { guard: String, input: &'static str },

    #[error("guard '{guard}' is misconfigured: {reason}")]
    Misconfigured { guard: String, reason: String },
}

/// Everything a guard may look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub kind: ContentKind,
    pub draft: &'a Draft,
    pub fact_pack: Option<&'a FactPack>,
    /// Results of guards this one depends on.
    pub reports: &'a [GuardResult],
}

impl<'a> GuardInput<'a> {
    pub fn new(kind: ContentKind, draft: &'a Draft) -> Self {
        Self {
            kind,
            draft,
            fact_pack: None,
            reports: &[],
        }
    }

    pub fn with_fact_pack(mut self, pack: &'a FactPack) -> Self {
        self.fact_pack = Some(pack);
        self
    }

    pub fn with_reports(mut self, reports: &'a [GuardResult]) -> Self {
        self.reports = reports;
        self
    }

    /// The report of a named dependency guard, if supplied.
    pub fn report(&self, guard: &str) -> Option<&'a GuardResult> {
        self.reports.iter().find(|r| r.guard == guard)
    }
}

/// A post-hoc validator.
pub trait Guard: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the guard's checks mean anything for this kind.
    fn applies_to(&self, _kind: ContentKind) -> bool {
        true
    }

    /// Run the checks. Called only when [`Guard::applies_to`] holds.
    fn check(&self, input: &GuardInput<'_>) -> Result<GuardResult, GuardError>;

    /// Run the guard, skipping it for kinds it does not apply to.
    fn evaluate(&self, input: &GuardInput<'_>) -> Result<GuardResult, GuardError> {
        if !self.applies_to(input.kind) {
            debug!(guard = self.name(), kind = %input.kind, "Guard skipped");
            return Ok(GuardResult::skip(
                self.name(),
                format!("not applicable to {} content", input.kind),
            ));
        }
        let result = self.check(input)?;
        debug!(
            guard = self.name(),
            ok = result.ok,
            errors = result.errors.len(),
            flags = result.flags.len(),
            "Guard evaluated"
        );
        Ok(result)
    }
}

/// An ordered collection of guards.
#[derive(Clone, Default)]
pub struct GuardSet {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in guards, in dependency order.
    pub fn builtin(registry: &Registry) -> Self {
        let mut set = Self::new();
        set.register(Arc::new(CitationGuard::new()));
        set.register(Arc::new(LimiterGuard::new(registry.limiter.clone())));
        set.register(Arc::new(BoundsGuard::new(registry.bounds.clone())));
        set
    }

    /// Add a guard, replacing any existing guard of the same name.
    pub fn register(&mut self, guard: Arc<dyn Guard>) {
        self.guards.retain(|g| g.name() != guard.name());
        self.guards.push(guard);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Guard>> {
        self.guards.iter().find(|g| g.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Run every guard in order. Each guard sees the reports of the guards
    /// before it.
    pub fn evaluate_all(&self, input: &GuardInput<'_>) -> Result<Vec<GuardResult>, GuardError> {
        let mut reports: Vec<GuardResult> = input.reports.to_vec();
        let mut results = Vec::with_capacity(self.guards.len());
        for guard in &self.guards {
            let scoped = GuardInput {
                reports: &reports,
                ..*input
            };
            let result = guard.evaluate(&scoped)?;
            reports.push(result.clone());
            results.push(result);
        }
        Ok(results)
    }
}

impl std::fmt::Debug for GuardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardSet").field("guards", &self.names()).finish()
    }
}

/// Readable name of a record inside the entity.
pub(crate) fn label(record: &serde_json::Value, fallback: impl FnOnce() -> String) -> String {
    ["name", "title", "id"]
        .iter()
        .find_map(|k| record.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    pub(crate) fn draft(entity: serde_json::Value) -> Draft {
        Draft {
            entity: entity.as_object().cloned().unwrap_or_else(Map::new),
            sources_used: vec![],
            assumptions: vec![],
            proposals: vec![],
            canon_change: "Adds a thing".into(),
        }
    }

    #[test]
    fn builtin_set_is_ordered() {
        let set = GuardSet::builtin(&Registry::default());
        assert_eq!(set.names(), vec![FACT_CHECK, BALANCE_CHECK, PHYSICS_CHECK]);
    }

    #[test]
    fn numeric_guards_skip_narrative_kinds() {
        let set = GuardSet::builtin(&Registry::default());
        let d = draft(json!({"name": "The Long Winter", "speed": 9000}));
        let pack = FactPack::default();
        let input = GuardInput::new(ContentKind::Lore, &d).with_fact_pack(&pack);
        let results = set.evaluate_all(&input).unwrap();

        assert!(!results[0].skipped);
        assert!(results[1].skipped);
        assert!(results[2].skipped);
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(results[2].reason.as_deref(), Some("not applicable to lore content"));
    }

    #[test]
    fn register_replaces_by_name() {
        let mut set = GuardSet::builtin(&Registry::default());
        set.register(Arc::new(CitationGuard::new()));
        assert_eq!(set.len(), 3);
        assert_eq!(set.names().last(), Some(&FACT_CHECK));
    }

    #[test]
    fn label_prefers_name() {
        assert_eq!(label(&json!({"name": "Bite", "id": "a1"}), || "x".into()), "Bite");
        assert_eq!(label(&json!({}), || "actions[2]".into()), "actions[2]");
    }
}
