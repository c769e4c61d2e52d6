//! Limiter guard: high-impact abilities must be gated by a usage limiter.

use crate::{BALANCE_CHECK, FACT_CHECK, Guard, GuardError, GuardInput, label};
use lorekeep_core::{ContentKind, GuardResult, LimiterVocabulary};
use serde_json::{Map, Value};

/// How an ability declares its usage.
#[derive(Debug, PartialEq, Eq)]
enum Usage {
    Missing,
    Limited,
    Unlimited(String),
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct LimiterGuard {
    vocabulary: LimiterVocabulary,
}

impl LimiterGuard {
    pub fn new(vocabulary: LimiterVocabulary) -> Self {
        Self { vocabulary }
    }

    fn is_high_impact(&self, ability: &Map<String, Value>) -> bool {
        ability
            .get(&self.vocabulary.impact_field)
            .and_then(Value::as_str)
            .map(fold)
            .is_some_and(|impact| self.vocabulary.high_impact.iter().any(|h| fold(h) == impact))
    }

    fn usage(&self, ability: &Map<String, Value>) -> Usage {
        let raw = match ability.get(&self.vocabulary.usage_field) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => return Usage::Missing,
            // A bare count reads as charges.
            Some(Value::Number(_)) => return Usage::Limited,
            Some(Value::String(s)) => fold(s),
            Some(Value::Object(map)) => map.keys().map(|k| fold(k)).collect::<Vec<_>>().join("_"),
            Some(other) => fold(&other.to_string()),
        };
        if raw.is_empty() {
            return Usage::Missing;
        }
        if self.vocabulary.unlimited.iter().any(|u| raw.contains(&fold(u))) {
            return Usage::Unlimited(raw);
        }
        if self.vocabulary.limited.iter().any(|l| raw.contains(&fold(l))) {
            return Usage::Limited;
        }
        Usage::Unknown(raw)
    }

    fn inspect(&self, name: &str, ability: &Map<String, Value>, errors: &mut Vec<String>, flags: &mut Vec<String>) {
        if !self.is_high_impact(ability) {
            return;
        }
        match self.usage(ability) {
            Usage::Limited => {}
            Usage::Missing => errors.push(format!(
                "ability '{name}' is high-impact but declares no usage limiter"
            )),
            Usage::Unlimited(usage) => errors.push(format!(
                "ability '{name}' is high-impact and always active ({usage}); gate it with a usage limiter"
            )),
            Usage::Unknown(usage) => flags.push(format!(
                "ability '{name}' has an unrecognized usage limiter '{usage}'"
            )),
        }
    }
}

/// Lowercase, with spaces, hyphens and slashes folded to underscores.
fn fold(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, ' ' | '-' | '/') { '_' } else { c })
        .collect()
}

impl Guard for LimiterGuard {
    fn name(&self) -> &str {
        BALANCE_CHECK
    }

    fn description(&self) -> &str {
        "High-impact rewards and capabilities are gated by a usage limiter"
    }

    fn applies_to(&self, kind: ContentKind) -> bool {
        kind.is_mechanical()
    }

    fn check(&self, input: &GuardInput<'_>) -> Result<GuardResult, GuardError> {
        let entity = &input.draft.entity;
        let mut errors = Vec::new();
        let mut flags = Vec::new();

        // The entity itself may be the ability.
        if entity.contains_key(&self.vocabulary.impact_field) {
            let name = label(&Value::Object(entity.clone()), || "entity".to_string());
            self.inspect(&name, entity, &mut errors, &mut flags);
        }

        for field in &self.vocabulary.ability_fields {
            match entity.get(field) {
                Some(Value::Array(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Value::Object(ability) = item {
                            let name = label(item, || format!("{field}[{i}]"));
                            self.inspect(&name, ability, &mut errors, &mut flags);
                        }
                    }
                }
                Some(item @ Value::Object(ability)) => {
                    let name = label(item, || field.clone());
                    self.inspect(&name, ability, &mut errors, &mut flags);
                }
                _ => {}
            }
        }

        let suggestions = input
            .report(FACT_CHECK)
            .map(|report| {
                report
                    .flags
                    .iter()
                    .map(|flag| format!("{FACT_CHECK}: {flag}"))
                    .collect()
            })
            .unwrap_or_default();

        Ok(GuardResult::from_findings(self.name(), errors, flags, suggestions))
    }
}
