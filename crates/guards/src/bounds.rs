//! Bounds guard: movement and action magnitudes stay inside declared
//! capability bounds.
//!
//! Any key named by a bound rule is checked wherever it appears in the
//! entity, so `speed` at the top level and `range` inside an action are both
//! covered. Values may be numbers, numeric strings (`"30 ft."`), or objects
//! of those (`{"walk": 30, "fly": 60}`).

use crate::{Guard, GuardError, GuardInput, PHYSICS_CHECK};
use lorekeep_core::{BoundRule, CapabilityBounds, ContentKind, GuardResult};
use serde_json::Value;

/// Nesting depth below which the entity is not searched.
const MAX_DEPTH: usize = 6;

#[derive(Debug, Clone)]
pub struct BoundsGuard {
    bounds: CapabilityBounds,
}

impl BoundsGuard {
    pub fn new(bounds: CapabilityBounds) -> Self {
        Self { bounds }
    }

    fn walk(&self, value: &Value, path: &str, depth: usize, out: &mut Vec<Violation>) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = join(path, key);
                    match self.bounds.rule(key) {
                        Some(rule) => check_value(rule, child, &child_path, out),
                        None => self.walk(child, &child_path, depth + 1, out),
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, &format!("{path}[{i}]"), depth + 1, out);
                }
            }
            _ => {}
        }
    }

    fn waiver(&self, input: &GuardInput<'_>) -> Waiver {
        match input.draft.entity.get(&self.bounds.override_field) {
            Some(Value::Bool(true)) => Waiver::All,
            Some(Value::String(s)) => Waiver::Fields(vec![s.trim().to_string()]),
            Some(Value::Array(items)) => Waiver::Fields(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .collect(),
            ),
            Some(Value::Object(map)) => Waiver::Fields(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
                    .map(|(k, _)| k.clone())
                    .collect(),
            ),
            _ => Waiver::Fields(Vec::new()),
        }
    }
}

/// A magnitude outside its rule.
struct Violation {
    field: String,
    message: String,
}

/// Which bounded fields the draft's override covers.
enum Waiver {
    All,
    Fields(Vec<String>),
}

impl Waiver {
    fn covers(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::Fields(fields) => fields.iter().any(|f| f == field),
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn check_value(rule: &BoundRule, value: &Value, path: &str, out: &mut Vec<Violation>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                check_value(rule, child, &join(path, key), out);
            }
        }
        other => {
            if let Some(magnitude) = magnitude(other) {
                if !rule.admits(magnitude) {
                    out.push(Violation {
                        field: rule.field.clone(),
                        message: format!(
                            "{path} = {magnitude} is outside the allowed range {}-{}",
                            rule.min, rule.max
                        ),
                    });
                }
            }
        }
    }
}

/// The leading number of a value: `30`, `"30 ft."`, `"-5"`.
fn magnitude(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-')))
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            s[..end].parse().ok()
        }
        _ => None,
    }
}

impl Guard for BoundsGuard {
    fn name(&self) -> &str {
        PHYSICS_CHECK
    }

    fn description(&self) -> &str {
        "Movement and action magnitudes stay within capability bounds"
    }

    fn applies_to(&self, kind: ContentKind) -> bool {
        kind.is_mechanical()
    }

    fn check(&self, input: &GuardInput<'_>) -> Result<GuardResult, GuardError> {
        let mut violations = Vec::new();
        self.walk(
            &Value::Object(input.draft.entity.clone()),
            "",
            0,
            &mut violations,
        );

        if violations.is_empty() {
            return Ok(GuardResult::pass(self.name()));
        }

        let waiver = self.waiver(input);
        let mut errors = Vec::new();
        let mut flags = Vec::new();
        for violation in violations {
            if waiver.covers(&violation.field) {
                flags.push(format!("{} (allowed by {})", violation.message, self.bounds.override_field));
            } else {
                errors.push(violation.message);
            }
        }
        Ok(GuardResult::from_findings(self.name(), errors, flags, vec![]))
    }
}
