//! The field-level merge.
//!
//! Rules apply to top-level fields, in order, first match wins:
//!
//! 1. one contributor supplied the field: adopt it
//! 2. every supplied value is structurally equal: adopt it
//! 3. the version field: most current canonical version
//! 4. the open-question list: de-duplicated by normalized question
//! 5. arrays of primitives: de-duplicated union
//! 6. arrays of records: later records first, then earlier records whose
//!    identity is not already present
//! 7. anything else: last contributor wins
//!
//! A `null` value counts as not supplied.

use crate::value::{is_primitive, push_unique, question_key, record_key, structural_eq};
use lorekeep_core::{ContributedValue, MergeConflict, MergeResult, Registry, ResolutionStrategy, VersionPolicy};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Field holding open questions.
pub const PROPOSALS_FIELD: &str = "proposals";

/// One partial output and who produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub contributor: String,
    pub fields: Map<String, Value>,
}

impl Contribution {
    pub fn new(contributor: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            contributor: contributor.into(),
            fields,
        }
    }

    /// Wrap a JSON value; anything but an object contributes nothing.
    pub fn from_value(contributor: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(contributor, fields)
    }

    fn is_empty(&self) -> bool {
        self.fields.values().all(Value::is_null)
    }
}

pub struct MergeEngine {
    versions: VersionPolicy,
    proposals_field: String,
}

impl MergeEngine {
    pub fn new(versions: VersionPolicy) -> Self {
        Self {
            versions,
            proposals_field: PROPOSALS_FIELD.to_string(),
        }
    }

    pub fn from_registry(registry: &Registry) -> Self {
        Self::new(registry.versions.clone())
    }

    /// Merge contributions, earliest first.
    pub fn merge(&self, contributions: &[Contribution]) -> MergeResult {
        self.merge_with_expected(contributions, &[])
    }

    /// Merge, additionally warning for every `expected` contributor that is
    /// missing or supplied nothing.
    pub fn merge_with_expected(&self, contributions: &[Contribution], expected: &[&str]) -> MergeResult {
        let mut result = MergeResult::default();

        for name in expected {
            let supplied = contributions
                .iter()
                .any(|c| c.contributor == *name && !c.is_empty());
            if !supplied {
                result
                    .warnings
                    .push(format!("expected contributor '{name}' supplied nothing"));
            }
        }

        // Field order is first-seen across contributors.
        let mut order: Vec<&str> = Vec::new();
        let mut supplied: HashMap<&str, Vec<ContributedValue>> = HashMap::new();
        for contribution in contributions {
            for (field, value) in &contribution.fields {
                if value.is_null() {
                    continue;
                }
                let entry = supplied.entry(field.as_str()).or_insert_with(|| {
                    order.push(field.as_str());
                    Vec::new()
                });
                entry.push(ContributedValue {
                    contributor: contribution.contributor.clone(),
                    value: value.clone(),
                });
            }
        }

        for field in order {
            let Some(values) = supplied.remove(field) else {
                continue;
            };
            let (merged, strategy) = self.resolve(field, &values);
            if let Some(strategy) = strategy {
                debug!(field, %strategy, contributors = values.len(), "Merge conflict resolved");
                result.conflicts.push(MergeConflict {
                    field: field.to_string(),
                    contributors: values,
                    resolved_value: merged.clone(),
                    resolution_strategy: strategy,
                });
            }
            result.merged.insert(field.to_string(), merged);
        }

        result
    }

    /// The merged value for one field, and the strategy if it was a conflict.
    fn resolve(&self, field: &str, values: &[ContributedValue]) -> (Value, Option<ResolutionStrategy>) {
        let first = &values[0].value;
        if values.len() == 1 || values.iter().all(|v| structural_eq(&v.value, first)) {
            return (first.clone(), None);
        }

        if field == self.versions.field {
            if let Some(version) = self.prefer_version(values) {
                return (version, Some(ResolutionStrategy::VersionPreference));
            }
        }

        let arrays: Option<Vec<&Vec<Value>>> = values.iter().map(|v| v.value.as_array()).collect();
        if let Some(arrays) = arrays {
            if field == self.proposals_field {
                return (dedup_questions(&arrays), Some(ResolutionStrategy::ProposalDedup));
            }
            let items = || arrays.iter().flat_map(|a| a.iter());
            if items().all(is_primitive) {
                let mut union = Vec::new();
                for item in items() {
                    push_unique(&mut union, item);
                }
                return (Value::Array(union), Some(ResolutionStrategy::ArrayUnion));
            }
            if items().all(Value::is_object) {
                return (union_records(&arrays), Some(ResolutionStrategy::RecordUnion));
            }
        }

        let last = values.last().map(|v| v.value.clone()).unwrap_or(Value::Null);
        (last, Some(ResolutionStrategy::LastWriterWins))
    }

    /// The most current version among string values. Unknown versions rank
    /// below every canonical one; ties go to the later contributor.
    fn prefer_version(&self, values: &[ContributedValue]) -> Option<Value> {
        let mut best: Option<(Option<usize>, &str)> = None;
        for value in values {
            let raw = value.value.as_str()?;
            let rank = self.versions.rank(raw);
            if best.is_none_or(|(best_rank, _)| rank >= best_rank) {
                best = Some((rank, raw));
            }
        }
        let (_, raw) = best?;
        let resolved = self.versions.normalize(raw).unwrap_or_else(|| raw.to_string());
        Some(Value::String(resolved))
    }
}

fn dedup_questions(arrays: &[&Vec<Value>]) -> Value {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in arrays.iter().flat_map(|a| a.iter()) {
        match question_key(item) {
            Some(key) => {
                if seen.insert(key) {
                    merged.push(item.clone());
                }
            }
            None => push_unique(&mut merged, item),
        }
    }
    Value::Array(merged)
}

fn union_records(arrays: &[&Vec<Value>]) -> Value {
    let mut merged: Vec<Value> = Vec::new();
    let mut keys: HashSet<String> = HashSet::new();

    for (position, array) in arrays.iter().rev().enumerate() {
        let latest = position == 0;
        for record in array.iter() {
            match record_key(record) {
                // The latest contributor's records are kept as given.
                Some(key) if latest => {
                    keys.insert(key);
                    merged.push(record.clone());
                }
                Some(key) => {
                    if keys.insert(key) {
                        merged.push(record.clone());
                    }
                }
                None if latest => merged.push(record.clone()),
                None => push_unique(&mut merged, record),
            }
        }
    }
    Value::Array(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> MergeEngine {
        MergeEngine::new(VersionPolicy::default())
    }

    fn c(name: &str, value: Value) -> Contribution {
        Contribution::from_value(name, value)
    }

    #[test]
    fn single_contributor_adopted_without_conflict() {
        let result = engine().merge(&[c("a", json!({"hp": 30})), c("b", json!({"ac": 14}))]);
        assert_eq!(result.merged["hp"], 30);
        assert_eq!(result.merged["ac"], 14);
        assert!(!result.has_conflicts());
    }

    #[test]
    fn null_counts_as_not_supplied() {
        let result = engine().merge(&[c("a", json!({"tone": "dark"})), c("b", json!({"tone": null}))]);
        assert_eq!(result.merged["tone"], "dark");
        assert!(!result.has_conflicts());
    }

    #[test]
    fn last_writer_wins_lists_all_contributors() {
        let result = engine().merge(&[
            c("a", json!({"tone": "dark"})),
            c("b", json!({"tone": "grim"})),
            c("c", json!({"tone": "bleak"})),
        ]);
        assert_eq!(result.merged["tone"], "bleak");
        let conflict = result.conflict_for("tone").unwrap();
        assert_eq!(conflict.resolution_strategy, ResolutionStrategy::LastWriterWins);
        assert_eq!(conflict.contributor_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn newest_canonical_version_preferred() {
        let result = engine().merge(&[
            c("a", json!({"rulesVersion": "SRD 5.2"})),
            c("b", json!({"rulesVersion": "5e"})),
        ]);
        assert_eq!(result.merged["rulesVersion"], "5e-2024");
        assert_eq!(
            result.conflict_for("rulesVersion").unwrap().resolution_strategy,
            ResolutionStrategy::VersionPreference
        );
    }

    #[test]
    fn unknown_version_loses_to_canonical() {
        let result = engine().merge(&[
            c("a", json!({"rulesVersion": "2014"})),
            c("b", json!({"rulesVersion": "homebrew"})),
        ]);
        assert_eq!(result.merged["rulesVersion"], "5e-2014");
    }

    #[test]
    fn non_string_versions_fall_back_to_last_writer() {
        let result = engine().merge(&[
            c("a", json!({"rulesVersion": 5})),
            c("b", json!({"rulesVersion": "5e"})),
        ]);
        assert_eq!(result.merged["rulesVersion"], "5e");
        assert_eq!(
            result.conflict_for("rulesVersion").unwrap().resolution_strategy,
            ResolutionStrategy::LastWriterWins
        );
    }

    #[test]
    fn primitive_arrays_union() {
        let result = engine().merge(&[
            c("a", json!({"tags": ["undead", "fire"]})),
            c("b", json!({"tags": ["fire", "boss", 3, 3.0]})),
        ]);
        assert_eq!(result.merged["tags"], json!(["undead", "fire", "boss", 3]));
        assert_eq!(
            result.conflict_for("tags").unwrap().resolution_strategy,
            ResolutionStrategy::ArrayUnion
        );
    }

    #[test]
    fn record_arrays_prefer_later_records() {
        let result = engine().merge(&[
            c(
                "a",
                json!({"actions": [
                    {"name": "Bite", "damage": "1d6"},
                    {"name": "Howl"}
                ]}),
            ),
            c("b", json!({"actions": [{"name": "bite", "damage": "2d6"}]})),
        ]);
        assert_eq!(
            result.merged["actions"],
            json!([{"name": "bite", "damage": "2d6"}, {"name": "Howl"}])
        );
        assert_eq!(
            result.conflict_for("actions").unwrap().resolution_strategy,
            ResolutionStrategy::RecordUnion
        );
    }

    #[test]
    fn mixed_arrays_fall_back_to_last_writer() {
        let result = engine().merge(&[c("a", json!({"x": [1, {"a": 1}]})), c("b", json!({"x": [2]}))]);
        assert_eq!(result.merged["x"], json!([2]));
        assert_eq!(
            result.conflict_for("x").unwrap().resolution_strategy,
            ResolutionStrategy::LastWriterWins
        );
    }

    #[test]
    fn proposals_deduplicated_across_shapes() {
        let result = engine().merge(&[
            c("a", json!({"proposals": ["Who built the dam?"]})),
            c(
                "b",
                json!({"proposals": [
                    {"question": "who built the  DAM?", "options": ["dwarves"]},
                    "Is the river cursed?"
                ]}),
            ),
        ]);
        assert_eq!(
            result.merged["proposals"],
            json!(["Who built the dam?", "Is the river cursed?"])
        );
    }

    #[test]
    fn expected_contributors_warned() {
        let result = engine().merge_with_expected(
            &[c("brief", json!({})), c("creator", json!({"name": "Vess"}))],
            &["brief", "creator", "editor"],
        );
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].contains("'brief'"));
        assert!(result.warnings[1].contains("'editor'"));
    }

    #[test]
    fn non_object_contribution_is_empty() {
        let result = engine().merge_with_expected(&[c("a", json!([1, 2]))], &["a"]);
        assert!(result.merged.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn conflicts_in_first_seen_field_order() {
        let result = engine().merge(&[
            c("a", json!({"alpha": 1, "zeal": 1})),
            c("b", json!({"alpha": 2, "mid": 1, "zeal": 2})),
            c("c", json!({"mid": 2})),
        ]);
        let fields: Vec<&str> = result.conflicts.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["alpha", "zeal", "mid"]);
    }
}
