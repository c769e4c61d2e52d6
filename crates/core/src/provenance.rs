//! Merge provenance: the audit record of every resolved conflict.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which resolution rule produced a field's merged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The version-identifier field: most current canonical version wins.
    VersionPreference,
    /// The open-question list: de-duplicated by normalized question.
    ProposalDedup,
    /// Arrays of primitives: de-duplicated union.
    ArrayUnion,
    /// Arrays of records: later records win by identity key.
    RecordUnion,
    /// Differing scalars/objects: the last contributor wins.
    LastWriterWins,
}

impl ResolutionStrategy {
    /// Whether the conflict was resolved by combining arrays.
    pub fn is_merged_array(&self) -> bool {
        matches!(self, Self::ProposalDedup | Self::ArrayUnion | Self::RecordUnion)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::VersionPreference => "version_preference",
            Self::ProposalDedup => "proposal_dedup",
            Self::ArrayUnion => "array_union",
            Self::RecordUnion => "record_union",
            Self::LastWriterWins => "last_writer_wins",
        };
        f.write_str(s)
    }
}

/// One contributor's value for a conflicting field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributedValue {
    pub contributor: String,
    pub value: Value,
}

/// A field for which contributors supplied differing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    pub field: String,
    pub contributors: Vec<ContributedValue>,
    pub resolved_value: Value,
    pub resolution_strategy: ResolutionStrategy,
}

impl MergeConflict {
    pub fn contributor_ids(&self) -> Vec<&str> {
        self.contributors.iter().map(|c| c.contributor.as_str()).collect()
    }
}

/// The outcome of merging partial objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged: Map<String, Value>,
    #[serde(default)]
    pub conflicts: Vec<MergeConflict>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn conflict_for(&self, field: &str) -> Option<&MergeConflict> {
        self.conflicts.iter().find(|c| c.field == field)
    }
}
