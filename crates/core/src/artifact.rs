//! Artifacts: the persisted output of one stage for one run.
//!
//! Every stage payload is a variant of the closed [`ArtifactPayload`] union
//! and is validated against its declared shape before it crosses into
//! persistence.

use crate::content::ContentKind;
use crate::proposal::Proposal;
use crate::provenance::MergeConflict;
use crate::retrieval::{FactPack, RetrievalHints};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique artifact identifier.
pub type ArtifactId = String;

/// Draft fields that live beside the entity in the wire shape.
pub const RESERVED_DRAFT_KEYS: [&str; 4] = ["sourcesUsed", "assumptions", "proposals", "canonChange"];

/// Shape violations detected at the orchestrator boundary.
#[derive(Debug, Clone, Error)]
pub enum PayloadError {
    #[error("{kind} payload is missing required field `{field}`")]
    Missing { kind: ArtifactKind, field: &'static str },

    #[error("{kind} payload is invalid: {reason}")]
    Invalid { kind: ArtifactKind, reason: String },

    #[error("expected a {expected} payload, stage produced {found}")]
    KindMismatch {
        expected: ArtifactKind,
        found: ArtifactKind,
    },
}

/// Discriminant of [`ArtifactPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Brief,
    FactPack,
    Draft,
    GuardReport,
    Canonical,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Brief => "brief",
            Self::FactPack => "fact_pack",
            Self::Draft => "draft",
            Self::GuardReport => "guard_report",
            Self::Canonical => "canonical",
        };
        f.write_str(s)
    }
}

/// Normalized request produced by the planner stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub kind: ContentKind,
    pub title: String,
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    #[serde(default)]
    pub constraints: Vec<String>,

    pub hints: RetrievalHints,

    /// Fields the requester declared up front; they take part in the final
    /// merge as the earliest contributor.
    #[serde(default)]
    pub seed: Map<String, Value>,
}

/// A generated draft of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub entity: Map<String, Value>,
    pub sources_used: Vec<String>,
    pub assumptions: Vec<String>,
    pub proposals: Vec<Proposal>,
    /// One-line summary of what this draft changes in canon.
    pub canon_change: String,
}

/// How a draft was assembled from chunk outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Conflicts resolved while folding chunk outputs together.
    #[serde(default)]
    pub conflicts: Vec<MergeConflict>,

    #[serde(default)]
    pub warnings: Vec<String>,

    /// Number of exchanges the draft was assembled from.
    #[serde(default)]
    pub chunks: usize,
}

/// A draft as persisted by the creator stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftArtifact {
    #[serde(flatten)]
    pub draft: Draft,

    #[serde(default)]
    pub provenance: Provenance,
}

/// The outcome of one guard invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    pub guard: String,
    pub ok: bool,

    /// The guard did not apply to this content and ran no checks.
    #[serde(default)]
    pub skipped: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub flags: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl GuardResult {
    pub fn pass(guard: impl Into<String>) -> Self {
        Self {
            guard: guard.into(),
            ok: true,
            skipped: false,
            reason: None,
            errors: Vec::new(),
            flags: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn skip(guard: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            reason: Some(reason.into()),
            ..Self::pass(guard)
        }
    }

    /// Build a result from collected findings; `ok` iff there are no errors.
    pub fn from_findings(
        guard: impl Into<String>,
        errors: Vec<String>,
        flags: Vec<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
            flags,
            suggestions,
            ..Self::pass(guard)
        }
    }

    /// Advisory output that does not halt the run.
    pub fn advisories(&self) -> impl Iterator<Item = &String> {
        self.flags.iter().chain(self.suggestions.iter())
    }
}

/// The final, reconciled entity for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Canonical {
    pub kind: ContentKind,
    pub entity: Map<String, Value>,
    pub canon_change: String,
    pub sources_used: Vec<String>,
    pub open_questions: Vec<Proposal>,
    pub conflicts: Vec<MergeConflict>,
    pub warnings: Vec<String>,
    /// Non-blocking guard flags and suggestions, prefixed with the guard name.
    pub advisories: Vec<String>,
}

/// Closed union of every stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Brief(Brief),
    FactPack(FactPack),
    Draft(DraftArtifact),
    GuardReport(GuardResult),
    Canonical(Canonical),
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Brief(_) => ArtifactKind::Brief,
            Self::FactPack(_) => ArtifactKind::FactPack,
            Self::Draft(_) => ArtifactKind::Draft,
            Self::GuardReport(_) => ArtifactKind::GuardReport,
            Self::Canonical(_) => ArtifactKind::Canonical,
        }
    }

    /// Check the payload against its declared shape.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let kind = self.kind();
        match self {
            Self::Brief(brief) => {
                if brief.prompt.trim().is_empty() {
                    return Err(PayloadError::Missing { kind, field: "prompt" });
                }
                if brief.title.trim().is_empty() {
                    return Err(PayloadError::Missing { kind, field: "title" });
                }
            }
            Self::FactPack(pack) => {
                let mut seen = std::collections::HashSet::new();
                for fact in &pack.facts {
                    if fact.id.trim().is_empty() {
                        return Err(PayloadError::Invalid {
                            kind,
                            reason: "fact with empty id".into(),
                        });
                    }
                    if !seen.insert(fact.id.as_str()) {
                        return Err(PayloadError::Invalid {
                            kind,
                            reason: format!("duplicate fact id `{}`", fact.id),
                        });
                    }
                }
            }
            Self::Draft(DraftArtifact { draft, .. }) => {
                if draft.entity.is_empty() {
                    return Err(PayloadError::Missing { kind, field: "entity" });
                }
                validate_canon_change(kind, &draft.canon_change)?;
                if draft.proposals.iter().any(|p| p.key().is_empty()) {
                    return Err(PayloadError::Invalid {
                        kind,
                        reason: "proposal with empty question".into(),
                    });
                }
                if let Some(key) = draft.entity.keys().find(|k| RESERVED_DRAFT_KEYS.contains(&k.as_str())) {
                    return Err(PayloadError::Invalid {
                        kind,
                        reason: format!("entity field `{key}` shadows a reserved draft field"),
                    });
                }
            }
            Self::GuardReport(result) => {
                if result.guard.trim().is_empty() {
                    return Err(PayloadError::Missing { kind, field: "guard" });
                }
                if !result.ok && result.errors.is_empty() {
                    return Err(PayloadError::Invalid {
                        kind,
                        reason: "failed guard result carries no errors".into(),
                    });
                }
                if result.skipped && (!result.ok || result.reason.is_none()) {
                    return Err(PayloadError::Invalid {
                        kind,
                        reason: "skipped guard result must be ok and carry a reason".into(),
                    });
                }
            }
            Self::Canonical(canonical) => {
                if canonical.entity.is_empty() {
                    return Err(PayloadError::Missing { kind, field: "entity" });
                }
                validate_canon_change(kind, &canonical.canon_change)?;
            }
        }
        Ok(())
    }

    /// Validate and additionally require a specific kind.
    pub fn expect_kind(&self, expected: ArtifactKind) -> Result<(), PayloadError> {
        let found = self.kind();
        if found != expected {
            return Err(PayloadError::KindMismatch { expected, found });
        }
        self.validate()
    }

    pub fn as_brief(&self) -> Option<&Brief> {
        match self {
            Self::Brief(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_fact_pack(&self) -> Option<&FactPack> {
        match self {
            Self::FactPack(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_draft(&self) -> Option<&Draft> {
        self.as_draft_artifact().map(|d| &d.draft)
    }

    pub fn as_draft_artifact(&self) -> Option<&DraftArtifact> {
        match self {
            Self::Draft(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_guard_report(&self) -> Option<&GuardResult> {
        match self {
            Self::GuardReport(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_canonical(&self) -> Option<&Canonical> {
        match self {
            Self::Canonical(c) => Some(c),
            _ => None,
        }
    }

    /// SHA-256 of the payload's JSON encoding, hex-encoded.
    pub fn digest(&self) -> String {
        // Object keys serialize in sorted order, so the encoding is stable.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn validate_canon_change(kind: ArtifactKind, summary: &str) -> Result<(), PayloadError> {
    if summary.trim().is_empty() {
        return Err(PayloadError::Missing {
            kind,
            field: "canonChange",
        });
    }
    if summary.contains('\n') {
        return Err(PayloadError::Invalid {
            kind,
            reason: "canonChange must be a single line".into(),
        });
    }
    Ok(())
}

/// A persisted stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub run_id: String,
    pub stage: String,
    pub payload: ArtifactPayload,
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(run_id: impl Into<String>, stage: impl Into<String>, payload: ArtifactPayload) -> Self {
        let digest = payload.digest();
        Self {
            id: format!("art_{}", Uuid::new_v4().simple()),
            run_id: run_id.into(),
            stage: stage.into(),
            payload,
            digest,
            created_at: Utc::now(),
        }
    }
}
