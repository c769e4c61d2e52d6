//! Wire ↔ domain mapping for drafts.
//!
//! The wire shape is what the generation process emits: a flat object of
//! entity fields with the reserved draft keys mixed in, proposals either as
//! bare question strings or as `{question, options}` records. [`to_domain`]
//! and [`to_wire`] are pure and mutual inverses over canonical wire values
//! (bare strings exactly when a proposal has no options).

use crate::artifact::{ArtifactKind, Draft, PayloadError};
use crate::proposal::Proposal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A proposal as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireProposal {
    Text(String),
    Structured {
        question: String,
        #[serde(default)]
        options: Vec<String>,
    },
}

/// A draft in wire shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDraft {
    #[serde(default)]
    pub sources_used: Vec<String>,

    #[serde(default)]
    pub assumptions: Vec<String>,

    #[serde(default)]
    pub proposals: Vec<WireProposal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canon_change: Option<String>,

    /// Every non-reserved key: the entity itself.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WireDraft {
    /// Read a wire draft out of a flat JSON object.
    pub fn from_object(object: Map<String, Value>) -> Result<Self, PayloadError> {
        serde_json::from_value(Value::Object(object)).map_err(|e| PayloadError::Invalid {
            kind: ArtifactKind::Draft,
            reason: e.to_string(),
        })
    }

    /// Flatten back into a single JSON object.
    pub fn into_object(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Map a wire draft to the domain draft.
pub fn to_domain(wire: WireDraft) -> Result<Draft, PayloadError> {
    let WireDraft {
        sources_used,
        assumptions,
        proposals,
        canon_change,
        fields,
    } = wire;

    let canon_change = canon_change.ok_or(PayloadError::Missing {
        kind: ArtifactKind::Draft,
        field: "canonChange",
    })?;

    let proposals = proposals
        .into_iter()
        .map(|p| match p {
            WireProposal::Text(question) => Proposal::new(question),
            WireProposal::Structured { question, options } => Proposal::with_options(question, options),
        })
        .collect();

    Ok(Draft {
        entity: fields,
        sources_used,
        assumptions,
        proposals,
        canon_change,
    })
}

/// Map a domain draft to its wire shape.
pub fn to_wire(draft: &Draft) -> WireDraft {
    let Draft {
        entity,
        sources_used,
        assumptions,
        proposals,
        canon_change,
    } = draft;

    WireDraft {
        sources_used: sources_used.clone(),
        assumptions: assumptions.clone(),
        proposals: proposals
            .iter()
            .map(|p| {
                if p.options.is_empty() {
                    WireProposal::Text(p.question.clone())
                } else {
                    WireProposal::Structured {
                        question: p.question.clone(),
                        options: p.options.clone(),
                    }
                }
            })
            .collect(),
        canon_change: Some(canon_change.clone()),
        fields: entity.clone(),
    }
}
