//! Fact retrieval collaborator: grounding facts for a run.
//!
//! The retriever itself is external; this module defines the bundle it
//! returns and the trait the pipeline consumes.

use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single grounding fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub id: String,
    pub text: String,

    /// The entity this fact was drawn from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_entity: Option<String>,

    /// Retrieval rank score; higher is more relevant.
    #[serde(default)]
    pub rank: f32,
}

impl Fact {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_entity: None,
            rank: 0.0,
        }
    }

    pub fn ranked(mut self, rank: f32) -> Self {
        self.rank = rank;
        self
    }

    pub fn from_entity(mut self, entity: impl Into<String>) -> Self {
        self.source_entity = Some(entity.into());
        self
    }
}

/// A ranked, immutable bundle of grounding facts plus referenced entities
/// and known gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactPack {
    #[serde(default)]
    pub facts: Vec<Fact>,

    #[serde(default)]
    pub entities: Vec<String>,

    /// Topics the retriever knows it has nothing for.
    #[serde(default)]
    pub gaps: Vec<String>,
}

impl FactPack {
    pub fn contains(&self, fact_id: &str) -> bool {
        self.facts.iter().any(|f| f.id == fact_id)
    }

    /// Facts sorted by rank, highest first. Equal ranks keep retrieval order.
    pub fn ranked(&self) -> Vec<Fact> {
        let mut facts = self.facts.clone();
        facts.sort_by(|a, b| b.rank.total_cmp(&a.rank));
        facts
    }
}

/// Hints passed to the retriever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHints {
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub entities: Vec<String>,

    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// The retrieval collaborator.
#[async_trait]
pub trait FactRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, hints: &RetrievalHints) -> std::result::Result<FactPack, RetrievalError>;
}
