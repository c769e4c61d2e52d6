//! Gathers grounding facts for the brief.

use super::planner::PLANNER;
use crate::stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
use async_trait::async_trait;
use lorekeep_core::{ArtifactKind, ArtifactPayload, Fact, FactPack, FactRetriever, RetrievalError, RetrievalHints};
use std::sync::Arc;
use tracing::debug;

pub const RETRIEVER: &str = "retriever";

pub struct RetrieverStage {
    retriever: Arc<dyn FactRetriever>,
}

impl RetrieverStage {
    pub fn new(retriever: Arc<dyn FactRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Stage for RetrieverStage {
    fn name(&self) -> &str {
        RETRIEVER
    }

    fn dependencies(&self) -> Vec<String> {
        vec![PLANNER.to_string()]
    }

    fn output_kind(&self) -> ArtifactKind {
        ArtifactKind::FactPack
    }

    async fn execute(&self, ctx: &RunContext, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let brief = inputs.brief(PLANNER)?;
        let pack = self.retriever.retrieve(&brief.hints).await?;
        debug!(
            run_id = %ctx.run_id(),
            retriever = self.retriever.name(),
            facts = pack.facts.len(),
            gaps = pack.gaps.len(),
            "Facts retrieved"
        );

        let mut notes = vec![format!("{} facts from {}", pack.facts.len(), self.retriever.name())];
        if !pack.gaps.is_empty() {
            notes.push(format!("no grounding for: {}", pack.gaps.join(", ")));
        }
        Ok(StageOutput::new(ArtifactPayload::FactPack(pack)).with_notes(notes))
    }
}

/// Keyword-overlap retrieval over a fixed corpus.
///
/// A fact's rank is the share of hint terms (keywords and entities) found in
/// its text or source entity. Facts matching nothing are left out; terms
/// matching nothing become gaps.
#[derive(Debug, Clone, Default)]
pub struct StaticFactRetriever {
    corpus: Vec<Fact>,
}

impl StaticFactRetriever {
    pub fn new(corpus: Vec<Fact>) -> Self {
        Self { corpus }
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }
}

#[async_trait]
impl FactRetriever for StaticFactRetriever {
    fn name(&self) -> &str {
        "static"
    }

    async fn retrieve(&self, hints: &RetrievalHints) -> Result<FactPack, RetrievalError> {
        if hints.limit == 0 {
            return Err(RetrievalError::InvalidHints("limit must be positive".into()));
        }
        let terms: Vec<String> = hints
            .keywords
            .iter()
            .chain(hints.entities.iter())
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut matched_terms = vec![false; terms.len()];
        let mut facts: Vec<Fact> = Vec::new();
        for fact in &self.corpus {
            let haystack = format!(
                "{} {}",
                fact.text.to_lowercase(),
                fact.source_entity.as_deref().unwrap_or_default().to_lowercase()
            );
            let mut hits = 0;
            for (i, term) in terms.iter().enumerate() {
                if haystack.contains(term.as_str()) {
                    hits += 1;
                    matched_terms[i] = true;
                }
            }
            if terms.is_empty() || hits > 0 {
                let rank = if terms.is_empty() {
                    0.0
                } else {
                    hits as f32 / terms.len() as f32
                };
                facts.push(fact.clone().ranked(rank));
            }
        }

        facts.sort_by(|a, b| b.rank.total_cmp(&a.rank));
        facts.truncate(hints.limit);

        let mut entities: Vec<String> = Vec::new();
        for entity in facts.iter().filter_map(|f| f.source_entity.as_ref()) {
            if !entities.contains(entity) {
                entities.push(entity.clone());
            }
        }
        let gaps = terms
            .iter()
            .zip(matched_terms)
            .filter(|(_, matched)| !matched)
            .map(|(term, _)| term.clone())
            .collect();

        Ok(FactPack { facts, entities, gaps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> StaticFactRetriever {
        StaticFactRetriever::new(vec![
            Fact::new("f1", "The lantern was forged in Caddow.").from_entity("Caddow"),
            Fact::new("f2", "Hollow light burns without oil."),
            Fact::new("f3", "Wolves avoid the marsh."),
            Fact::new("f4", "The hollow lantern hums at night."),
        ])
    }

    #[tokio::test]
    async fn ranks_by_term_overlap() {
        let hints = RetrievalHints {
            keywords: vec!["lantern".into(), "hollow".into(), "dragon".into()],
            entities: vec![],
            limit: 10,
        };
        let pack = corpus().retrieve(&hints).await.unwrap();
        let ids: Vec<&str> = pack.facts.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f4", "f1", "f2"]);
        assert_eq!(pack.entities, vec!["Caddow"]);
        assert_eq!(pack.gaps, vec!["dragon"]);
    }

    #[tokio::test]
    async fn limit_truncates() {
        let hints = RetrievalHints {
            keywords: vec!["the".into()],
            entities: vec![],
            limit: 2,
        };
        let pack = corpus().retrieve(&hints).await.unwrap();
        assert_eq!(pack.facts.len(), 2);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let err = corpus().retrieve(&RetrievalHints::default()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidHints(_)));
    }
}
