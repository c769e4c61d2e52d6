//! Open questions and the decisions that resolve them.

use serde::{Deserialize, Serialize};

/// Fold a question or topic to its identity key: lowercase, with every run
/// of whitespace collapsed to a single space and the ends trimmed.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// An open question the generation process could not resolve unassisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub question: String,

    /// Optional bounded choice list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Proposal {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
        }
    }

    pub fn with_options(question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            question: question.into(),
            options,
        }
    }

    /// Identity key (case/whitespace-folded question text).
    pub fn key(&self) -> String {
        normalize_key(&self.question)
    }

    /// Append `incoming` proposals to `list`, skipping any whose identity is
    /// already present. Returns how many were added.
    pub fn extend_unique(list: &mut Vec<Proposal>, incoming: impl IntoIterator<Item = Proposal>) -> usize {
        let mut added = 0;
        for proposal in incoming {
            let key = proposal.key();
            if key.is_empty() || list.iter().any(|p| p.key() == key) {
                continue;
            }
            list.push(proposal);
            added += 1;
        }
        added
    }
}

/// A resolved proposal: the chosen value for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub topic: String,
    pub value: serde_json::Value,
}

impl Decision {
    pub fn new(topic: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            value,
        }
    }

    pub fn key(&self) -> String {
        normalize_key(&self.topic)
    }

    /// Whether this decision answers the given proposal.
    pub fn resolves(&self, proposal: &Proposal) -> bool {
        self.key() == proposal.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_whitespace() {
        assert_eq!(
            normalize_key("  What   color is\tthe BANNER? "),
            "what color is the banner?"
        );
        assert_eq!(normalize_key("   "), "");
    }

    #[test]
    fn extend_unique_skips_folded_duplicates() {
        let mut list = vec![Proposal::new("What color is the banner?")];
        let added = Proposal::extend_unique(
            &mut list,
            vec![
                Proposal::new("what color is the banner?"),
                Proposal::new("Who forged the blade?"),
                Proposal::new("  "),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].question, "What color is the banner?");
    }

    #[test]
    fn decision_resolves_matching_proposal() {
        let decision = Decision::new("who forged the BLADE?", serde_json::json!("Thrain"));
        assert!(decision.resolves(&Proposal::new("Who forged the blade?")));
        assert!(!decision.resolves(&Proposal::new("Who wields the blade?")));
    }
}
