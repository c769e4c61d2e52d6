//! Character accounting and the line renderers whose output is counted.
//!
//! Every budgeted quantity is measured in characters (Unicode scalar
//! values), on exactly the text that ends up in the payload.

use lorekeep_core::{Decision, Fact, Proposal};

/// Size of a piece of payload text.
pub fn chars(text: &str) -> usize {
    text.chars().count()
}

/// Total size of several pieces.
pub fn chars_all<S: AsRef<str>>(pieces: &[S]) -> usize {
    pieces.iter().map(|p| chars(p.as_ref())).sum()
}

/// `- [f12] The bridge at Caddow fell in the flood year.`
pub fn fact_line(fact: &Fact) -> String {
    match &fact.source_entity {
        Some(entity) => format!("- [{}] ({}) {}\n", fact.id, entity, fact.text),
        None => format!("- [{}] {}\n", fact.id, fact.text),
    }
}

/// `- Who built the dam? => "the Vell clan"`
pub fn decision_line(decision: &Decision) -> String {
    format!("- {} => {}\n", decision.topic.trim(), decision.value)
}

/// `- Is the river cursed? (options: yes | no)`
pub fn question_line(proposal: &Proposal) -> String {
    if proposal.options.is_empty() {
        format!("- {}\n", proposal.question.trim())
    } else {
        format!(
            "- {} (options: {})\n",
            proposal.question.trim(),
            proposal.options.join(" | ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(chars(""), 0);
    }

    #[test]
    fn counts_scalars_not_bytes() {
        assert_eq!(chars("é"), 1);
        assert_eq!(chars("drakë"), 5);
    }

    #[test]
    fn fact_line_shape() {
        let fact = Fact::new("f1", "Iron rusts.");
        assert_eq!(fact_line(&fact), "- [f1] Iron rusts.\n");
        let sourced = Fact::new("f2", "Old.").from_entity("Caddow");
        assert_eq!(fact_line(&sourced), "- [f2] (Caddow) Old.\n");
    }

    #[test]
    fn decision_and_question_lines() {
        assert_eq!(
            decision_line(&Decision::new(" Banner? ", json!("red"))),
            "- Banner? => \"red\"\n"
        );
        let q = Proposal::with_options("Cursed?", vec!["yes".into(), "no".into()]);
        assert_eq!(question_line(&q), "- Cursed? (options: yes | no)\n");
    }

    #[test]
    fn chars_all_sums() {
        assert_eq!(chars_all(&["ab", "cde"]), 5);
    }
}
