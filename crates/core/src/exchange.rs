//! The external generation exchange boundary.
//!
//! Outbound is one composed text payload; inbound is raw text that must
//! parse into a [`ChunkReply`]. A reply that does not parse is a
//! [`ExchangeError::ParseFailure`] and the same exchange is retried.

use crate::error::ExchangeError;
use crate::proposal::Decision;
use crate::wire::WireDraft;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Key under which a reply lists the proposals it resolved.
pub const DECISIONS_KEY: &str = "decisions";

/// The text-generation collaborator.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    /// Send one composed payload and return the raw reply text.
    async fn exchange(&self, chunk: usize, payload: &str) -> std::result::Result<String, ExchangeError>;
}

/// A parsed reply to one chunk exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReply {
    /// The partial draft in wire shape (entity fields plus the reserved
    /// `sourcesUsed`/`assumptions`/`proposals`/`canonChange` keys).
    pub partial: Map<String, Value>,
    /// Proposals the exchange resolved, in the order given.
    pub decisions: Vec<Decision>,
}

impl ChunkReply {
    /// Parse raw reply text. Markdown code fences around the JSON are
    /// tolerated; anything else that is not a JSON object is a parse failure.
    pub fn parse(chunk: usize, raw: &str) -> std::result::Result<Self, ExchangeError> {
        let fail = |reason: String| ExchangeError::ParseFailure { chunk, reason };

        let body = strip_fences(raw);
        let value: Value = serde_json::from_str(body).map_err(|e| fail(e.to_string()))?;
        let Value::Object(mut partial) = value else {
            return Err(fail("reply is not a JSON object".into()));
        };

        let decisions = match partial.remove(DECISIONS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(topic, value)| Decision::new(topic, value))
                .collect(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| serde_json::from_value::<Decision>(item).map_err(|e| fail(format!("decision: {e}"))))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(other) => return Err(fail(format!("`decisions` must be an object or array, got {other}"))),
        };

        // Reserved fields must have their declared shapes.
        serde_json::from_value::<WireDraft>(Value::Object(partial.clone()))
            .map_err(|e| fail(e.to_string()))?;

        Ok(Self { partial, decisions })
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_with_decision_map() {
        let reply = ChunkReply::parse(
            0,
            r#"{"name": "Ash Wolf", "sourcesUsed": ["f1"], "decisions": {"Pack size?": 6}}"#,
        )
        .unwrap();
        assert_eq!(reply.partial["name"], "Ash Wolf");
        assert!(!reply.partial.contains_key("decisions"));
        assert_eq!(reply.decisions, vec![Decision::new("Pack size?", json!(6))]);
    }

    #[test]
    fn parses_fenced_reply_with_decision_list() {
        let raw = "```json\n{\"tone\": \"grim\", \"decisions\": [{\"topic\": \"Banner?\", \"value\": \"red\"}]}\n```";
        let reply = ChunkReply::parse(1, raw).unwrap();
        assert_eq!(reply.partial["tone"], "grim");
        assert_eq!(reply.decisions[0].topic, "Banner?");
    }

    #[test]
    fn rejects_non_object() {
        let err = ChunkReply::parse(3, "[1, 2]").unwrap_err();
        assert!(matches!(err, ExchangeError::ParseFailure { chunk: 3, .. }));
    }

    #[test]
    fn rejects_truncated_json() {
        assert!(ChunkReply::parse(0, r#"{"name": "Ash"#).is_err());
    }

    #[test]
    fn rejects_mistyped_reserved_field() {
        let err = ChunkReply::parse(0, r#"{"sourcesUsed": "f1"}"#).unwrap_err();
        assert!(err.is_retryable());
    }
}
