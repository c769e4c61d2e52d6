//! Normalizes the run request into a [`Brief`].

use crate::stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
use async_trait::async_trait;
use lorekeep_core::{ArtifactKind, ArtifactPayload, Brief, RetrievalHints};
use serde_json::{Map, Value};

pub const PLANNER: &str = "planner";

const DEFAULT_FACT_LIMIT: usize = 50;

/// Words too common to be useful retrieval keywords.
const STOPWORDS: [&str; 12] = [
    "the", "and", "for", "with", "from", "that", "this", "into", "are", "was", "its", "who",
];

#[derive(Debug, Clone, Default)]
pub struct PlannerStage;

impl PlannerStage {
    pub fn new() -> Self {
        Self
    }
}

fn text(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn list(params: &Map<String, Value>, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn keywords_from(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.chars().count() < 3 || STOPWORDS.contains(&word.as_str()) || out.contains(&word) {
            continue;
        }
        out.push(word);
    }
    out
}

#[async_trait]
impl Stage for PlannerStage {
    fn name(&self) -> &str {
        PLANNER
    }

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_kind(&self) -> ArtifactKind {
        ArtifactKind::Brief
    }

    async fn execute(&self, ctx: &RunContext, _inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let params = &ctx.run.params;
        let kind = ctx.run.kind;

        let prompt = text(params, "prompt")
            .ok_or_else(|| StageError::Failed("request has no prompt".into()))?;
        let mut notes = Vec::new();
        let title = match text(params, "title").or_else(|| text(params, "name")) {
            Some(title) => title,
            None => {
                notes.push("no title given; using a placeholder".to_string());
                format!("Untitled {kind}")
            }
        };

        let mut keywords = list(params, "keywords");
        if keywords.is_empty() {
            keywords = keywords_from(&format!("{title} {prompt}"));
        }
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_FACT_LIMIT);

        let seed = match params.get("seed") {
            Some(Value::Object(seed)) => seed.clone(),
            Some(other) if !other.is_null() => {
                return Err(StageError::Failed(format!("`seed` must be an object, got {other}")));
            }
            _ => Map::new(),
        };

        let brief = Brief {
            kind,
            title,
            prompt,
            tone: text(params, "tone"),
            constraints: list(params, "constraints"),
            hints: RetrievalHints {
                keywords,
                entities: list(params, "entities"),
                limit,
            },
            seed,
        };
        Ok(StageOutput::new(ArtifactPayload::Brief(brief)).with_notes(notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::{ContentKind, EventBus, Registry, Run, RunRequest};
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(request: RunRequest) -> RunContext {
        RunContext {
            run: Run::new(request),
            registry: Arc::new(Registry::default()),
            events: EventBus::default(),
        }
    }

    #[tokio::test]
    async fn builds_brief_from_params() {
        let request = RunRequest::new(ContentKind::Item)
            .param("title", "Lantern of Hollow Light")
            .param("prompt", "A lantern that burns memories")
            .param("tone", "eerie")
            .param("constraints", json!(["no resurrection"]))
            .param("seed", json!({"rarity": "rare"}));
        let output = PlannerStage::new().execute(&ctx(request), &StageInputs::new()).await.unwrap();
        let brief = output.payload.as_brief().unwrap();

        assert_eq!(brief.title, "Lantern of Hollow Light");
        assert_eq!(brief.tone.as_deref(), Some("eerie"));
        assert_eq!(brief.seed["rarity"], "rare");
        assert_eq!(brief.hints.keywords, vec!["lantern", "hollow", "light", "burns", "memories"]);
        assert!(output.payload.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_prompt_fails() {
        let err = PlannerStage::new()
            .execute(&ctx(RunRequest::new(ContentKind::Lore)), &StageInputs::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "request has no prompt");
    }

    #[tokio::test]
    async fn placeholder_title_is_noted() {
        let request = RunRequest::new(ContentKind::Location).param("prompt", "A drowned city");
        let output = PlannerStage::new().execute(&ctx(request), &StageInputs::new()).await.unwrap();
        assert_eq!(output.payload.as_brief().unwrap().title, "Untitled location");
        assert_eq!(output.notes.len(), 1);
    }
}
