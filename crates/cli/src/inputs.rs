//! Reading requests, fact corpora, and JSON documents from disk.

use crate::RequestArgs;
use lorekeep_core::{Fact, FactPack, RunRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let value = serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
    Ok(value)
}

/// Split `key=value`; the value is JSON when it parses, a string otherwise.
pub fn parse_param(raw: &str) -> CliResult<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("parameter '{raw}' is not of the form KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("parameter '{raw}' has an empty key").into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn build_request(args: &RequestArgs) -> CliResult<RunRequest> {
    if let Some(path) = &args.request {
        return read_json(path);
    }
    let kind = args.kind.ok_or("either --request or --kind is required")?;
    let mut request = RunRequest::new(kind);
    if let Some(prompt) = &args.prompt {
        request = request.param("prompt", prompt.as_str());
    }
    if let Some(title) = &args.title {
        request = request.param("title", title.as_str());
    }
    for raw in &args.param {
        let (key, value) = parse_param(raw)?;
        request = request.param(key, value);
    }
    Ok(request)
}

/// A corpus file is either a bare array of facts or a fact pack.
pub fn load_corpus(path: Option<&Path>) -> CliResult<Vec<Fact>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let value: Value = read_json(path)?;
    let facts = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(_) => serde_json::from_value::<FactPack>(value)?.facts,
        other => return Err(format!("{}: expected an array of facts, got {other}", path.display()).into()),
    };
    tracing::debug!(path = %path.display(), facts = facts.len(), "Corpus loaded");
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::ContentKind;
    use serde_json::json;
    use std::io::Write;

    fn args() -> RequestArgs {
        RequestArgs {
            request: None,
            kind: Some(ContentKind::Spell),
            prompt: Some("A spell of binding ash".into()),
            title: None,
            param: vec!["limit=5".into(), "tone=grim".into(), "seed={\"level\": 3}".into()],
        }
    }

    #[test]
    fn params_are_json_when_possible() {
        let request = build_request(&args()).unwrap();
        assert_eq!(request.kind, ContentKind::Spell);
        assert_eq!(request.params["prompt"], "A spell of binding ash");
        assert_eq!(request.params["limit"], 5);
        assert_eq!(request.params["tone"], "grim");
        assert_eq!(request.params["seed"], json!({"level": 3}));
    }

    #[test]
    fn malformed_param_is_rejected() {
        assert!(parse_param("no-equals-sign").is_err());
        assert!(parse_param("=value").is_err());
        assert_eq!(parse_param("a=b=c").unwrap().1, "b=c");
    }

    #[test]
    fn kind_is_required_without_a_file() {
        let args = RequestArgs {
            kind: None,
            ..args()
        };
        assert!(build_request(&args).is_err());
    }

    #[test]
    fn corpus_accepts_array_or_pack() {
        let mut array = tempfile::NamedTempFile::new().unwrap();
        write!(array, r#"[{{"id": "f1", "text": "Ash falls."}}]"#).unwrap();
        assert_eq!(load_corpus(Some(array.path())).unwrap().len(), 1);

        let mut pack = tempfile::NamedTempFile::new().unwrap();
        write!(pack, r#"{{"facts": [{{"id": "f1", "text": "a"}}, {{"id": "f2", "text": "b"}}]}}"#).unwrap();
        assert_eq!(load_corpus(Some(pack.path())).unwrap().len(), 2);

        assert!(load_corpus(None).unwrap().is_empty());
    }
}
