//! Runs: one end-to-end generation request and its per-stage state.

use crate::artifact::ArtifactId;
use crate::content::ContentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique run identifier.
pub type RunId = String;

/// Overall run status. `Failed` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Per-stage status. `Ok` and `Fail` are terminal for one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Idle,
    Running,
    Ok,
    Fail,
}

impl StageStatus {
    pub const ALL: [StageStatus; 4] = [Self::Idle, Self::Running, Self::Ok, Self::Fail];
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Ok => "ok",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Recorded state of one stage within a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn running() -> Self {
        Self {
            status: StageStatus::Running,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn ok(self, artifact_id: ArtifactId, notes: Vec<String>) -> Self {
        Self {
            status: StageStatus::Ok,
            artifact_id: Some(artifact_id),
            error: None,
            notes,
            finished_at: Some(Utc::now()),
            ..self
        }
    }

    pub fn fail(self, error: impl Into<String>, notes: Vec<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            artifact_id: None,
            error: Some(error.into()),
            notes,
            finished_at: Some(Utc::now()),
            ..self
        }
    }
}

/// A request submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub kind: ContentKind,

    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RunRequest {
    pub fn new(kind: ContentKind) -> Self {
        Self {
            kind,
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One end-to-end generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub kind: ContentKind,

    #[serde(default)]
    pub params: Map<String, Value>,

    pub status: RunStatus,

    #[serde(default)]
    pub stages: BTreeMap<String, StageState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a queued run from a request.
    pub fn new(request: RunRequest) -> Self {
        let now = Utc::now();
        Self {
            id: format!("run_{}", Uuid::new_v4().simple()),
            kind: request.kind,
            params: request.params,
            status: RunStatus::Queued,
            stages: BTreeMap::new(),
            current_stage: None,
            failed_stage: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// State of a stage; stages never touched are `Idle`.
    pub fn stage(&self, name: &str) -> StageState {
        self.stages.get(name).cloned().unwrap_or_default()
    }

    pub fn stage_status(&self, name: &str) -> StageStatus {
        self.stages
            .get(name)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Apply a partial status update.
    pub fn apply(&mut self, update: &RunUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(stage) = &update.current_stage {
            self.current_stage = stage.clone();
        }
        if let Some(stage) = &update.failed_stage {
            self.failed_stage = stage.clone();
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// A partial update to a run's top-level status fields.
///
/// `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Option<String>>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn at_stage(mut self, stage: impl Into<String>) -> Self {
        self.current_stage = Some(Some(stage.into()));
        self
    }

    pub fn failed_at(mut self, stage: impl Into<String>, error: impl Into<String>) -> Self {
        self.failed_stage = Some(Some(stage.into()));
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_failure(mut self) -> Self {
        self.failed_stage = Some(None);
        self.error = Some(None);
        self
    }
}
