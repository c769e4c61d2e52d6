//! A validated, linearized stage ordering.

use crate::stage::Stage;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on '{dependency}', which does not run before it")]
    ForwardDependency { stage: String, dependency: String },
}

/// Stages in execution order. Every dependency is declared earlier in the
/// ordering, so the graph is acyclic by construction.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        let mut seen: HashSet<String> = HashSet::new();
        for stage in &stages {
            for dependency in stage.dependencies() {
                if !seen.contains(&dependency) {
                    return Err(PipelineError::ForwardDependency {
                        stage: stage.name().to_string(),
                        dependency,
                    });
                }
            }
            if !seen.insert(stage.name().to_string()) {
                return Err(PipelineError::DuplicateStage(stage.name().to_string()));
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.names()).finish()
    }
}
