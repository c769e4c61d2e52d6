//! The stage orchestrator: drives a content run through its stages.
//!
//! A run moves through a fixed, validated ordering of stages:
//!
//! 1. **planner** turns the request into a Brief
//! 2. **retriever** gathers grounding facts
//! 3. **creator** generates the draft, chunked to the exchange budget
//! 4. **guards** check the draft and may halt the run
//! 5. **finalizer** reconciles everything into the canonical entity
//!
//! Every stage result is persisted as an artifact, so a run can be driven
//! again and picks up after its last completed stage.

pub mod orchestrator;
pub mod pipeline;
pub mod stage;
pub mod stages;

pub use orchestrator::{Orchestrator, OrchestratorError, RunReport, StageReport};
pub use pipeline::{Pipeline, PipelineError};
pub use stage::{RunContext, Stage, StageError, StageInputs, StageOutput};
pub use stages::{
    CREATOR, CreatorSettings, CreatorStage, DEFAULT_SYSTEM_INSTRUCTIONS, FINALIZER, FinalizerStage, GuardStage, PLANNER,
    PlannerStage, RETRIEVER, RetrieverStage, StaticFactRetriever, default_pipeline,
};
