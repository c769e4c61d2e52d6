//! # Lorekeep Core
//!
//! Domain types, traits, and error definitions for the Lorekeep content
//! generation pipeline. This crate has **no engine dependencies**; it
//! defines the model that the store, merge, chunking, guard, and pipeline
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`RunStore`]: run/artifact persistence
//! - [`FactRetriever`]: grounding fact retrieval
//! - [`ExchangeClient`]: the opaque text-generation exchange
//!
//! Implementations live in their respective crates (or in the caller), so
//! every component can be exercised against in-memory stand-ins.

pub mod artifact;
pub mod content;
pub mod error;
pub mod event;
pub mod exchange;
pub mod proposal;
pub mod provenance;
pub mod registry;
pub mod retrieval;
pub mod run;
pub mod store;
pub mod wire;

// Re-export key types at crate root for ergonomics
pub use artifact::{
    Artifact, ArtifactId, ArtifactKind, ArtifactPayload, Brief, Canonical, Draft, DraftArtifact,
    GuardResult, PayloadError, Provenance, RESERVED_DRAFT_KEYS,
};
pub use content::ContentKind;
pub use error::{Error, ExchangeError, RetrievalError, Result, StoreError};
pub use event::{EventBus, PipelineEvent};
pub use exchange::{ChunkReply, ExchangeClient};
pub use proposal::{Decision, Proposal, normalize_key};
pub use provenance::{ContributedValue, MergeConflict, MergeResult, ResolutionStrategy};
pub use registry::{BoundRule, CapabilityBounds, LimiterVocabulary, Registry, VersionPolicy};
pub use retrieval::{Fact, FactPack, FactRetriever, RetrievalHints};
pub use run::{Run, RunId, RunRequest, RunStatus, RunUpdate, StageState, StageStatus};
pub use store::RunStore;
pub use wire::{WireDraft, WireProposal, to_domain, to_wire};
