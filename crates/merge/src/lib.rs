//! Merge engine for Lorekeep.
//!
//! Reconciles partial outputs of one logical entity into a single object,
//! recording a [`MergeConflict`](lorekeep_core::MergeConflict) for every
//! field where contributors disagreed.

pub mod engine;
pub mod value;

pub use engine::{Contribution, MergeEngine, PROPOSALS_FIELD};
pub use value::{is_primitive, question_key, record_key, structural_eq};
