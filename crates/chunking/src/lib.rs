//! Chunk planning for Lorekeep generation exchanges.
//!
//! One exchange with the generation process must never exceed a hard
//! character budget. The [`ChunkPlanner`] decides what fits in a single
//! exchange; the [`ChunkSession`] drives a sequence of exchanges, carrying
//! decisions and open questions forward, and folds the partial replies
//! together at the end.
//!
//! # Payload layout
//!
//! | Section | Source | Trim strategy |
//! |---------|--------|---------------|
//! | System | instructions | Never trimmed |
//! | Request | base payload | Never trimmed |
//! | Chunk directive | fixed text | Never trimmed |
//! | Decisions | carried forward | Oldest dropped first |
//! | Open questions | carried forward | Latest raised deferred first |
//! | Facts | fact pack, by rank | Deferred to the next chunk |

pub mod planner;
pub mod session;
pub mod size;

pub use planner::{
    BudgetDiagnostic, ChunkBudget, ChunkPlan, ChunkPlanner, DropInfo, PlanError, PlanInput, ResidualPlan,
    SectionStats,
};
pub use session::{ChunkContribution, ChunkSession, ChunkState, SessionError, SubmitOutcome};
