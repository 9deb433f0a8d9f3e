//! Experiment execution: from a variation space to a batch of surveyed runs.
//!
//! This module turns an assembled agent roster and its variation space into
//! concrete experiment cells and runs each one to a measured outcome.
//!
//! # Flow
//!
//! 1. **Expansion**: the variation space is enumerated into combinations,
//!    one per cell of the full factorial design, optionally subsampled.
//! 2. **Scheduling**: a policy decides who speaks next, from a fixed
//!    rotation up to a collaborator-judged pick.
//! 3. **Running**: the conversation plays out turn by turn until the
//!    participants judge it complete or the turn budget runs out.
//! 4. **Surveying**: every registered respondent is measured and each
//!    variable's answers are folded into one aggregate.
//!
//! Combinations run concurrently up to the configured parallelism; the
//! turns inside one conversation never do.

pub mod batch;
pub mod combinations;
pub mod config;
pub mod runner;
pub mod scheduler;

pub use batch::{
    artifact_path, AgentCheckpoint, BatchError, BatchExecutor, BatchReport, CombinationOutcome,
    CombinationReport, ExperimentBatch,
};
pub use combinations::{subsample, Combination, CombinationExpander};
pub use config::{ConfigError, ExperimentConfig};
pub use runner::{
    ConversationHistory, FinishReason, InteractionRunner, RunError, RunEvent, RunEventKind,
    DEFAULT_MAX_INTERACTIONS,
};
pub use scheduler::{InteractionDesign, SchedulePolicy, SpeakerScheduler};
