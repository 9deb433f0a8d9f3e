//! vignette: automated social-science vignette experiments.
//!
//! This library elicits a causal model for a scenario from a collaborating
//! language model, assembles agent personas that vary along the model's
//! exogenous variables, plays their conversations out, and surveys the
//! outcomes.

// Core modules
pub mod agents;
pub mod cli;
pub mod error;
pub mod experiment;
pub mod graph;
pub mod llm;
pub mod prompts;
pub mod scenario;
pub mod state;
pub mod survey;

// Re-export commonly used error types
pub use error::{
    CombinationError, GraphError, LlmError, StateError, SurveyError, TemplateError,
};
