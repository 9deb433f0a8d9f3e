//! Error types for agent assembly and instantiation.

use thiserror::Error;

use crate::error::{LlmError, TemplateError};

/// Errors that can occur while assembling templates or instantiating
/// personas.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A template reached instantiation without one of the attributes a
    /// runnable persona needs (role marker, name marker, goal, or
    /// constraint).
    #[error("Agent '{role}' is missing required attribute '{attribute}'")]
    MissingAttribute { role: String, attribute: String },

    /// A role was requested that is not part of the roster.
    #[error("Role '{0}' is not in the roster")]
    UnknownRole(String),

    /// Error from the language backend.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Error rendering a prompt template.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
