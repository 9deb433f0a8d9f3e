//! Error types for vignette operations.
//!
//! Defines error types for all major subsystems:
//! - LLM backend interactions and structured-output parsing
//! - Prompt template rendering
//! - Causal graph construction and editing
//! - Combination expansion and subsampling
//! - Survey collection and aggregation
//! - Persisted-state encoding and decoding

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: VIGNETTE_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: VIGNETTE_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("Family '{0}' is not supported")]
    UnsupportedFamily(String),

    #[error("Model '{model}' is not supported for the '{family}' family")]
    UnsupportedModel { family: String, model: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether retrying the same call can plausibly change the outcome.
    /// Only structured-output parse failures qualify; transport and
    /// configuration errors surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::ParseError(_))
    }
}

/// Errors that can occur during prompt template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error("Failed to render template '{name}': {message}")]
    Render { name: String, message: String },

    #[error("Invalid template name '{0}': must be non-empty and contain only alphanumeric characters, hyphens, and underscores")]
    InvalidTemplateName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while building or editing the causal graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Nominal variable '{0}' is not supported: pick a variable with some order (continuous, count, binary, or ordinal)")]
    NominalUnsupported(String),

    #[error("Variable '{0}' not found in graph")]
    UnknownVariable(String),

    #[error("Cause '{cause}' of '{child}' repeats a variable already in the graph; aborting to avoid a cause cycle")]
    RepeatedCause { cause: String, child: String },

    #[error("Cannot remove '{variable}': still referenced as a cause by '{referenced_by}'")]
    DanglingCause {
        variable: String,
        referenced_by: String,
    },

    #[error("Cannot edit variation values for {variable_type} variable '{variable}': its levels carry meaning")]
    VariationNotEditable {
        variable: String,
        variable_type: String,
    },

    #[error("Unknown variable type '{0}': expected continuous, count, binary, ordinal, or nominal")]
    UnknownVariableType(String),

    #[error("Variable '{0}' has no attribute variation to edit")]
    MissingVariation(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while expanding or sampling combinations.
#[derive(Debug, Error)]
pub enum CombinationError {
    #[error("Subsample proportion {0} must be greater than 0 and at most 1")]
    ProportionOutOfRange(f64),

    #[error("Variation space names role '{0}' that has no base agent")]
    UnknownRole(String),
}

/// Errors that can occur during survey collection and aggregation.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("Unknown aggregation method '{0}': expected average, sum, max, min, or mode")]
    UnknownAggregation(String),

    #[error("Variable '{0}' not found in measurement set")]
    UnknownVariable(String),

    #[error("Variable '{0}' has no measurement questions")]
    MissingQuestions(String),

    #[error("A question for '{variable}' names respondent '{respondent}', who is not in the roster")]
    UnknownRespondent {
        variable: String,
        respondent: String,
    },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Errors that can occur while encoding or decoding persisted state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Class '{0}' not found in type registry")]
    UnknownClass(String),

    #[error("Missing field '{field}' while decoding '{class}'")]
    MissingField { class: String, field: String },

    #[error("Field '{field}' of '{class}' has the wrong type: expected {expected}")]
    WrongType {
        class: String,
        field: String,
        expected: &'static str,
    },

    #[error("Invalid persisted envelope: {0}")]
    InvalidEnvelope(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
