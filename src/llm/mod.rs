//! LLM integration for vignette.
//!
//! Everything the engine asks of a language model goes through the
//! [`LanguageBackend`] trait: variable elicitation, agent assembly, the
//! interaction turns themselves, and survey parsing. Backends are
//! constructed once at startup through [`create_backend`] and shared as
//! `Arc<dyn LanguageBackend>`.
//!
//! # Structured output
//!
//! Collaborating models answer in JSON. The [`structured`] submodule owns
//! the parse pipeline: candidate extraction from mixed prose, lowercase
//! normalization, and a bounded repair loop that sends broken JSON back to
//! the model before giving up. Call sites that must tolerate a flaky
//! answer wrap themselves in [`structured::with_retry`].
//!
//! ```ignore
//! use vignette::llm::{create_backend, BackendSpec, Message, GenerationRequest};
//!
//! let spec = BackendSpec::new("openrouter", "anthropic/claude-opus-4.5");
//! let backend = create_backend(&spec)?;
//! let request = spec.request("Propose three outcomes for this scenario.");
//! let response = backend.generate(request).await?;
//! ```

pub mod backend;
pub mod openai;
pub mod structured;

pub use backend::{
    create_backend, supported_families, BackendSpec, GenerationRequest, GenerationResponse,
    LanguageBackend, Message, ScriptedBackend,
};
pub use openai::OpenAiBackend;
pub use structured::{
    ask_structured, de_string, de_string_list, de_string_map, extract_json, parse_structured,
    with_retry, ASK_ATTEMPTS, REPAIR_ROUNDS,
};
