//! Backend trait and request/response types for language-model calls.
//!
//! A [`BackendSpec`] names the (family, model) pair plus sampling defaults;
//! [`create_backend`] validates it against the supported-model table and
//! returns the matching client. All downstream code holds an
//! `Arc<dyn LanguageBackend>` and never sees concrete client types.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::openai::OpenAiBackend;

/// Model families the factory knows how to construct, with the models each
/// family accepts. An unknown family or model is rejected before any HTTP
/// client is built.
const SUPPORTED_MODELS: &[(&str, &[&str])] = &[
    (
        "openai",
        &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o3-mini"],
    ),
    (
        "openrouter",
        &[
            "anthropic/claude-opus-4.5",
            "anthropic/claude-sonnet-4.5",
            "openai/gpt-4o",
            "moonshotai/kimi-k2.5",
        ],
    ),
];

/// Default API base per family, overridable with `VIGNETTE_API_BASE`.
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature. Higher values are more random.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from an LLM generation request, flattened to the first choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Model that produced this response.
    pub model: String,
    /// Generated text.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
}

/// Trait for language-model backends that can generate text.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Identifies a backend and carries the sampling defaults every request
/// built from it inherits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Model family ("openai", "openrouter").
    pub family: String,
    /// Model identifier within the family.
    pub model: String,
    /// Sampling temperature applied to every request.
    pub temperature: f64,
    /// Optional generation cap applied to every request.
    pub max_tokens: Option<u32>,
    /// System prompt prepended to every request; empty means none.
    pub system_prompt: String,
}

impl BackendSpec {
    /// Create a spec with default sampling (temperature 1.0, no token cap,
    /// no system prompt).
    pub fn new(family: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            model: model.into(),
            temperature: 1.0,
            max_tokens: None,
            system_prompt: String::new(),
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the generation cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Check the (family, model) pair against the supported-model table.
    pub fn validate(&self) -> Result<(), LlmError> {
        let models = SUPPORTED_MODELS
            .iter()
            .find(|(family, _)| *family == self.family)
            .map(|(_, models)| *models)
            .ok_or_else(|| LlmError::UnsupportedFamily(self.family.clone()))?;

        if !models.contains(&self.model.as_str()) {
            return Err(LlmError::UnsupportedModel {
                family: self.family.clone(),
                model: self.model.clone(),
            });
        }
        Ok(())
    }

    /// Build a request for a single user prompt, carrying this spec's
    /// system prompt and sampling defaults.
    pub fn request(&self, user_prompt: impl Into<String>) -> GenerationRequest {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.push(Message::user(user_prompt));

        let mut request =
            GenerationRequest::new(self.model.clone(), messages).with_temperature(self.temperature);
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

/// Families the factory accepts, for CLI help and error messages.
pub fn supported_families() -> Vec<&'static str> {
    SUPPORTED_MODELS.iter().map(|(family, _)| *family).collect()
}

/// Construct the backend a spec names.
///
/// Validates the (family, model) pair first, then builds the HTTP client
/// for the family's API base. `VIGNETTE_API_BASE` overrides the default
/// base for either family.
pub fn create_backend(spec: &BackendSpec) -> Result<Arc<dyn LanguageBackend>, LlmError> {
    spec.validate()?;

    let default_base = match spec.family.as_str() {
        "openai" => OPENAI_API_BASE,
        "openrouter" => OPENROUTER_API_BASE,
        other => return Err(LlmError::UnsupportedFamily(other.to_string())),
    };

    let backend = OpenAiBackend::from_env(default_base)?;
    Ok(Arc::new(backend))
}

/// Backend that replays a queue of canned responses.
///
/// Used by the test suites and by dry runs that exercise the pipeline
/// without network access. Calls beyond the queue fail with a request
/// error naming the call count.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Create a scripted backend that answers with `responses` in order.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Append a response to the end of the queue.
    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response.into());
        }
    }

    /// Number of generate calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageBackend for ScriptedBackend {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());

        match next {
            Some(content) => Ok(GenerationResponse {
                model: "scripted".to_string(),
                content,
                usage: TokenUsage::default(),
            }),
            None => Err(LlmError::RequestFailed(format!(
                "scripted backend exhausted after {} calls",
                call - 1
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are a participant.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content, "You are a participant.");

        let user = Message::user("Hello");
        assert_eq!(user.role, "user");

        let assistant = Message::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("gpt-4o", vec![Message::user("test")])
            .with_temperature(0.7)
            .with_max_tokens(1000);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[test]
    fn test_spec_validate_accepts_known_pair() {
        let spec = BackendSpec::new("openai", "gpt-4o");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_spec_validate_rejects_unknown_family() {
        let spec = BackendSpec::new("acme", "gpt-4o");
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedFamily(f) if f == "acme"));
    }

    #[test]
    fn test_spec_validate_rejects_unknown_model() {
        let spec = BackendSpec::new("openai", "gpt-2");
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedModel { .. }));
        assert!(err.to_string().contains("gpt-2"));
    }

    #[test]
    fn test_spec_request_includes_system_prompt_when_set() {
        let spec = BackendSpec::new("openai", "gpt-4o")
            .with_system_prompt("You are an experiment designer.")
            .with_temperature(0.3)
            .with_max_tokens(800);

        let request = spec.request("Design a study.");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(800));

        let bare = BackendSpec::new("openai", "gpt-4o").request("Hello");
        assert_eq!(bare.messages.len(), 1);
        assert_eq!(bare.messages[0].role, "user");
    }

    #[test]
    fn test_supported_families_lists_both() {
        let families = supported_families();
        assert!(families.contains(&"openai"));
        assert!(families.contains(&"openrouter"));
    }

    #[tokio::test]
    async fn test_scripted_backend_replays_in_order() {
        let backend = ScriptedBackend::new(["first", "second"]);

        let a = backend
            .generate(GenerationRequest::new("m", vec![Message::user("q")]))
            .await
            .unwrap();
        assert_eq!(a.content, "first");

        let b = backend
            .generate(GenerationRequest::new("m", vec![Message::user("q")]))
            .await
            .unwrap();
        assert_eq!(b.content, "second");
        assert_eq!(backend.calls(), 2);

        let err = backend
            .generate(GenerationRequest::new("m", vec![Message::user("q")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn test_scripted_backend_push_extends_queue() {
        let backend = ScriptedBackend::new(Vec::<String>::new());
        backend.push("late answer");

        let response = backend
            .generate(GenerationRequest::new("m", vec![Message::user("q")]))
            .await
            .unwrap();
        assert_eq!(response.content, "late answer");
    }
}
