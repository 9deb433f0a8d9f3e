//! Scenario intake and proposal queries.
//!
//! A scenario arrives either as a YAML spec file or as a bare description
//! on the command line. The proposer fills in whatever the file leaves
//! out: the individual human participants, and candidate outcomes worth
//! measuring.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{LlmError, TemplateError};
use crate::llm::{
    ask_structured, de_string_list, with_retry, BackendSpec, LanguageBackend, ASK_ATTEMPTS,
};
use crate::prompts::PromptLibrary;

/// Errors from scenario intake and proposal queries.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Spec file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Spec file is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A scenario needs a description.
    #[error("The scenario description is empty")]
    EmptyDescription,

    /// LLM call failed or kept returning malformed output.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Prompt rendering failed.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// A scenario as the CLI accepts it: a description, plus optional
/// participants and an optional outcome that skip the corresponding
/// proposal queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub description: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl ScenarioSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            roles: Vec::new(),
            outcome: None,
        }
    }

    /// Parse a YAML spec. Roles are lowercased so they line up with the
    /// role identifiers structured replies carry.
    pub fn from_yaml(raw: &str) -> Result<Self, ScenarioError> {
        let spec: ScenarioSpec = serde_yaml::from_str(raw)?;
        let description = spec.description.trim().to_string();
        if description.is_empty() {
            return Err(ScenarioError::EmptyDescription);
        }
        Ok(Self {
            description,
            roles: spec
                .roles
                .iter()
                .map(|role| role.trim().to_lowercase())
                .filter(|role| !role.is_empty())
                .collect(),
            outcome: spec
                .outcome
                .map(|outcome| outcome.trim().to_string())
                .filter(|outcome| !outcome.is_empty()),
        })
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }
}

/// Proposes participants and measurable outcomes for a scenario.
pub struct ScenarioProposer {
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    scenario: String,
}

impl ScenarioProposer {
    pub fn new(
        backend: Arc<dyn LanguageBackend>,
        spec: BackendSpec,
        library: Arc<PromptLibrary>,
        scenario: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            spec,
            library,
            scenario: scenario.into(),
        }
    }

    /// The individual human participants the scenario needs, one singular
    /// role each.
    pub async fn propose_roles(&self) -> Result<Vec<String>, ScenarioError> {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        let prompt = self.library.render("propose_actors", &context)?;
        let roles = with_retry(ASK_ATTEMPTS, || self.roles_round(&prompt)).await?;
        info!(roles = roles.len(), "proposed participants");
        Ok(roles)
    }

    /// Candidate outcomes worth measuring, exactly `count` of them. The
    /// first query yields an initial list; follow-up queries seeded with
    /// the outcomes so far extend it until the count is reached.
    pub async fn propose_outcomes(
        &self,
        roles: &[String],
        count: usize,
    ) -> Result<Vec<String>, ScenarioError> {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("agents", &roles.join(", "));
        let prompt = self.library.render("propose_outcomes", &context)?;
        let mut outcomes = with_retry(ASK_ATTEMPTS, || self.outcomes_round(&prompt)).await?;

        while outcomes.len() < count {
            let mut more_context = tera::Context::new();
            more_context.insert("scenario", &self.scenario);
            more_context.insert("agents", &roles.join(", "));
            more_context.insert("outcomes", &outcomes.join("; "));
            let more_prompt = self.library.render("propose_more_outcomes", &more_context)?;
            let more = with_retry(ASK_ATTEMPTS, || self.outcomes_round(&more_prompt)).await?;
            debug!(added = more.len(), "extended outcome list");
            outcomes.extend(more);
        }
        outcomes.truncate(count);
        Ok(outcomes)
    }

    async fn roles_round(&self, prompt: &str) -> Result<Vec<String>, LlmError> {
        let reply: ActorsReply = ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        let roles = trimmed(reply.agents);
        if roles.is_empty() {
            return Err(LlmError::ParseError("no participants proposed".to_string()));
        }
        Ok(roles)
    }

    async fn outcomes_round(&self, prompt: &str) -> Result<Vec<String>, LlmError> {
        let reply: OutcomesReply =
            ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        let outcomes = trimmed(reply.outcomes);
        if outcomes.is_empty() {
            return Err(LlmError::ParseError("no outcomes proposed".to_string()));
        }
        Ok(outcomes)
    }
}

fn trimmed(items: Vec<String>) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
struct ActorsReply {
    #[serde(deserialize_with = "de_string_list")]
    agents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OutcomesReply {
    #[serde(deserialize_with = "de_string_list")]
    outcomes: Vec<String>,
}
