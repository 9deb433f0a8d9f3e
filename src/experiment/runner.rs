//! The conversation loop for one combination.
//!
//! [`InteractionRunner`] drives a roster of personas through a scheduled
//! conversation: an opening statement, then a turn per scheduler pick
//! until the participant who just spoke judges the conversation complete
//! or the turn budget runs out. Statements are recorded under the
//! speaker's name, the way the other participants experience them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agents::{render_history, AgentRoster, Persona, Statement};
use crate::error::{LlmError, TemplateError};
use crate::experiment::scheduler::{SchedulePolicy, SpeakerScheduler};
use crate::llm::{BackendSpec, LanguageBackend};
use crate::prompts::PromptLibrary;

/// Statements allowed per conversation when the caller does not say.
pub const DEFAULT_MAX_INTERACTIONS: usize = 20;

/// Errors raised while scheduling speakers or running a conversation.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("A conversation needs at least two participants, got {0}")]
    TooFewParticipants(usize),

    #[error("The rotation order is empty")]
    EmptyRotation,

    #[error("Policy '{0}' designates no central participant")]
    MissingCentralAgent(SchedulePolicy),

    #[error("Scheduled speaker '{0}' is not in the roster")]
    UnknownSpeaker(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Why a conversation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The participant who just spoke judged the conversation complete.
    JudgedComplete,
    /// The statement budget ran out.
    TurnBudget,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::JudgedComplete => f.write_str("judged_complete"),
            FinishReason::TurnBudget => f.write_str("turn_budget"),
        }
    }
}

/// A finished conversation: the transcript plus why it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub statements: Vec<Statement>,
    pub reason: FinishReason,
}

// =============================================================================
// Run events
// =============================================================================

/// One timestamped progress event, for callers that watch a run live.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEventKind {
    StatementMade {
        speaker: String,
        round: usize,
        text: String,
    },
    JudgmentMade {
        judge: String,
        proceed: bool,
    },
    RunFinished {
        statements: usize,
        reason: FinishReason,
    },
}

impl RunEvent {
    fn statement(speaker: impl Into<String>, round: usize, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: RunEventKind::StatementMade {
                speaker: speaker.into(),
                round,
                text: text.into(),
            },
        }
    }

    fn judgment(judge: impl Into<String>, proceed: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: RunEventKind::JudgmentMade {
                judge: judge.into(),
                proceed,
            },
        }
    }

    fn finished(statements: usize, reason: FinishReason) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: RunEventKind::RunFinished { statements, reason },
        }
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Runs one conversation over a fixed roster.
pub struct InteractionRunner {
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    scenario: String,
    roster: Arc<AgentRoster>,
    max_interactions: usize,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl InteractionRunner {
    pub fn new(
        backend: Arc<dyn LanguageBackend>,
        spec: BackendSpec,
        library: Arc<PromptLibrary>,
        scenario: impl Into<String>,
        roster: Arc<AgentRoster>,
    ) -> Self {
        Self {
            backend,
            spec,
            library,
            scenario: scenario.into(),
            roster,
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            events: None,
        }
    }

    pub fn with_max_interactions(mut self, max_interactions: usize) -> Self {
        self.max_interactions = max_interactions;
        self
    }

    /// Stream progress events to `sender`. A dropped receiver is ignored;
    /// the run itself never depends on the watcher.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Run the conversation to completion.
    ///
    /// The opening speaker and the one on deck are both drawn before
    /// anyone talks. After each statement the next speaker is drawn, then
    /// the participant who just spoke judges whether to go on; the budget
    /// check comes after the judgment, so a final verdict is always
    /// collected.
    pub async fn run(&self, scheduler: &mut SpeakerScheduler) -> Result<ConversationHistory, RunError> {
        if self.roster.len() < 2 {
            return Err(RunError::TooFewParticipants(self.roster.len()));
        }

        let mut history: Vec<Statement> = Vec::new();
        let mut speaker = scheduler.next_speaker(&history).await?;
        let mut on_deck = scheduler.next_speaker(&history).await?;

        let opener = self.persona(&speaker)?;
        let text = self
            .statement(opener, 0, self.max_interactions, &history)
            .await?;
        history.push(Statement::new(opener.name(), text.clone()));
        self.emit(RunEvent::statement(opener.name(), 0, text));

        let mut interactions = 0usize;
        let reason = loop {
            interactions += 1;
            let n_left = self.max_interactions.saturating_sub(interactions);

            let persona = self.persona(&on_deck)?;
            let text = self.statement(persona, interactions, n_left, &history).await?;
            history.push(Statement::new(persona.name(), text.clone()));
            self.emit(RunEvent::statement(persona.name(), interactions, text));

            speaker = on_deck;
            on_deck = scheduler.next_speaker(&history).await?;

            let proceed = self.judge(&speaker, &history).await?;
            self.emit(RunEvent::judgment(self.persona(&speaker)?.name(), proceed));
            if !proceed {
                break FinishReason::JudgedComplete;
            }
            if interactions >= self.max_interactions.saturating_sub(1) {
                break FinishReason::TurnBudget;
            }
        };

        self.emit(RunEvent::finished(history.len(), reason));
        info!(statements = history.len(), %reason, "conversation finished");
        Ok(ConversationHistory {
            statements: history,
            reason,
        })
    }

    fn persona(&self, role: &str) -> Result<&Persona, RunError> {
        self.roster
            .get(role)
            .ok_or_else(|| RunError::UnknownSpeaker(role.to_string()))
    }

    /// One statement from `persona`. The participant sees everyone but
    /// themselves in the roster line, and the full transcript inside
    /// their own context.
    async fn statement(
        &self,
        persona: &Persona,
        round: usize,
        n_left: usize,
        history: &[Statement],
    ) -> Result<String, RunError> {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("round", &round);
        context.insert("n_left", &n_left);
        context.insert(
            "group_knowledge",
            &self.roster.group_knowledge_excluding(persona.role()),
        );
        context.insert("context", &persona.current_context(history));
        let prompt = self.library.render("statement", &context)?;
        let reply = self
            .backend
            .generate(self.spec.request(prompt))
            .await?
            .content;
        Ok(reply.trim().to_string())
    }

    /// Whether the conversation should go on, judged from the transcript.
    /// The verdict is read as a substring test for "continue" on the raw
    /// reply rather than a strict parse; a malformed answer ends the run
    /// rather than aborting it.
    async fn judge(&self, role: &str, history: &[Statement]) -> Result<bool, RunError> {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("group_knowledge", &self.roster.group_knowledge());
        context.insert("history", &render_history(history));
        let prompt = self.library.render("continue_or_finish", &context)?;
        let reply = self
            .backend
            .generate(self.spec.request(prompt))
            .await?
            .content;
        let proceed = reply.to_lowercase().contains("continue");
        debug!(judge = %role, proceed, "continuation judged");
        Ok(proceed)
    }

    fn emit(&self, event: RunEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}
