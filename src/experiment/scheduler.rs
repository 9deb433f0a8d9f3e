//! Speaker scheduling: who talks next.
//!
//! A [`SpeakerScheduler`] is a step function over the conversation so far.
//! The six policies split into three families: fixed rotations (`ordered`,
//! `random`), hub-and-spoke rotations where a central participant takes
//! every other turn (`center_ordered`, `center_random`), and oracle
//! policies that put the choice to an outside reader of the transcript
//! each turn (`oracle_prescriptive`, `oracle_post`). The post-hoc oracle
//! additionally collects every participant's private thoughts before it
//! picks, and those thoughts persist across turns so later rounds see
//! where everyone stood.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::{render_history, AgentRoster, Statement};
use crate::error::LlmError;
use crate::experiment::runner::RunError;
use crate::llm::{
    ask_structured, de_string, with_retry, BackendSpec, LanguageBackend, ASK_ATTEMPTS,
};
use crate::prompts::PromptLibrary;

// =============================================================================
// Policy and design
// =============================================================================

/// The six turn-taking policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    Ordered,
    Random,
    CenterOrdered,
    CenterRandom,
    OraclePrescriptive,
    OraclePost,
}

impl SchedulePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePolicy::Ordered => "ordered",
            SchedulePolicy::Random => "random",
            SchedulePolicy::CenterOrdered => "center_ordered",
            SchedulePolicy::CenterRandom => "center_random",
            SchedulePolicy::OraclePrescriptive => "oracle_prescriptive",
            SchedulePolicy::OraclePost => "oracle_post",
        }
    }
}

impl fmt::Display for SchedulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulePolicy {
    type Err = String;

    /// Accepts the snake_case tokens the policy prompt offers, plus the
    /// spaced and hyphenated spellings models drift into.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "ordered" => Ok(SchedulePolicy::Ordered),
            "random" => Ok(SchedulePolicy::Random),
            "center_ordered" => Ok(SchedulePolicy::CenterOrdered),
            "center_random" => Ok(SchedulePolicy::CenterRandom),
            "oracle_prescriptive" => Ok(SchedulePolicy::OraclePrescriptive),
            "oracle_post" => Ok(SchedulePolicy::OraclePost),
            other => Err(format!("unknown interaction policy '{other}'")),
        }
    }
}

/// A chosen policy plus the policy-specific pieces: the rotation order
/// (the full roster for policies without a natural order) and the central
/// participant for the hub-and-spoke policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionDesign {
    pub policy: SchedulePolicy,
    pub order: Vec<String>,
    pub central_agent: Option<String>,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Stateful next-speaker step function for one conversation.
///
/// Rotation position, the center/other alternation bit, and gathered
/// thoughts all live here, so a fresh scheduler per conversation is
/// required.
pub struct SpeakerScheduler {
    design: InteractionDesign,
    roster: Arc<AgentRoster>,
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    scenario: String,
    rng: ChaCha8Rng,
    cursor: usize,
    central_turn: bool,
    /// Rotation pool for `center_random`: the order minus the central
    /// participant, fixed at construction.
    others: Vec<String>,
    /// Latest private thought per participant name, kept across turns.
    thoughts: BTreeMap<String, String>,
}

impl SpeakerScheduler {
    pub fn new(
        design: InteractionDesign,
        roster: Arc<AgentRoster>,
        backend: Arc<dyn LanguageBackend>,
        spec: BackendSpec,
        library: Arc<PromptLibrary>,
        scenario: impl Into<String>,
    ) -> Self {
        let others = design
            .order
            .iter()
            .filter(|role| Some(role.as_str()) != design.central_agent.as_deref())
            .cloned()
            .collect();
        Self {
            design,
            roster,
            backend,
            spec,
            library,
            scenario: scenario.into(),
            rng: ChaCha8Rng::seed_from_u64(0),
            cursor: 0,
            central_turn: true,
            others,
            thoughts: BTreeMap::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn design(&self) -> &InteractionDesign {
        &self.design
    }

    /// Pick the role that speaks next given the transcript so far.
    pub async fn next_speaker(&mut self, history: &[Statement]) -> Result<String, RunError> {
        let role = match self.design.policy {
            SchedulePolicy::Ordered => self.next_in_rotation()?,
            SchedulePolicy::Random => self
                .design
                .order
                .choose(&mut self.rng)
                .cloned()
                .ok_or(RunError::EmptyRotation)?,
            SchedulePolicy::CenterOrdered => {
                let take_central = self.central_turn || self.design.order.is_empty();
                self.central_turn = !self.central_turn;
                if take_central {
                    self.central()?
                } else {
                    self.next_in_rotation()?
                }
            }
            SchedulePolicy::CenterRandom => {
                let take_central = self.central_turn || self.others.is_empty();
                self.central_turn = !self.central_turn;
                if take_central {
                    self.central()?
                } else {
                    self.others
                        .choose(&mut self.rng)
                        .cloned()
                        .ok_or(RunError::EmptyRotation)?
                }
            }
            SchedulePolicy::OraclePrescriptive => {
                self.oracle_pick("oracle_prescriptive", history, None).await?
            }
            SchedulePolicy::OraclePost => {
                self.gather_thoughts(history).await?;
                let thoughts = self.format_thoughts();
                self.oracle_pick("oracle_post", history, Some(&thoughts))
                    .await?
            }
        };
        debug!(policy = %self.design.policy, speaker = %role, "next speaker");
        Ok(role)
    }

    fn next_in_rotation(&mut self) -> Result<String, RunError> {
        if self.design.order.is_empty() {
            return Err(RunError::EmptyRotation);
        }
        let role = self.design.order[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.design.order.len();
        Ok(role)
    }

    fn central(&self) -> Result<String, RunError> {
        self.design
            .central_agent
            .clone()
            .ok_or(RunError::MissingCentralAgent(self.design.policy))
    }

    /// Ask every participant for their current private thought, in roster
    /// order. Each participant sees the thoughts gathered before theirs,
    /// including last round's entries not yet overwritten.
    async fn gather_thoughts(&mut self, history: &[Statement]) -> Result<(), RunError> {
        let roster = Arc::clone(&self.roster);
        for persona in roster.personas() {
            let mut context = tera::Context::new();
            context.insert("name", persona.name());
            context.insert("role", persona.role());
            context.insert("scenario", &self.scenario);
            context.insert("history", &render_history(history));
            context.insert("responses", &self.format_thoughts());
            context.insert("agents", &roster.group_knowledge());
            let prompt = self.library.render("agent_thoughts", &context)?;
            let thought = self
                .backend
                .generate(self.spec.request(prompt))
                .await?
                .content;
            self.thoughts
                .insert(persona.name().to_string(), thought.trim().to_string());
        }
        Ok(())
    }

    fn format_thoughts(&self) -> String {
        self.thoughts
            .iter()
            .map(|(name, thought)| format!("{name}: {thought}"))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// One oracle query; an answer naming a role outside the roster is
    /// re-asked.
    async fn oracle_pick(
        &self,
        template: &str,
        history: &[Statement],
        thoughts: Option<&str>,
    ) -> Result<String, RunError> {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("history", &render_history(history));
        context.insert("agents", &self.roster.group_knowledge());
        if let Some(thoughts) = thoughts {
            context.insert("thoughts", thoughts);
        }
        let prompt = self.library.render(template, &context)?;
        let role = with_retry(ASK_ATTEMPTS, || self.pick_round(&prompt)).await?;
        Ok(role)
    }

    async fn pick_round(&self, prompt: &str) -> Result<String, LlmError> {
        let reply: NextAgentReply = ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        let wanted = reply.choice_of_next_agent.trim();
        self.roster
            .personas()
            .iter()
            .map(|persona| persona.role())
            .find(|role| role.eq_ignore_ascii_case(wanted))
            .map(str::to_string)
            .ok_or_else(|| {
                LlmError::ParseError(format!(
                    "next speaker '{wanted}' is not one of the participants"
                ))
            })
    }
}

#[derive(Debug, Deserialize)]
struct NextAgentReply {
    #[serde(deserialize_with = "de_string")]
    choice_of_next_agent: String,
}
