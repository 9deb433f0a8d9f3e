//! Attribute assembly for a scenario's participants.
//!
//! [`AgentAttributeAssembler`] turns a built causal graph and a role list
//! into per-role attribute templates plus the [`VariationSpace`] the
//! combination expander enumerates. The pipeline runs in phases: varied
//! attributes are attached from the graph's exogenous nodes, every role
//! gets a goal and a constraint, background information is elicited and
//! converted to concrete attributes (with a corrective review round), the
//! profiles are reconciled against each other in shuffled order (twice,
//! since the first pass can introduce its own inconsistencies), and a
//! single naming call finalizes the markers.
//!
//! The assembler also answers the interaction-design question: which of
//! the scheduling policies fits the scenario, and the policy-specific
//! rotation order or central participant that goes with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agents::error::AgentResult;
use crate::agents::persona::{AgentTemplate, CONSTRAINT_KEY, GOAL_KEY, NAME_KEY, ROLE_KEY};
use crate::error::LlmError;
use crate::experiment::scheduler::{InteractionDesign, SchedulePolicy};
use crate::graph::{CausalGraph, VariationScope, Visibility};
use crate::llm::{
    ask_structured, de_string, de_string_list, de_string_map, parse_structured, with_retry,
    BackendSpec, LanguageBackend, ASK_ATTEMPTS,
};
use crate::prompts::PromptLibrary;

/// Consistency passes run over the assembled profiles.
pub const DEFAULT_CONSISTENCY_PASSES: usize = 2;

// =============================================================================
// Variation space
// =============================================================================

/// Every varied attribute with its candidate values, grouped by variable
/// and keyed by the roles that carry the attribute.
///
/// Entry order is variable discovery order; the combination expander's
/// enumeration order follows from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationSpace {
    entries: Vec<VariationEntry>,
}

/// One varied variable and the per-role attributes it drives.
///
/// `values` is the variable's own candidate list; a target's values may
/// differ textually (a public mirror renames and rephrases), so value
/// assignments are always read back from here, never from a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationEntry {
    pub variable: String,
    pub values: Vec<String>,
    pub targets: Vec<VariationTarget>,
}

/// One role's varied attribute and its candidate values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationTarget {
    pub role: String,
    pub attribute: String,
    pub values: Vec<String>,
}

impl VariationSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_entry(&mut self, entry: VariationEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[VariationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VariationEntry {
    /// Largest candidate-value count this variable offers anywhere: the
    /// radix of its index digit in the combination enumeration. Targets
    /// with shorter lists skip digits past their end rather than wrap.
    pub fn radix(&self) -> usize {
        self.targets
            .iter()
            .map(|target| target.values.len())
            .chain(std::iter::once(self.values.len()))
            .max()
            .unwrap_or(0)
    }
}

/// Everything agent assembly produces for one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledAgents {
    pub templates: Vec<AgentTemplate>,
    pub variation: VariationSpace,
}

// =============================================================================
// Assembler
// =============================================================================

/// Builds agent templates by querying the collaborating model.
pub struct AgentAttributeAssembler {
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    scenario: String,
    roles: Vec<String>,
    consistency_passes: usize,
    seed: u64,
}

impl AgentAttributeAssembler {
    pub fn new(
        backend: Arc<dyn LanguageBackend>,
        spec: BackendSpec,
        library: Arc<PromptLibrary>,
        scenario: impl Into<String>,
        roles: Vec<String>,
    ) -> Self {
        Self {
            backend,
            spec,
            library,
            scenario: scenario.into(),
            roles,
            consistency_passes: DEFAULT_CONSISTENCY_PASSES,
            seed: 0,
        }
    }

    /// Override the number of consistency passes.
    pub fn with_consistency_passes(mut self, consistency_passes: usize) -> Self {
        self.consistency_passes = consistency_passes;
        self
    }

    /// Seed for the shuffled visiting order of the consistency passes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Roles participating in the scenario.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Run the full assembly pipeline over the built graph.
    pub async fn assemble(&self, graph: &CausalGraph) -> AgentResult<AssembledAgents> {
        info!(roles = self.roles.len(), "assembling agent templates");
        let (mut templates, variation) = self.varied_attributes(graph);

        for template in &mut templates {
            let goal = self.goal(&template.role).await?;
            template.attributes.insert("goal".to_string(), goal);
        }
        for template in &mut templates {
            let goal = template
                .attributes
                .get("goal")
                .cloned()
                .unwrap_or_default();
            let constraint = self.constraint(&template.role, &goal).await?;
            template
                .attributes
                .insert("constraint".to_string(), constraint);
        }

        let mut info_lists = Vec::with_capacity(templates.len());
        for template in &templates {
            info_lists.push(self.necessary_info(&template.role).await?);
        }
        let mut necessary: Vec<BTreeMap<String, String>> = Vec::with_capacity(templates.len());
        for (template, info) in templates.iter_mut().zip(&info_lists) {
            let attributes = self.info_attributes(&template.role, info).await?;
            for (key, value) in &attributes {
                template.attributes.insert(key.clone(), value.clone());
            }
            necessary.push(attributes);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        for pass in 0..self.consistency_passes {
            self.reconcile(&mut templates, &mut necessary, &mut rng)
                .await?;
            debug!(pass = pass + 1, "consistency pass complete");
        }

        self.finalize(&mut templates).await?;
        Ok(AssembledAgents {
            templates,
            variation,
        })
    }

    /// Attach every exogenous variable's induced attribute to the roles
    /// it targets, recording the candidate values in the variation space.
    ///
    /// Three cases: the varied participant carries the attribute itself; a
    /// public individual attribute is mirrored, under its public name,
    /// onto every other role; a scenario-wide attribute lands on every
    /// role identically.
    fn varied_attributes(&self, graph: &CausalGraph) -> (Vec<AgentTemplate>, VariationSpace) {
        let mut templates: Vec<AgentTemplate> = self
            .roles
            .iter()
            .map(|role| AgentTemplate::new(role.as_str()))
            .collect();
        let mut space = VariationSpace::new();

        for node in graph.exogenous() {
            let Some(variation) = node.variation.as_ref() else {
                continue;
            };
            let mut targets = Vec::new();
            for template in &mut templates {
                if variation.varied_agent == template.role {
                    template
                        .attributes
                        .insert(variation.attribute_name.clone(), String::new());
                    targets.push(VariationTarget {
                        role: template.role.clone(),
                        attribute: variation.attribute_name.clone(),
                        values: variation.attribute_values.clone(),
                    });
                }

                if node.scope == Some(VariationScope::Individual)
                    && variation.varied_agent != template.role
                {
                    if let Some(visibility) = node.visibility.as_ref() {
                        if visibility.choice == Visibility::Public {
                            template
                                .attributes
                                .insert(visibility.public_name.clone(), String::new());
                            targets.push(VariationTarget {
                                role: template.role.clone(),
                                attribute: visibility.public_name.clone(),
                                values: visibility.public_values.clone(),
                            });
                        }
                    }
                }

                if node.scope == Some(VariationScope::Scenario) {
                    template
                        .attributes
                        .insert(variation.attribute_name.clone(), String::new());
                    targets.push(VariationTarget {
                        role: template.role.clone(),
                        attribute: variation.attribute_name.clone(),
                        values: variation.attribute_values.clone(),
                    });
                }
            }
            if !targets.is_empty() {
                space.push_entry(VariationEntry {
                    variable: node.name.clone(),
                    values: variation.attribute_values.clone(),
                    targets,
                });
            }
        }
        (templates, space)
    }

    async fn goal(&self, role: &str) -> AgentResult<String> {
        let mut context = self.base_context();
        context.insert("role", role);
        let reply: GoalReply = self.ask("agent_goal", &context).await?;
        Ok(reply.goal)
    }

    async fn constraint(&self, role: &str, goal: &str) -> AgentResult<String> {
        let mut context = self.base_context();
        context.insert("role", role);
        context.insert("goal", goal);
        let reply: ConstraintReply = self.ask("agent_constraint", &context).await?;
        Ok(reply.constraint)
    }

    async fn necessary_info(&self, role: &str) -> AgentResult<Vec<String>> {
        let mut context = self.base_context();
        context.insert("role", role);
        let reply: InfoReply = self.ask("necessary_info", &context).await?;
        Ok(reply.necessary_info)
    }

    /// Turn a role's background information into concrete attributes,
    /// with one corrective review round.
    async fn info_attributes(
        &self,
        role: &str,
        info: &[String],
    ) -> AgentResult<BTreeMap<String, String>> {
        let mut context = self.base_context();
        context.insert("role", role);
        context.insert("info", &info.join("; "));
        let reply: AttributesReply = self
            .ask_reviewed("info_to_attributes", &context, "attributes_review")
            .await?;
        Ok(reply.attributes)
    }

    /// One consistency pass: visit the roles in a shuffled order and, from
    /// the second onward, ask the collaborator to reconcile each profile
    /// against the profiles already reconciled this pass.
    async fn reconcile(
        &self,
        templates: &mut [AgentTemplate],
        necessary: &mut [BTreeMap<String, String>],
        rng: &mut ChaCha8Rng,
    ) -> AgentResult<()> {
        let mut visit: Vec<usize> = (0..templates.len()).collect();
        visit.shuffle(rng);

        for (position, &index) in visit.iter().enumerate().skip(1) {
            let role = templates[index].role.clone();
            let own = format_attributes(&necessary[index]);
            let priors = visit[..position]
                .iter()
                .map(|&prior| {
                    format!(
                        "{}: [{}]",
                        templates[prior].role,
                        format_attributes(&necessary[prior])
                    )
                })
                .collect::<Vec<_>>()
                .join(" | ");

            let mut context = self.base_context();
            context.insert("role", &role);
            context.insert("attributes", &own);
            context.insert("priors", &priors);

            let reply: AttributesReply = self.ask("check_info_mismatch", &context).await?;
            debug!(role = %role, corrected = reply.attributes.len(), "profile reconciled");
            for (key, value) in reply.attributes {
                templates[index].attributes.insert(key.clone(), value.clone());
                necessary[index].insert(key, value);
            }
        }
        Ok(())
    }

    /// Name every role in one call, then stamp the markers: name and role
    /// land under their marker keys, and goal/constraint move to their
    /// internal keys so the public projection withholds them.
    async fn finalize(&self, templates: &mut [AgentTemplate]) -> AgentResult<()> {
        let names = self.names(templates.len()).await?;
        for (template, name) in templates.iter_mut().zip(names) {
            template.attributes.insert(NAME_KEY.to_string(), name);
            template
                .attributes
                .insert(ROLE_KEY.to_string(), template.role.clone());
            for (from, to) in [("goal", GOAL_KEY), ("constraint", CONSTRAINT_KEY)] {
                if let Some(value) = template.attributes.remove(from) {
                    template.attributes.insert(to.to_string(), value);
                }
            }
        }
        Ok(())
    }

    /// One naming call for the whole roster, zipped with the roles by
    /// position. An answer with the wrong number of names is re-asked.
    async fn names(&self, expected: usize) -> AgentResult<Vec<String>> {
        let mut context = tera::Context::new();
        context.insert("roles", &self.roles.join(", "));
        let prompt = self.library.render("agent_names", &context)?;
        let names = with_retry(ASK_ATTEMPTS, || self.names_round(&prompt, expected)).await?;
        Ok(names)
    }

    async fn names_round(&self, prompt: &str, expected: usize) -> Result<Vec<String>, LlmError> {
        let reply: NamesReply = ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        if reply.names.len() != expected {
            return Err(LlmError::ParseError(format!(
                "expected {expected} names, got {}",
                reply.names.len()
            )));
        }
        Ok(reply.names)
    }

    // =========================================================================
    // Interaction design
    // =========================================================================

    /// Choose the turn-taking design: one query picks the schedule
    /// policy, then the policy-specific follow-ups fill in the rotation
    /// order and central participant. Policies with no natural order take
    /// the roster as given.
    pub async fn design_interaction(&self) -> AgentResult<InteractionDesign> {
        let context = self.base_context();
        let prompt = self.library.render("interaction_type", &context)?;
        let policy = with_retry(ASK_ATTEMPTS, || self.policy_round(&prompt)).await?;
        info!(%policy, "interaction policy chosen");

        match policy {
            SchedulePolicy::Ordered => {
                let prompt = self.library.render("speaking_order", &context)?;
                let order =
                    with_retry(ASK_ATTEMPTS, || self.order_round(&prompt, &self.roles)).await?;
                Ok(InteractionDesign {
                    policy,
                    order,
                    central_agent: None,
                })
            }
            SchedulePolicy::CenterOrdered => {
                let prompt = self.library.render("central_agent_with_order", &context)?;
                let (central, order) =
                    with_retry(ASK_ATTEMPTS, || self.central_with_order_round(&prompt)).await?;
                Ok(InteractionDesign {
                    policy,
                    order,
                    central_agent: Some(central),
                })
            }
            SchedulePolicy::CenterRandom => {
                let prompt = self.library.render("central_agent", &context)?;
                let central = with_retry(ASK_ATTEMPTS, || self.central_round(&prompt)).await?;
                Ok(InteractionDesign {
                    policy,
                    order: self.roles.clone(),
                    central_agent: Some(central),
                })
            }
            SchedulePolicy::Random
            | SchedulePolicy::OraclePrescriptive
            | SchedulePolicy::OraclePost => Ok(InteractionDesign {
                policy,
                order: self.roles.clone(),
                central_agent: None,
            }),
        }
    }

    async fn policy_round(&self, prompt: &str) -> Result<SchedulePolicy, LlmError> {
        let reply: InteractionTypeReply =
            ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        reply.interaction_type.parse().map_err(LlmError::ParseError)
    }

    async fn order_round(
        &self,
        prompt: &str,
        expected: &[String],
    ) -> Result<Vec<String>, LlmError> {
        let reply: OrderReply = ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        self.resolve_order(&reply.order, expected)
    }

    async fn central_round(&self, prompt: &str) -> Result<String, LlmError> {
        let reply: CentralReply = ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        self.match_role(&reply.central_agent).ok_or_else(|| {
            LlmError::ParseError(format!(
                "central agent '{}' is not one of the roles",
                reply.central_agent
            ))
        })
    }

    async fn central_with_order_round(
        &self,
        prompt: &str,
    ) -> Result<(String, Vec<String>), LlmError> {
        let reply: CentralWithOrderReply =
            ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        let central = self.match_role(&reply.central_agent).ok_or_else(|| {
            LlmError::ParseError(format!(
                "central agent '{}' is not one of the roles",
                reply.central_agent
            ))
        })?;
        let others: Vec<String> = self
            .roles
            .iter()
            .filter(|role| **role != central)
            .cloned()
            .collect();
        let order = self.resolve_order(&reply.order, &others)?;
        Ok((central, order))
    }

    /// Map a proposed order back onto canonical role spellings; it must
    /// cover `expected` exactly.
    fn resolve_order(
        &self,
        proposed: &[String],
        expected: &[String],
    ) -> Result<Vec<String>, LlmError> {
        let resolved: Vec<String> = proposed
            .iter()
            .filter_map(|entry| self.match_role(entry))
            .collect();
        let mut sorted = resolved.clone();
        sorted.sort();
        let mut wanted = expected.to_vec();
        wanted.sort();
        if sorted != wanted {
            return Err(LlmError::ParseError(format!(
                "speaking order {proposed:?} does not cover the roles {expected:?}"
            )));
        }
        Ok(resolved)
    }

    fn match_role(&self, candidate: &str) -> Option<String> {
        let wanted = candidate.trim();
        self.roles
            .iter()
            .find(|role| role.eq_ignore_ascii_case(wanted))
            .cloned()
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn base_context(&self) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("agents", &self.roles.join(", "));
        context
    }

    /// One prompt, parse the answer.
    async fn ask<T: serde::de::DeserializeOwned>(
        &self,
        template: &str,
        context: &tera::Context,
    ) -> AgentResult<T> {
        let prompt = self.library.render(template, context)?;
        let parsed = with_retry(ASK_ATTEMPTS, || {
            ask_structured::<T>(self.backend.as_ref(), &self.spec, &prompt)
        })
        .await?;
        Ok(parsed)
    }

    /// One prompt, then a corrective round-trip through `review`; the
    /// reviewed answer is the one parsed.
    async fn ask_reviewed<T: serde::de::DeserializeOwned>(
        &self,
        template: &str,
        context: &tera::Context,
        review: &str,
    ) -> AgentResult<T> {
        let prompt = self.library.render(template, context)?;
        let parsed = with_retry(ASK_ATTEMPTS, || self.reviewed_round::<T>(&prompt, review)).await?;
        Ok(parsed)
    }

    async fn reviewed_round<T: serde::de::DeserializeOwned>(
        &self,
        prompt: &str,
        review: &str,
    ) -> Result<T, LlmError> {
        let draft = self
            .backend
            .generate(self.spec.request(prompt))
            .await?
            .content;

        let mut review_context = tera::Context::new();
        review_context.insert("prompt", prompt);
        review_context.insert("response", &draft);
        let review_prompt = self
            .library
            .render(review, &review_context)
            .map_err(|e| LlmError::RequestFailed(format!("review prompt failed: {e}")))?;

        let answer = self
            .backend
            .generate(self.spec.request(review_prompt))
            .await?
            .content;
        parse_structured::<T>(self.backend.as_ref(), &self.spec, &answer).await
    }
}

fn format_attributes(attributes: &BTreeMap<String, String>) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Deserialize)]
struct GoalReply {
    #[serde(deserialize_with = "de_string")]
    goal: String,
}

#[derive(Debug, Deserialize)]
struct ConstraintReply {
    #[serde(deserialize_with = "de_string")]
    constraint: String,
}

#[derive(Debug, Deserialize)]
struct InfoReply {
    #[serde(deserialize_with = "de_string_list")]
    necessary_info: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AttributesReply {
    #[serde(deserialize_with = "de_string_map")]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NamesReply {
    #[serde(deserialize_with = "de_string_list")]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionTypeReply {
    #[serde(deserialize_with = "de_string")]
    interaction_type: String,
}

#[derive(Debug, Deserialize)]
struct OrderReply {
    #[serde(deserialize_with = "de_string_list")]
    order: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CentralReply {
    #[serde(deserialize_with = "de_string")]
    central_agent: String,
}

#[derive(Debug, Deserialize)]
struct CentralWithOrderReply {
    #[serde(deserialize_with = "de_string")]
    central_agent: String,
    #[serde(deserialize_with = "de_string_list")]
    order: Vec<String>,
}
