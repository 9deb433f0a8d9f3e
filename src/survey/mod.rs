//! Post-conversation measurement.
//!
//! [`SurveyEngine`] reads the endogenous variables off a finished
//! conversation. For every `(respondent, question)` pair a variable
//! registers it issues one query: participants answer in character from
//! their own persona's closing context, and the reserved respondent
//! [`ORACLE_RESPONDENT`] is answered by an outside reader of the
//! transcript. Raw answers are then coerced to numbers one at a time, and
//! the per-variable values are folded with the variable's aggregation
//! rule.
//!
//! A single uncoercible answer becomes a missing value rather than a
//! failure; transport errors and unknown aggregation names stay fatal.
//! Exogenous variables are never surveyed: their realized values are read
//! back from the combination's assignment.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ordered_float::NotNan;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::{render_history, AgentRoster, Persona, Statement};
use crate::error::{LlmError, SurveyError};
use crate::graph::{CausalGraph, MeasurementSpec, VariableKind, VariableNode, VariableType};
use crate::llm::{ask_structured, de_string, with_retry, BackendSpec, LanguageBackend, ASK_ATTEMPTS};
use crate::prompts::PromptLibrary;

/// Reserved respondent key answered by a transcript reader instead of a
/// participant.
pub const ORACLE_RESPONDENT: &str = "oracle";

// =============================================================================
// Aggregation
// =============================================================================

/// How a variable's per-respondent values fold into one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Average,
    Sum,
    Max,
    Min,
    Mode,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Average => "average",
            Aggregation::Sum => "sum",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Mode => "mode",
        }
    }

    /// Fold `values` into one number. The inputs are the post-missing
    /// filtered values, so empty input is expected: `average` and `sum`
    /// give 0, `max` and `min` give their fold identities, and `mode` of
    /// nothing is a missing value.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            Aggregation::Average => {
                if values.is_empty() {
                    Some(0.0)
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::Max => Some(values.iter().fold(f64::NEG_INFINITY, |best, &v| best.max(v))),
            Aggregation::Min => Some(values.iter().fold(f64::INFINITY, |best, &v| best.min(v))),
            Aggregation::Mode => {
                let mut counts: BTreeMap<NotNan<f64>, usize> = BTreeMap::new();
                for &value in values {
                    if let Ok(value) = NotNan::new(value) {
                        *counts.entry(value).or_insert(0) += 1;
                    }
                }
                // Ties resolve to the largest value.
                counts
                    .into_iter()
                    .max_by_key(|&(value, count)| (count, value))
                    .map(|(value, _)| value.into_inner())
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "average" | "mean" => Ok(Aggregation::Average),
            "sum" => Ok(Aggregation::Sum),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            "mode" => Ok(Aggregation::Mode),
            other => Err(SurveyError::UnknownAggregation(other.to_string())),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Everything one survey pass produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyReport {
    pub outcomes: Vec<VariableMeasurement>,
    pub exogenous: Vec<ExogenousReading>,
    pub metadata: SurveyMetadata,
}

/// One endogenous variable's measurements and their fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableMeasurement {
    pub variable: String,
    pub answers: Vec<SurveyAnswer>,
    /// The aggregation actually applied, after the collaborator check.
    pub aggregation: Aggregation,
    /// `None` when the fold itself is undefined (mode of nothing). Note
    /// that infinite sentinels serialize to JSON as null as well.
    pub aggregate: Option<f64>,
}

/// One respondent's answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyAnswer {
    pub respondent: String,
    pub question: String,
    pub answer: String,
    /// Coerced numeric value; `None` records a missing datum.
    pub value: Option<f64>,
}

/// An exogenous variable's realized value, read back from the
/// combination assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExogenousReading {
    pub variable: String,
    pub value: String,
    pub code: Option<f64>,
}

/// Graph shape recorded alongside the measurements, so a report is
/// interpretable on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyMetadata {
    pub variables: BTreeMap<String, VariableInfo>,
    /// Cause name to the variables it feeds into.
    pub edges: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub kind: VariableKind,
    pub variable_type: VariableType,
    pub levels: Vec<String>,
}

// =============================================================================
// Engine
// =============================================================================

/// Collects and aggregates post-run measurements.
pub struct SurveyEngine {
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    scenario: String,
}

impl SurveyEngine {
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

    /// Survey every endogenous variable and read the exogenous values
    /// back from `assignment`.
    pub async fn collect(
        &self,
        graph: &CausalGraph,
        roster: &AgentRoster,
        history: &[Statement],
        assignment: &BTreeMap<String, String>,
    ) -> Result<SurveyReport, SurveyError> {
        let varied: Vec<String> = graph
            .exogenous()
            .filter_map(|node| node.variation.as_ref())
            .map(|variation| variation.attribute_name.clone())
            .collect();
        let varied = varied.join(", ");

        let mut outcomes = Vec::new();
        for node in graph.endogenous() {
            let Some(measurement) = node.measurement.as_ref() else {
                return Err(SurveyError::MissingQuestions(node.name.clone()));
            };
            let declared: Aggregation = measurement.aggregation.parse()?;

            let mut answers = Vec::new();
            for (respondent, question) in &measurement.questions {
                let answer = if respondent == ORACLE_RESPONDENT {
                    self.oracle_answer(node, question, history).await?
                } else {
                    let persona = roster.get(respondent).ok_or_else(|| {
                        SurveyError::UnknownRespondent {
                            variable: node.name.clone(),
                            respondent: respondent.clone(),
                        }
                    })?;
                    self.agent_answer(node, question, persona, roster, history, &varied)
                        .await?
                };
                let value = self.coerce(node, respondent, question, &answer).await?;
                if value.is_none() {
                    warn!(
                        variable = %node.name,
                        respondent = %respondent,
                        answer = %answer,
                        "answer recorded as missing"
                    );
                }
                answers.push(SurveyAnswer {
                    respondent: respondent.clone(),
                    question: question.clone(),
                    answer,
                    value,
                });
            }

            let aggregation = self.confirm_aggregation(node, measurement, declared).await?;
            let values: Vec<f64> = answers.iter().filter_map(|answer| answer.value).collect();
            let aggregate = aggregation.apply(&values);
            debug!(variable = %node.name, %aggregation, ?aggregate, "variable measured");
            outcomes.push(VariableMeasurement {
                variable: node.name.clone(),
                answers,
                aggregation,
                aggregate,
            });
        }

        let mut exogenous = Vec::new();
        for node in graph.exogenous() {
            let Some(value) = assignment.get(&node.name) else {
                continue;
            };
            let code = exogenous_code(node, value);
            if code.is_none() {
                warn!(variable = %node.name, value = %value, "assigned value has no numeric code");
            }
            exogenous.push(ExogenousReading {
                variable: node.name.clone(),
                value: value.clone(),
                code,
            });
        }

        Ok(SurveyReport {
            outcomes,
            exogenous,
            metadata: survey_metadata(graph),
        })
    }

    async fn agent_answer(
        &self,
        node: &VariableNode,
        question: &str,
        persona: &Persona,
        roster: &AgentRoster,
        history: &[Statement],
        varied: &str,
    ) -> Result<String, SurveyError> {
        let mut context = tera::Context::new();
        context.insert(
            "context",
            &persona.final_context(
                &self.scenario,
                &roster.group_knowledge_excluding(persona.role()),
                history,
            ),
        );
        context.insert("question", question);
        context.insert("exogenous", varied);
        context.insert("variable", &node.name);
        context.insert("operationalization", &node.operationalization);
        let prompt = self.library.render("agent_survey", &context)?;
        let reply: AnswerReply = with_retry(ASK_ATTEMPTS, || {
            ask_structured(self.backend.as_ref(), &self.spec, &prompt)
        })
        .await?;
        Ok(reply.answer)
    }

    async fn oracle_answer(
        &self,
        node: &VariableNode,
        question: &str,
        history: &[Statement],
    ) -> Result<String, SurveyError> {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("history", &render_history(history));
        context.insert("question", question);
        context.insert("variable", &node.name);
        context.insert("operationalization", &node.operationalization);
        let prompt = self.library.render("oracle_survey", &context)?;
        let reply: AnswerReply = with_retry(ASK_ATTEMPTS, || {
            ask_structured(self.backend.as_ref(), &self.spec, &prompt)
        })
        .await?;
        Ok(reply.answer)
    }

    /// Coerce one raw answer to a number through the type-specific
    /// template. An answer the collaborator cannot match ("na", or a
    /// reply that never parses) is a missing datum, not an error.
    async fn coerce(
        &self,
        node: &VariableNode,
        respondent: &str,
        question: &str,
        answer: &str,
    ) -> Result<Option<f64>, SurveyError> {
        let template = match node.variable_type {
            VariableType::Continuous => "coerce_continuous",
            VariableType::Count => "coerce_count",
            VariableType::Binary => "coerce_binary",
            VariableType::Ordinal => "coerce_ordinal",
            VariableType::Nominal => "coerce_nominal",
        };
        let mut context = tera::Context::new();
        context.insert("variable", &node.name);
        context.insert("operationalization", &node.operationalization);
        context.insert("respondent", respondent);
        context.insert("question", question);
        context.insert("response", answer);
        if node.variable_type.is_numeric() {
            context.insert("units", &node.units);
        } else {
            context.insert("level_codes", &render_level_codes(node));
        }
        let prompt = self.library.render(template, &context)?;

        match with_retry(ASK_ATTEMPTS, || {
            ask_structured::<CoerceReply>(self.backend.as_ref(), &self.spec, &prompt)
        })
        .await
        {
            Ok(reply) => Ok(numeric_value(node.variable_type, &reply.answer)),
            Err(LlmError::ParseError(message)) => {
                warn!(
                    variable = %node.name,
                    respondent = %respondent,
                    message,
                    "uncoercible answer recorded as missing"
                );
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Confirm (or correct) the declared aggregation with the
    /// collaborator. The declared name must already be a known rule; the
    /// reply is re-asked until it is one too.
    async fn confirm_aggregation(
        &self,
        node: &VariableNode,
        measurement: &MeasurementSpec,
        declared: Aggregation,
    ) -> Result<Aggregation, SurveyError> {
        let questions: Vec<&str> = measurement.questions.values().map(String::as_str).collect();
        let mut context = tera::Context::new();
        context.insert("variable", &node.name);
        context.insert("question", &questions.join("; "));
        context.insert("aggregation", declared.as_str());
        let prompt = self.library.render("aggregation_check", &context)?;
        let confirmed = with_retry(ASK_ATTEMPTS, || self.aggregation_round(&prompt)).await?;
        if confirmed != declared {
            debug!(variable = %node.name, %declared, %confirmed, "aggregation corrected");
        }
        Ok(confirmed)
    }

    async fn aggregation_round(&self, prompt: &str) -> Result<Aggregation, LlmError> {
        let reply: AggregationReply =
            ask_structured(self.backend.as_ref(), &self.spec, prompt).await?;
        reply
            .aggregation
            .parse()
            .map_err(|error: SurveyError| LlmError::ParseError(error.to_string()))
    }
}

/// Numeric code for an assigned exogenous value: numeric variables take
/// the first number in the value text, level variables map through the
/// variation table to their level's code.
pub fn exogenous_code(node: &VariableNode, value: &str) -> Option<f64> {
    if node.variable_type.is_numeric() {
        return first_number(value);
    }
    let map = node.variation_level_map();
    let level = map.get(value)?;
    node.level_codes().get(level).copied()
}

fn first_number(text: &str) -> Option<f64> {
    let digits = Regex::new(r"\d+").ok()?;
    digits.find(text)?.as_str().parse().ok()
}

fn numeric_value(variable_type: VariableType, answer: &str) -> Option<f64> {
    let text = answer.trim();
    if text.eq_ignore_ascii_case("na") {
        return None;
    }
    match variable_type {
        VariableType::Count => text.parse::<i64>().ok().map(|count| count as f64),
        _ => text.parse::<f64>().ok(),
    }
}

fn render_level_codes(node: &VariableNode) -> String {
    let mut pairs: Vec<(String, f64)> = node.level_codes().into_iter().collect();
    pairs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    pairs
        .iter()
        .map(|(level, code)| format!("{level} = {code}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn survey_metadata(graph: &CausalGraph) -> SurveyMetadata {
    let variables = graph
        .variables()
        .map(|node| {
            (
                node.name.clone(),
                VariableInfo {
                    kind: node.kind,
                    variable_type: node.variable_type,
                    levels: node.levels.clone(),
                },
            )
        })
        .collect();
    SurveyMetadata {
        variables,
        edges: graph.export_edges(),
    }
}

#[derive(Debug, Deserialize)]
struct AnswerReply {
    #[serde(deserialize_with = "de_string")]
    answer: String,
}

#[derive(Debug, Deserialize)]
struct CoerceReply {
    #[serde(deserialize_with = "de_string")]
    answer: String,
}

#[derive(Debug, Deserialize)]
struct AggregationReply {
    #[serde(deserialize_with = "de_string")]
    aggregation: String,
}
