//! Collaborator-driven construction of variable nodes.
//!
//! The judgment-heavy answers (operationalization, survey design, induced
//! variation) get a self-review round: the original prompt and the model's
//! answer go back with an instruction to correct mistakes, and the reviewed
//! answer is the one that is parsed. Ordinal variation gets a second review
//! focused on value ordering. Every exchange sits behind the standard
//! re-ask policy, so a model that answers in the wrong shape gets fresh
//! chances before the build fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{GraphError, LlmError};
use crate::graph::variable::{
    AttributeVariation, MeasurementSpec, VariableKind, VariableNode, VariableType, VariationScope,
    VariationVisibility, Visibility, SCENARIO_WIDE,
};
use crate::llm::{
    ask_structured, de_string, de_string_list, parse_structured, with_retry, BackendSpec,
    LanguageBackend, ASK_ATTEMPTS,
};
use crate::prompts::PromptLibrary;

/// Representative values elicited for continuous and count variables.
pub const DEFAULT_CONTINUOUS_LEVELS: usize = 5;

/// Builds variable nodes by querying the collaborating model.
pub struct VariableElicitor {
    backend: Arc<dyn LanguageBackend>,
    spec: BackendSpec,
    library: Arc<PromptLibrary>,
    scenario: String,
    agents: Vec<String>,
    continuous_levels: usize,
}

impl VariableElicitor {
    pub fn new(
        backend: Arc<dyn LanguageBackend>,
        spec: BackendSpec,
        library: Arc<PromptLibrary>,
        scenario: impl Into<String>,
        agents: Vec<String>,
    ) -> Self {
        Self {
            backend,
            spec,
            library,
            scenario: scenario.into(),
            agents,
            continuous_levels: DEFAULT_CONTINUOUS_LEVELS,
        }
    }

    /// Override the number of representative levels for numeric variables.
    pub fn with_continuous_levels(mut self, continuous_levels: usize) -> Self {
        self.continuous_levels = continuous_levels;
        self
    }

    /// Roles participating in the scenario.
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    /// Build the outcome node: operationalization, type, units, levels,
    /// and its survey design. A nominal outcome aborts the build.
    pub async fn build_outcome(&self, name: &str) -> Result<VariableNode, GraphError> {
        info!(variable = name, "eliciting outcome variable");
        let mut node = VariableNode::new(name, VariableKind::Endogenous);

        let mut context = self.base_context(name);
        let operationalization: OperationalizationReply = self
            .ask_reviewed("operationalize_outcome", &context, &["self_review"])
            .await?;
        node.operationalization = operationalization.operationalization;

        self.fill_common(&mut node, &mut context).await?;
        node.measurement = Some(self.measurement_spec(&node, &context).await?);
        Ok(node)
    }

    /// Build a cause node feeding into `outcomes`.
    ///
    /// After the shared steps the model decides when the variable is
    /// determined: a value settled during the interaction makes the node
    /// endogenous (surveyed like the outcome), anything settled beforehand
    /// makes it exogenous and gets experimental variation induced.
    /// `covariates` are the already-built nodes this one may align its
    /// numeric variation with.
    pub async fn build_cause(
        &self,
        name: &str,
        outcomes: &str,
        covariates: &[&VariableNode],
    ) -> Result<VariableNode, GraphError> {
        info!(variable = name, "eliciting cause variable");
        let mut node = VariableNode::new(name, VariableKind::Exogenous);

        let mut context = self.base_context(name);
        context.insert("outcome", outcomes);
        let operationalization: OperationalizationReply = self
            .ask_reviewed("operationalize_cause", &context, &["self_review"])
            .await?;
        node.operationalization = operationalization.operationalization;

        self.fill_common(&mut node, &mut context).await?;

        let when: WhenDeterminedReply = self.ask("when_determined", &context).await?;
        if when.when_determined.contains("during") {
            node.kind = VariableKind::Endogenous;
            node.measurement = Some(self.measurement_spec(&node, &context).await?);
        } else {
            self.induce_variation(&mut node, &mut context, covariates)
                .await?;
        }
        debug!(variable = name, kind = %node.kind, "cause variable built");
        Ok(node)
    }

    /// Ask for exactly `count` candidate causes of `name`, avoiding
    /// everything in `excluded`.
    pub async fn propose_causes(
        &self,
        name: &str,
        count: usize,
        excluded: &[String],
    ) -> Result<Vec<String>, GraphError> {
        let mut context = self.base_context(name);
        context.insert("num_causes", &count.to_string());
        context.insert(
            "excluded",
            &if excluded.is_empty() {
                "nothing yet".to_string()
            } else {
                excluded.join(", ")
            },
        );

        let reply: CausesReply = self.ask("propose_causes", &context).await?;
        Ok(reply
            .causes
            .into_iter()
            .map(|cause| cause.trim().to_string())
            .collect())
    }

    // Type, units, and levels are elicited the same way for every node.
    async fn fill_common(
        &self,
        node: &mut VariableNode,
        context: &mut tera::Context,
    ) -> Result<(), GraphError> {
        context.insert("operationalization", &node.operationalization);

        let type_reply: TypeReply = self.ask("classify_variable_type", context).await?;
        node.variable_type = type_reply.variable_type.parse()?;
        if node.variable_type == VariableType::Nominal {
            return Err(GraphError::NominalUnsupported(node.name.clone()));
        }
        context.insert("variable_type", &node.variable_type.to_string());

        let units_reply: UnitsReply = self.ask("variable_units", context).await?;
        node.units = units_reply.units;
        context.insert("units", &node.units);

        let num_levels = match node.variable_type {
            VariableType::Binary => 2,
            _ => self.continuous_levels,
        };
        context.insert("num_levels", &num_levels.to_string());
        let levels_reply: LevelsReply = self.ask("create_levels", context).await?;
        node.levels = levels_reply.levels;
        Ok(())
    }

    async fn measurement_spec(
        &self,
        node: &VariableNode,
        context: &tera::Context,
    ) -> Result<MeasurementSpec, GraphError> {
        let reply: QuestionsReply = self
            .ask_reviewed("measurement_questions", context, &["self_review"])
            .await?;
        debug!(variable = %node.name, aggregation = %reply.aggregation, "survey design elicited");
        Ok(MeasurementSpec {
            questions: reply.questions,
            aggregation: reply.aggregation,
        })
    }

    async fn induce_variation(
        &self,
        node: &mut VariableNode,
        context: &mut tera::Context,
        covariates: &[&VariableNode],
    ) -> Result<(), GraphError> {
        let scope_reply: ScopeReply = self.ask("variation_scope", context).await?;
        let scope = if scope_reply.scope.contains("individual") {
            VariationScope::Individual
        } else {
            VariationScope::Scenario
        };
        node.scope = Some(scope);

        match scope {
            VariationScope::Individual => {
                // Ordinal value lists get a second review pass dedicated to
                // their ordering.
                let reviews: &[&str] = if node.variable_type == VariableType::Ordinal {
                    &["self_review", "review_variation"]
                } else {
                    &["self_review"]
                };
                let reply: IndividualVariationReply = self
                    .ask_reviewed("induce_variation_individual", context, reviews)
                    .await?;
                let mut variation = AttributeVariation {
                    attribute_name: reply.attribute_name,
                    attribute_values: reply.attribute_values,
                    varied_agent: reply.varied_agent,
                };
                if node.variable_type.is_numeric() || node.variable_type == VariableType::Ordinal {
                    variation.sort_values();
                }
                node.variation = Some(variation);

                self.align_with_covariates(node, covariates).await?;
                self.choose_visibility(node, context).await?;
            }
            VariationScope::Scenario => {
                let reply: ScenarioVariationReply = self
                    .ask_reviewed("induce_variation_scenario", context, &["self_review"])
                    .await?;
                let mut variation = AttributeVariation {
                    attribute_name: reply.attribute_name,
                    attribute_values: reply.attribute_values,
                    varied_agent: SCENARIO_WIDE.to_string(),
                };
                if node.variable_type.is_numeric() || node.variable_type == VariableType::Ordinal {
                    variation.sort_values();
                }
                node.variation = Some(variation);
            }
        }
        Ok(())
    }

    // Numeric variables varied alongside other numeric variables get their
    // value lists re-scaled so the ranges stay comparable.
    async fn align_with_covariates(
        &self,
        node: &mut VariableNode,
        covariates: &[&VariableNode],
    ) -> Result<(), GraphError> {
        if !node.variable_type.is_numeric() {
            return Ok(());
        }
        let siblings: Vec<String> = covariates
            .iter()
            .filter(|c| c.name != node.name && c.variable_type.is_numeric())
            .filter_map(|c| {
                c.variation.as_ref().map(|v| {
                    format!(
                        "{} varies \"{}\" over: {}",
                        c.name,
                        v.attribute_name,
                        v.attribute_values.join(", ")
                    )
                })
            })
            .collect();
        if siblings.is_empty() {
            return Ok(());
        }

        let Some(variation) = node.variation.as_mut() else {
            return Ok(());
        };
        let mut context = tera::Context::new();
        context.insert("variable", &node.name);
        context.insert("attribute_values", &variation.attribute_values.join(", "));
        context.insert("siblings", &siblings.join("; "));

        let reply: AlignReply = self.ask("align_variation", &context).await?;
        if !reply.attribute_values.is_empty() {
            variation.attribute_values = reply.attribute_values;
            variation.sort_values();
        }
        Ok(())
    }

    async fn choose_visibility(
        &self,
        node: &mut VariableNode,
        context: &mut tera::Context,
    ) -> Result<(), GraphError> {
        let Some(variation) = node.variation.as_ref() else {
            return Ok(());
        };
        context.insert("attribute_name", &variation.attribute_name);
        context.insert("attribute_values", &variation.attribute_values.join(", "));
        context.insert("varied_agent", &variation.varied_agent);

        let reply: VisibilityReply = self.ask("visibility_choice", context).await?;
        let choice = if reply.choice.contains("public") {
            Visibility::Public
        } else {
            Visibility::Private
        };
        node.visibility = Some(VariationVisibility {
            choice,
            public_name: reply.public_name,
            public_values: if choice == Visibility::Public {
                variation.attribute_values.clone()
            } else {
                Vec::new()
            },
        });
        Ok(())
    }

    fn base_context(&self, variable: &str) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("scenario", &self.scenario);
        context.insert("agents", &self.agents.join(", "));
        context.insert("variable", variable);
        context
    }

    /// One prompt, parse the answer.
    async fn ask<T: serde::de::DeserializeOwned>(
        &self,
        template: &str,
        context: &tera::Context,
    ) -> Result<T, GraphError> {
        let prompt = self.library.render(template, context)?;
        let parsed = with_retry(ASK_ATTEMPTS, || {
            ask_structured::<T>(self.backend.as_ref(), &self.spec, &prompt)
        })
        .await?;
        Ok(parsed)
    }

    /// One prompt, then one review round-trip per template in `reviews`;
    /// the final reviewed answer is the one parsed.
    async fn ask_reviewed<T: serde::de::DeserializeOwned>(
        &self,
        template: &str,
        context: &tera::Context,
        reviews: &[&str],
    ) -> Result<T, GraphError> {
        let prompt = self.library.render(template, context)?;
        let parsed = with_retry(ASK_ATTEMPTS, || self.reviewed_round::<T>(&prompt, reviews)).await?;
        Ok(parsed)
    }

    async fn reviewed_round<T: serde::de::DeserializeOwned>(
        &self,
        prompt: &str,
        reviews: &[&str],
    ) -> Result<T, LlmError> {
        let mut answer = self
            .backend
            .generate(self.spec.request(prompt))
            .await?
            .content;

        for review_template in reviews {
            let mut review_context = tera::Context::new();
            review_context.insert("prompt", prompt);
            review_context.insert("response", &answer);
            let review_prompt = self
                .library
                .render(review_template, &review_context)
                .map_err(|e| LlmError::RequestFailed(format!("review prompt failed: {e}")))?;

            answer = self
                .backend
                .generate(self.spec.request(review_prompt))
                .await?
                .content;
            debug!(template = review_template, "review round complete");
        }

        parse_structured::<T>(self.backend.as_ref(), &self.spec, &answer).await
    }
}

#[derive(Debug, Deserialize)]
struct OperationalizationReply {
    #[serde(deserialize_with = "de_string")]
    operationalization: String,
}

#[derive(Debug, Deserialize)]
struct TypeReply {
    #[serde(deserialize_with = "de_string")]
    variable_type: String,
}

#[derive(Debug, Deserialize)]
struct UnitsReply {
    #[serde(deserialize_with = "de_string")]
    units: String,
}

#[derive(Debug, Deserialize)]
struct LevelsReply {
    #[serde(deserialize_with = "de_string_list")]
    levels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionsReply {
    questions: BTreeMap<String, String>,
    #[serde(deserialize_with = "de_string")]
    aggregation: String,
}

#[derive(Debug, Deserialize)]
struct CausesReply {
    #[serde(deserialize_with = "de_string_list")]
    causes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WhenDeterminedReply {
    #[serde(deserialize_with = "de_string")]
    when_determined: String,
}

#[derive(Debug, Deserialize)]
struct ScopeReply {
    #[serde(deserialize_with = "de_string")]
    scope: String,
}

#[derive(Debug, Deserialize)]
struct IndividualVariationReply {
    #[serde(deserialize_with = "de_string")]
    attribute_name: String,
    #[serde(deserialize_with = "de_string_list")]
    attribute_values: Vec<String>,
    #[serde(deserialize_with = "de_string")]
    varied_agent: String,
}

#[derive(Debug, Deserialize)]
struct ScenarioVariationReply {
    #[serde(deserialize_with = "de_string")]
    attribute_name: String,
    #[serde(deserialize_with = "de_string_list")]
    attribute_values: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AlignReply {
    #[serde(deserialize_with = "de_string_list")]
    attribute_values: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VisibilityReply {
    #[serde(deserialize_with = "de_string")]
    choice: String,
    #[serde(default, deserialize_with = "de_string")]
    public_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedBackend;

    fn elicitor(backend: Arc<ScriptedBackend>) -> VariableElicitor {
        VariableElicitor::new(
            backend,
            BackendSpec::new("openai", "gpt-4o"),
            Arc::new(PromptLibrary::builtin()),
            "two people bargaining over a used car",
            vec!["buyer".to_string(), "seller".to_string()],
        )
    }

    // Reviewed exchanges send a draft then the reviewed answer; only the
    // reviewed answer is parsed.
    fn reviewed(answer: &str) -> [String; 2] {
        ["draft response".to_string(), answer.to_string()]
    }

    #[tokio::test]
    async fn test_build_outcome_fills_every_field() {
        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "sale price", "operationalization": "final agreed price in dollars", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "continuous", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "dollars", "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"levels": ["1000", "3000", "5000", "7000", "9000"], "explanation": "x"}"#
                .to_string(),
        );
        responses.extend(reviewed(
            r#"{"questions": {"buyer": "what price did you agree to?", "seller": "what price did you agree to?", "oracle": "what price was agreed?"}, "aggregation": "average", "explanation": "x"}"#,
        ));

        let backend = Arc::new(ScriptedBackend::new(responses));
        let node = elicitor(backend.clone())
            .build_outcome("sale price")
            .await
            .unwrap();

        assert_eq!(node.kind, VariableKind::Endogenous);
        assert_eq!(node.variable_type, VariableType::Continuous);
        assert_eq!(node.operationalization, "final agreed price in dollars");
        assert_eq!(node.units, "dollars");
        assert_eq!(node.levels.len(), 5);
        let measurement = node.measurement.unwrap();
        assert_eq!(measurement.aggregation, "average");
        assert_eq!(measurement.questions.len(), 3);
        assert!(measurement.questions.contains_key("oracle"));
        assert_eq!(backend.calls(), 7);
    }

    #[tokio::test]
    async fn test_build_outcome_rejects_nominal() {
        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "car color", "operationalization": "the color", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "nominal", "explanation": "x"}"#.to_string());

        let backend = Arc::new(ScriptedBackend::new(responses));
        let err = elicitor(backend)
            .build_outcome("car color")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NominalUnsupported(name) if name == "car color"));
    }

    #[tokio::test]
    async fn test_build_cause_exogenous_individual_public() {
        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "buyer budget", "operationalization": "maximum dollars the buyer can spend", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "continuous", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "dollars", "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"levels": ["2000", "4000", "6000", "8000", "10000"], "explanation": "x"}"#
                .to_string(),
        );
        responses.push(
            r#"{"when_determined": "before the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push(r#"{"scope": "individual", "explanation": "x"}"#.to_string());
        responses.extend(reviewed(
            r#"{"attribute_name": "your maximum budget", "attribute_values": ["8000", "4000"], "varied_agent": "buyer", "explanation": "x"}"#,
        ));
        responses.push(
            r#"{"choice": "public", "public_name": "their stated budget", "explanation": "x"}"#
                .to_string(),
        );

        let backend = Arc::new(ScriptedBackend::new(responses));
        let node = elicitor(backend.clone())
            .build_cause("buyer budget", "sale price", &[])
            .await
            .unwrap();

        assert_eq!(node.kind, VariableKind::Exogenous);
        assert_eq!(node.scope, Some(VariationScope::Individual));
        let variation = node.variation.as_ref().unwrap();
        assert_eq!(variation.varied_agent, "buyer");
        // Numeric values come back sorted ascending.
        assert_eq!(variation.attribute_values, vec!["4000", "8000"]);
        let visibility = node.visibility.unwrap();
        assert_eq!(visibility.choice, Visibility::Public);
        assert_eq!(visibility.public_name, "their stated budget");
        assert_eq!(visibility.public_values, vec!["4000", "8000"]);
        assert_eq!(backend.calls(), 10);
    }

    #[tokio::test]
    async fn test_build_cause_aligns_numeric_variation_with_covariates() {
        let mut sibling = VariableNode::new("seller valuation", VariableKind::Exogenous);
        sibling.variable_type = VariableType::Continuous;
        sibling.variation = Some(AttributeVariation {
            attribute_name: "your asking price".to_string(),
            attribute_values: vec!["3000".to_string(), "9000".to_string()],
            varied_agent: "seller".to_string(),
        });

        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "buyer budget", "operationalization": "maximum dollars the buyer can spend", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "continuous", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "dollars", "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"levels": ["100", "200", "300", "400", "500"], "explanation": "x"}"#.to_string(),
        );
        responses.push(
            r#"{"when_determined": "before the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push(r#"{"scope": "individual", "explanation": "x"}"#.to_string());
        responses.extend(reviewed(
            r#"{"attribute_name": "your maximum budget", "attribute_values": ["100", "500"], "varied_agent": "buyer", "explanation": "x"}"#,
        ));
        // Alignment rescales the values toward the sibling's range.
        responses.push(r#"{"attribute_values": ["4000", "8000"], "explanation": "x"}"#.to_string());
        responses
            .push(r#"{"choice": "private", "public_name": "", "explanation": "x"}"#.to_string());

        let backend = Arc::new(ScriptedBackend::new(responses));
        let node = elicitor(backend.clone())
            .build_cause("buyer budget", "sale price", &[&sibling])
            .await
            .unwrap();

        let variation = node.variation.as_ref().unwrap();
        assert_eq!(variation.attribute_values, vec!["4000", "8000"]);
        let visibility = node.visibility.unwrap();
        assert_eq!(visibility.choice, Visibility::Private);
        assert!(visibility.public_values.is_empty());
        assert_eq!(backend.calls(), 11);
    }

    #[tokio::test]
    async fn test_build_cause_scenario_scope_marks_scenario_wide() {
        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "market demand", "operationalization": "number of competing buyers", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "count", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "buyers", "explanation": "x"}"#.to_string());
        responses.push(r#"{"levels": ["0", "1", "2", "3", "4"], "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"when_determined": "before the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push(r#"{"scope": "scenario", "explanation": "x"}"#.to_string());
        responses.extend(reviewed(
            r#"{"attribute_name": "competing buyers today", "attribute_values": ["0", "3"], "explanation": "x"}"#,
        ));

        let backend = Arc::new(ScriptedBackend::new(responses));
        let node = elicitor(backend)
            .build_cause("market demand", "sale price", &[])
            .await
            .unwrap();

        assert_eq!(node.scope, Some(VariationScope::Scenario));
        let variation = node.variation.unwrap();
        assert!(variation.is_scenario_wide());
        // Scenario-wide attributes have no visibility choice to make.
        assert!(node.visibility.is_none());
    }

    #[tokio::test]
    async fn test_build_cause_endogenous_gets_measurement() {
        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "rapport", "operationalization": "rated warmth of the exchange", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "ordinal", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "rating level", "explanation": "x"}"#.to_string());
        responses.push(r#"{"levels": ["cold", "neutral", "warm"], "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"when_determined": "during the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.extend(reviewed(
            r#"{"questions": {"buyer": "how warm was the exchange?", "seller": "how warm was the exchange?", "oracle": "rate the warmth"}, "aggregation": "mode", "explanation": "x"}"#,
        ));

        let backend = Arc::new(ScriptedBackend::new(responses));
        let node = elicitor(backend)
            .build_cause("rapport", "sale price", &[])
            .await
            .unwrap();

        assert_eq!(node.kind, VariableKind::Endogenous);
        assert!(node.variation.is_none());
        assert_eq!(node.measurement.unwrap().aggregation, "mode");
    }

    #[tokio::test]
    async fn test_ordinal_variation_gets_second_review() {
        let mut responses = Vec::new();
        responses.extend(reviewed(
            r#"{"variable": "seller patience", "operationalization": "how long the seller will wait", "explanation": "x"}"#,
        ));
        responses.push(r#"{"variable_type": "ordinal", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "patience level", "explanation": "x"}"#.to_string());
        responses.push(r#"{"levels": ["low", "medium", "high"], "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"when_determined": "before the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push(r#"{"scope": "individual", "explanation": "x"}"#.to_string());
        // Draft, first review, second ordering-focused review.
        responses.push("draft".to_string());
        responses.push("reviewed once".to_string());
        responses.push(
            r#"{"attribute_name": "your patience", "attribute_values": ["high", "low", "medium"], "varied_agent": "seller", "explanation": "x"}"#
                .to_string(),
        );
        responses
            .push(r#"{"choice": "private", "public_name": "", "explanation": "x"}"#.to_string());

        let backend = Arc::new(ScriptedBackend::new(responses));
        let node = elicitor(backend.clone())
            .build_cause("seller patience", "sale price", &[])
            .await
            .unwrap();

        let variation = node.variation.as_ref().unwrap();
        // Non-numeric values sort lexicographically.
        assert_eq!(variation.attribute_values, vec!["high", "low", "medium"]);
        assert_eq!(backend.calls(), 11);
    }

    #[tokio::test]
    async fn test_propose_causes_trims_and_returns_all() {
        let backend = Arc::new(ScriptedBackend::new([
            r#"{"causes": ["  buyer budget ", "seller urgency"], "explanation": "x"}"#,
        ]));
        let causes = elicitor(backend)
            .propose_causes("sale price", 2, &["market demand".to_string()])
            .await
            .unwrap();
        assert_eq!(causes, vec!["buyer budget", "seller urgency"]);
    }

    #[tokio::test]
    async fn test_ask_retries_on_wrong_shape() {
        // First answer parses to the wrong shape; the re-ask succeeds.
        let responses = vec![
            r#"{"unexpected": true}"#.to_string(),
            r#"{"causes": ["buyer budget"], "explanation": "x"}"#.to_string(),
        ];
        let backend = Arc::new(ScriptedBackend::new(responses));
        let causes = elicitor(backend.clone())
            .propose_causes("sale price", 1, &[])
            .await
            .unwrap();
        assert_eq!(causes, vec!["buyer budget"]);
        assert_eq!(backend.calls(), 2);
    }
}
