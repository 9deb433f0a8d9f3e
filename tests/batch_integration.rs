//! End-to-end batch execution over the scripted backend.
//!
//! Drives the public API the way two CLI invocations would: persist an
//! experiment state, load it back, expand the variation space, execute the
//! batch with checkpointing, then re-run it to pick the transcripts up.

use std::path::Path;
use std::sync::Arc;

use vignette::agents::{
    AgentTemplate, AssembledAgents, VariationEntry, VariationSpace, VariationTarget,
    CONSTRAINT_KEY, GOAL_KEY, NAME_KEY, ROLE_KEY,
};
use vignette::experiment::{
    artifact_path, BatchExecutor, CombinationExpander, CombinationOutcome, ExperimentBatch,
    ExperimentConfig, FinishReason, InteractionDesign, SchedulePolicy,
};
use vignette::graph::{
    AttributeVariation, CausalGraph, MeasurementSpec, VariableKind, VariableNode, VariableType,
};
use vignette::llm::{BackendSpec, ScriptedBackend};
use vignette::prompts::PromptLibrary;
use vignette::state::{load_state, save_state, ExperimentState, TypeRegistry};

fn negotiation_graph() -> CausalGraph {
    let mut graph = CausalGraph::new();

    let mut outcome = VariableNode::new("sale price", VariableKind::Endogenous);
    outcome.variable_type = VariableType::Continuous;
    outcome.operationalization = "the final agreed price".into();
    outcome.units = "dollars".into();
    outcome.measurement = Some(MeasurementSpec {
        questions: [("buyer".to_string(), "What price did you agree to?".to_string())]
            .into_iter()
            .collect(),
        aggregation: "average".to_string(),
    });
    graph.insert_node(outcome);

    let mut budget = VariableNode::new("buyer budget", VariableKind::Exogenous);
    budget.variable_type = VariableType::Continuous;
    budget.variation = Some(AttributeVariation {
        attribute_name: "your maximum budget".into(),
        attribute_values: vec!["4000".into(), "8000".into()],
        varied_agent: "buyer".into(),
    });
    graph.insert_node(budget);

    graph
}

fn assembled_agents() -> AssembledAgents {
    let mut templates: Vec<AgentTemplate> = [("buyer", "alice"), ("seller", "bob")]
        .iter()
        .map(|(role, name)| {
            let mut template = AgentTemplate::new(*role);
            template.attributes.insert(ROLE_KEY.into(), (*role).into());
            template.attributes.insert(NAME_KEY.into(), (*name).into());
            template.attributes.insert(GOAL_KEY.into(), "a fair deal".into());
            template
                .attributes
                .insert(CONSTRAINT_KEY.into(), "be honest".into());
            template
        })
        .collect();
    templates[0]
        .attributes
        .insert("your maximum budget".into(), String::new());

    let mut variation = VariationSpace::new();
    variation.push_entry(VariationEntry {
        variable: "buyer budget".into(),
        values: vec!["4000".into(), "8000".into()],
        targets: vec![VariationTarget {
            role: "buyer".into(),
            attribute: "your maximum budget".into(),
            values: vec!["4000".into(), "8000".into()],
        }],
    });

    AssembledAgents {
        templates,
        variation,
    }
}

fn negotiation_state() -> ExperimentState {
    let mut state = ExperimentState::new(
        "a used car negotiation",
        BackendSpec::new("openai", "gpt-4o"),
    );
    state.roles = vec!["buyer".to_string(), "seller".to_string()];
    state.graph = negotiation_graph();
    state
}

fn negotiation_batch(state: &ExperimentState) -> ExperimentBatch {
    let combinations = CombinationExpander::new(assembled_agents())
        .expand()
        .unwrap();
    ExperimentBatch {
        scenario: state.scenario.clone(),
        graph: state.graph.clone(),
        design: InteractionDesign {
            policy: SchedulePolicy::Ordered,
            order: vec!["buyer".into(), "seller".into()],
            central_agent: None,
        },
        combinations,
    }
}

fn executor(backend: Arc<ScriptedBackend>, output_dir: &Path) -> BatchExecutor {
    let config = ExperimentConfig::default()
        .with_max_interactions(1)
        .with_parallelism(1)
        .with_output_dir(output_dir);
    BatchExecutor::new(
        backend,
        BackendSpec::new("openai", "gpt-4o"),
        Arc::new(PromptLibrary::builtin()),
        config,
    )
}

/// One conversation at a turn budget of one, then its survey: two
/// statements, the judgment, the buyer's answer, its coercion, and the
/// aggregation check.
fn combination_replies() -> Vec<String> {
    vec![
        "I can pay four thousand.".to_string(),
        "Deal at 4800.".to_string(),
        r#"{"explanation": "x", "choice": "continue"}"#.to_string(),
        r#"{"explanation": "x", "answer": "we agreed on 4800 dollars"}"#.to_string(),
        r#"{"answer": "4800", "explanation": "x"}"#.to_string(),
        r#"{"aggregation": "average", "explanation": "x"}"#.to_string(),
    ]
}

fn survey_replies() -> Vec<String> {
    combination_replies().split_off(3)
}

#[tokio::test]
async fn test_state_file_to_surveyed_batch() {
    let dir = tempfile::tempdir().unwrap();

    let state_path = dir.path().join("state_a_used_car_negotiation.json");
    save_state(&state_path, &negotiation_state()).unwrap();
    let state = load_state(&state_path, &TypeRegistry::builtin()).unwrap();
    assert_eq!(state.roles, ["buyer", "seller"]);
    assert_eq!(state.graph.outcome_name(), Some("sale price"));

    let batch = negotiation_batch(&state);
    assert_eq!(batch.combinations.len(), 2);

    let replies: Vec<String> = combination_replies()
        .into_iter()
        .chain(combination_replies())
        .collect();
    let backend = Arc::new(ScriptedBackend::new(replies));
    let report = executor(Arc::clone(&backend), dir.path())
        .execute(&batch)
        .await
        .unwrap();

    assert_eq!(backend.calls(), 12);
    assert_eq!(report.combinations.len(), 2);
    assert_eq!(report.assignments[&0]["buyer budget"], "4000");
    assert_eq!(report.assignments[&1]["buyer budget"], "8000");

    for (position, cell) in report.combinations.iter().enumerate() {
        assert_eq!(cell.index, position);
        match &cell.outcome {
            CombinationOutcome::Completed { history, survey } => {
                assert_eq!(history.statements.len(), 2);
                assert_eq!(history.reason, FinishReason::TurnBudget);
                assert_eq!(survey.outcomes[0].aggregate, Some(4800.0));
            }
            CombinationOutcome::Failed { error } => panic!("combination failed: {error}"),
        }
    }

    assert!(artifact_path(dir.path(), "history", &batch.scenario).exists());
    assert!(artifact_path(dir.path(), "results", &batch.scenario).exists());
}

#[tokio::test]
async fn test_second_run_reuses_saved_transcripts() {
    let dir = tempfile::tempdir().unwrap();
    let state = negotiation_state();
    let batch = negotiation_batch(&state);

    let first = Arc::new(ScriptedBackend::new(
        combination_replies()
            .into_iter()
            .chain(combination_replies())
            .collect::<Vec<_>>(),
    ));
    executor(Arc::clone(&first), dir.path())
        .execute(&batch)
        .await
        .unwrap();
    assert_eq!(first.calls(), 12);

    // The second run re-surveys both cells but replays no conversation.
    let second = Arc::new(ScriptedBackend::new(
        survey_replies()
            .into_iter()
            .chain(survey_replies())
            .collect::<Vec<_>>(),
    ));
    let report = executor(Arc::clone(&second), dir.path())
        .execute(&batch)
        .await
        .unwrap();

    assert_eq!(second.calls(), 6);
    for cell in &report.combinations {
        match &cell.outcome {
            CombinationOutcome::Completed { history, survey } => {
                assert_eq!(history.statements.len(), 2);
                assert_eq!(survey.outcomes[0].aggregate, Some(4800.0));
            }
            CombinationOutcome::Failed { error } => panic!("combination failed: {error}"),
        }
    }
}
