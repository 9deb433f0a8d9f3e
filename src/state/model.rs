//! Envelope codecs for the entities a scenario persists between CLI
//! invocations, plus the registry that routes a discriminator to the
//! right decoder.
//!
//! Decoding is two-phase. Phase one reads the constructor arguments out
//! of `args` and builds the entity through its normal constructor; phase
//! two patches every remaining recognized key onto the constructed value
//! by direct assignment. Fields absent from `args` keep their constructed
//! defaults, and keys the codec does not recognize are ignored. The
//! [`TypeRegistry`] is built once at startup and handed to whatever
//! decodes; nothing registers itself through global state.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::StateError;
use crate::graph::{CausalGraph, VariableKind, VariableNode};
use crate::llm::BackendSpec;

use super::envelope;

/// Discriminator for the top-level experiment state.
pub const STATE_CLASS: &str = "ExperimentState";
/// Discriminator for the causal model.
pub const GRAPH_CLASS: &str = "CausalGraph";
/// Discriminator for manipulated input variables.
pub const EXOGENOUS_CLASS: &str = "ExogenousVariable";
/// Discriminator for measured outcome variables.
pub const ENDOGENOUS_CLASS: &str = "EndogenousVariable";
/// Discriminator for the collaborator backend settings.
pub const BACKEND_CLASS: &str = "BackendSpec";

/// Everything the CLI needs to pick a scenario back up: the description,
/// the proposed roles, the backend the graph was elicited with, and the
/// graph itself.
#[derive(Debug, Clone)]
pub struct ExperimentState {
    pub scenario: String,
    pub roles: Vec<String>,
    pub backend: BackendSpec,
    pub graph: CausalGraph,
}

impl ExperimentState {
    /// Start a state for a scenario; roles and graph are filled in as the
    /// pipeline progresses.
    pub fn new(scenario: impl Into<String>, backend: BackendSpec) -> Self {
        Self {
            scenario: scenario.into(),
            roles: Vec::new(),
            backend,
            graph: CausalGraph::new(),
        }
    }
}

/// A decoded persisted entity, tagged by which codec produced it.
#[derive(Debug, Clone)]
pub enum Entity {
    State(ExperimentState),
    Graph(CausalGraph),
    Variable(VariableNode),
    Backend(BackendSpec),
}

impl Entity {
    /// The discriminator this entity serializes under.
    pub fn class(&self) -> &'static str {
        match self {
            Entity::State(_) => STATE_CLASS,
            Entity::Graph(_) => GRAPH_CLASS,
            Entity::Variable(node) => class_for(node.kind),
            Entity::Backend(_) => BACKEND_CLASS,
        }
    }
}

type DecodeFn = fn(&TypeRegistry, &Map<String, Value>) -> Result<Entity, StateError>;

/// Maps class discriminators to decoders. Construct it once with
/// [`TypeRegistry::builtin`] and pass it to every load path.
pub struct TypeRegistry {
    decoders: BTreeMap<&'static str, DecodeFn>,
}

impl TypeRegistry {
    /// Registry covering every entity the engine persists.
    pub fn builtin() -> Self {
        let mut registry = Self {
            decoders: BTreeMap::new(),
        };
        registry.register(STATE_CLASS, decode_state_args);
        registry.register(GRAPH_CLASS, decode_graph_args);
        registry.register(EXOGENOUS_CLASS, decode_exogenous_args);
        registry.register(ENDOGENOUS_CLASS, decode_endogenous_args);
        registry.register(BACKEND_CLASS, decode_backend_args);
        registry
    }

    /// Route a discriminator to a decoder. Later registrations replace
    /// earlier ones for the same class.
    pub fn register(&mut self, class: &'static str, decoder: DecodeFn) {
        self.decoders.insert(class, decoder);
    }

    pub fn contains(&self, class: &str) -> bool {
        self.decoders.contains_key(class)
    }

    /// Decode any persisted envelope into the entity its class names.
    pub fn decode(&self, value: &Value) -> Result<Entity, StateError> {
        let (class, args) = envelope::open(value)?;
        let decoder = self
            .decoders
            .get(class)
            .ok_or_else(|| StateError::UnknownClass(class.to_string()))?;
        decoder(self, args)
    }

    /// Decode an envelope that must hold an [`ExperimentState`].
    pub fn decode_state(&self, value: &Value) -> Result<ExperimentState, StateError> {
        match self.decode(value)? {
            Entity::State(state) => Ok(state),
            other => Err(unexpected_entity(STATE_CLASS, &other)),
        }
    }

    /// Decode an envelope that must hold a [`CausalGraph`].
    pub fn decode_graph(&self, value: &Value) -> Result<CausalGraph, StateError> {
        match self.decode(value)? {
            Entity::Graph(graph) => Ok(graph),
            other => Err(unexpected_entity(GRAPH_CLASS, &other)),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn unexpected_entity(expected: &str, found: &Entity) -> StateError {
    StateError::InvalidEnvelope(format!(
        "expected a '{expected}' envelope, found '{}'",
        found.class()
    ))
}

fn class_for(kind: VariableKind) -> &'static str {
    match kind {
        VariableKind::Exogenous => EXOGENOUS_CLASS,
        VariableKind::Endogenous => ENDOGENOUS_CLASS,
    }
}

/// Encode the full experiment state as a persisted envelope.
pub fn encode_state(state: &ExperimentState) -> Result<Value, StateError> {
    let mut args = Map::new();
    args.insert(
        "scenario".to_string(),
        Value::String(state.scenario.clone()),
    );
    args.insert("roles".to_string(), serde_json::to_value(&state.roles)?);
    args.insert("backend".to_string(), encode_backend(&state.backend)?);
    args.insert("graph".to_string(), encode_graph(&state.graph)?);
    Ok(envelope::seal(STATE_CLASS, args))
}

/// Encode a causal graph, keeping its discovery order alongside the node
/// envelopes and the edge relation.
pub fn encode_graph(graph: &CausalGraph) -> Result<Value, StateError> {
    let mut args = Map::new();
    args.insert("variables".to_string(), serde_json::to_value(graph.names())?);

    let mut nodes = Map::new();
    for node in graph.variables() {
        nodes.insert(node.name.clone(), encode_variable(node)?);
    }
    args.insert("nodes".to_string(), Value::Object(nodes));

    let mut edges = Map::new();
    for (cause, children) in graph.edges() {
        edges.insert(cause.clone(), envelope::encode_set(children));
    }
    args.insert("edges".to_string(), Value::Object(edges));

    Ok(envelope::seal(GRAPH_CLASS, args))
}

/// Encode one variable node; the kind picks the discriminator.
pub fn encode_variable(node: &VariableNode) -> Result<Value, StateError> {
    let mut args = Map::new();
    args.insert("name".to_string(), Value::String(node.name.clone()));
    args.insert(
        "variable_type".to_string(),
        serde_json::to_value(node.variable_type)?,
    );
    args.insert(
        "operationalization".to_string(),
        Value::String(node.operationalization.clone()),
    );
    args.insert("units".to_string(), Value::String(node.units.clone()));
    args.insert("levels".to_string(), serde_json::to_value(&node.levels)?);
    args.insert("causes".to_string(), envelope::encode_set(&node.causes));
    args.insert(
        "descendant_outcomes".to_string(),
        envelope::encode_set(&node.descendant_outcomes),
    );
    args.insert(
        "possible_covariates".to_string(),
        envelope::encode_set(&node.possible_covariates),
    );
    args.insert(
        "measurement".to_string(),
        serde_json::to_value(&node.measurement)?,
    );
    args.insert(
        "variation".to_string(),
        serde_json::to_value(&node.variation)?,
    );
    args.insert("scope".to_string(), serde_json::to_value(node.scope)?);
    args.insert(
        "visibility".to_string(),
        serde_json::to_value(&node.visibility)?,
    );
    Ok(envelope::seal(class_for(node.kind), args))
}

/// Encode the backend settings.
pub fn encode_backend(spec: &BackendSpec) -> Result<Value, StateError> {
    let mut args = Map::new();
    args.insert("family".to_string(), Value::String(spec.family.clone()));
    args.insert("model".to_string(), Value::String(spec.model.clone()));
    args.insert(
        "temperature".to_string(),
        serde_json::to_value(spec.temperature)?,
    );
    args.insert(
        "max_tokens".to_string(),
        serde_json::to_value(spec.max_tokens)?,
    );
    args.insert(
        "system_prompt".to_string(),
        Value::String(spec.system_prompt.clone()),
    );
    Ok(envelope::seal(BACKEND_CLASS, args))
}

fn decode_state_args(
    registry: &TypeRegistry,
    args: &Map<String, Value>,
) -> Result<Entity, StateError> {
    let scenario = envelope::require_str(STATE_CLASS, args, "scenario")?;
    let backend_value = args.get("backend").ok_or_else(|| StateError::MissingField {
        class: STATE_CLASS.to_string(),
        field: "backend".to_string(),
    })?;
    let backend = match registry.decode(backend_value)? {
        Entity::Backend(spec) => spec,
        other => return Err(unexpected_entity(BACKEND_CLASS, &other)),
    };

    let mut state = ExperimentState::new(scenario, backend);
    if let Some(roles) = envelope::field(STATE_CLASS, args, "roles", "a list of strings")? {
        state.roles = roles;
    }
    if let Some(value) = args.get("graph") {
        state.graph = match registry.decode(value)? {
            Entity::Graph(graph) => graph,
            other => return Err(unexpected_entity(GRAPH_CLASS, &other)),
        };
    }
    Ok(Entity::State(state))
}

fn decode_graph_args(
    registry: &TypeRegistry,
    args: &Map<String, Value>,
) -> Result<Entity, StateError> {
    let mut graph = CausalGraph::new();

    // Replay the discovery order first so node insertion cannot reorder it.
    if let Some(names) =
        envelope::field::<Vec<String>>(GRAPH_CLASS, args, "variables", "a list of strings")?
    {
        for name in &names {
            graph.push_name(name);
        }
    }

    if let Some(value) = args.get("nodes") {
        let nodes = value
            .as_object()
            .ok_or_else(|| StateError::WrongType {
                class: GRAPH_CLASS.to_string(),
                field: "nodes".to_string(),
                expected: "a map of variable envelopes",
            })?;
        for (name, encoded) in nodes {
            let node = match registry.decode(encoded)? {
                Entity::Variable(node) => node,
                other => {
                    return Err(StateError::InvalidEnvelope(format!(
                        "graph node '{name}' decoded to '{}' instead of a variable",
                        other.class()
                    )))
                }
            };
            graph.insert_node(node);
        }
    }

    if let Some(value) = args.get("edges") {
        let edges = value
            .as_object()
            .ok_or_else(|| StateError::WrongType {
                class: GRAPH_CLASS.to_string(),
                field: "edges".to_string(),
                expected: "a map of child sets",
            })?;
        for (cause, children) in edges {
            for child in envelope::decode_set(GRAPH_CLASS, "edges", children)? {
                graph.add_edge(cause, &child);
            }
        }
    }

    Ok(Entity::Graph(graph))
}

fn decode_exogenous_args(
    _registry: &TypeRegistry,
    args: &Map<String, Value>,
) -> Result<Entity, StateError> {
    Ok(Entity::Variable(variable_from_args(
        EXOGENOUS_CLASS,
        VariableKind::Exogenous,
        args,
    )?))
}

fn decode_endogenous_args(
    _registry: &TypeRegistry,
    args: &Map<String, Value>,
) -> Result<Entity, StateError> {
    Ok(Entity::Variable(variable_from_args(
        ENDOGENOUS_CLASS,
        VariableKind::Endogenous,
        args,
    )?))
}

fn variable_from_args(
    class: &str,
    kind: VariableKind,
    args: &Map<String, Value>,
) -> Result<VariableNode, StateError> {
    let name = envelope::require_str(class, args, "name")?;
    let mut node = VariableNode::new(name, kind);

    if let Some(value) = envelope::field(class, args, "variable_type", "a variable type string")? {
        node.variable_type = value;
    }
    if let Some(value) = envelope::field(class, args, "operationalization", "a string")? {
        node.operationalization = value;
    }
    if let Some(value) = envelope::field(class, args, "units", "a string")? {
        node.units = value;
    }
    if let Some(value) = envelope::field(class, args, "levels", "a list of strings")? {
        node.levels = value;
    }
    if let Some(value) = args.get("causes") {
        node.causes = envelope::decode_set(class, "causes", value)?;
    }
    if let Some(value) = args.get("descendant_outcomes") {
        node.descendant_outcomes = envelope::decode_set(class, "descendant_outcomes", value)?;
    }
    if let Some(value) = args.get("possible_covariates") {
        node.possible_covariates = envelope::decode_set(class, "possible_covariates", value)?;
    }
    if let Some(value) = envelope::field(class, args, "measurement", "a measurement spec")? {
        node.measurement = value;
    }
    if let Some(value) = envelope::field(class, args, "variation", "an attribute variation")? {
        node.variation = value;
    }
    if let Some(value) = envelope::field(class, args, "scope", "a variation scope")? {
        node.scope = value;
    }
    if let Some(value) = envelope::field(class, args, "visibility", "a visibility choice")? {
        node.visibility = value;
    }

    Ok(node)
}

fn decode_backend_args(
    _registry: &TypeRegistry,
    args: &Map<String, Value>,
) -> Result<Entity, StateError> {
    let family = envelope::require_str(BACKEND_CLASS, args, "family")?;
    let model = envelope::require_str(BACKEND_CLASS, args, "model")?;
    let mut spec = BackendSpec::new(family, model);

    if let Some(value) = envelope::field(BACKEND_CLASS, args, "temperature", "a number")? {
        spec.temperature = value;
    }
    if let Some(value) = envelope::field(BACKEND_CLASS, args, "max_tokens", "an integer or null")? {
        spec.max_tokens = value;
    }
    if let Some(value) = envelope::field(BACKEND_CLASS, args, "system_prompt", "a string")? {
        spec.system_prompt = value;
    }
    Ok(Entity::Backend(spec))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::graph::{
        AttributeVariation, MeasurementSpec, VariableType, VariationScope, VariationVisibility,
        Visibility,
    };

    fn string_set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn outcome_node() -> VariableNode {
        let mut node = VariableNode::new("sale price", VariableKind::Endogenous);
        node.variable_type = VariableType::Continuous;
        node.operationalization = "final agreed price in dollars".to_string();
        node.units = "dollars".to_string();
        node.levels = vec!["3000".to_string(), "5000".to_string(), "7000".to_string()];
        node.causes = string_set(&["buyer budget"]);
        node.descendant_outcomes = string_set(&[]);
        node.possible_covariates = string_set(&["seller urgency"]);
        node.measurement = Some(MeasurementSpec {
            questions: [
                ("buyer".to_string(), "What price did you agree to?".to_string()),
                ("oracle".to_string(), "What was the final price?".to_string()),
            ]
            .into_iter()
            .collect(),
            aggregation: "average".to_string(),
        });
        node
    }

    fn budget_node() -> VariableNode {
        let mut node = VariableNode::new("buyer budget", VariableKind::Exogenous);
        node.variable_type = VariableType::Continuous;
        node.units = "dollars".to_string();
        node.descendant_outcomes = string_set(&["sale price"]);
        node.variation = Some(AttributeVariation {
            attribute_name: "your maximum budget".to_string(),
            attribute_values: vec!["4000".to_string(), "8000".to_string()],
            varied_agent: "buyer".to_string(),
        });
        node.scope = Some(VariationScope::Individual);
        node.visibility = Some(VariationVisibility {
            choice: Visibility::Private,
            public_name: String::new(),
            public_values: Vec::new(),
        });
        node
    }

    fn fixture_graph() -> CausalGraph {
        let mut graph = CausalGraph::new();
        graph.insert_node(outcome_node());
        graph.insert_node(budget_node());
        graph.add_edge("buyer budget", "sale price");
        graph
    }

    #[test]
    fn test_variable_round_trip_restores_every_field() {
        let original = outcome_node();
        let encoded = encode_variable(&original).unwrap();
        let registry = TypeRegistry::builtin();

        match registry.decode(&encoded).unwrap() {
            Entity::Variable(decoded) => assert_eq!(decoded, original),
            other => panic!("decoded to {}", other.class()),
        }
    }

    #[test]
    fn test_variable_class_discriminator_follows_the_kind() {
        let encoded = encode_variable(&budget_node()).unwrap();
        let class = encoded.get("class").and_then(|v| v.as_str());
        assert_eq!(class, Some("ExogenousVariable"));

        let registry = TypeRegistry::builtin();
        match registry.decode(&encoded).unwrap() {
            Entity::Variable(decoded) => {
                assert_eq!(decoded.kind, VariableKind::Exogenous);
                assert_eq!(decoded, budget_node());
            }
            other => panic!("decoded to {}", other.class()),
        }
    }

    #[test]
    fn test_variable_sets_travel_as_set_wrappers() {
        let encoded = encode_variable(&outcome_node()).unwrap();
        let causes = encoded
            .get("args")
            .and_then(|args| args.get("causes"))
            .cloned();
        assert_eq!(causes, Some(json!({ "__set__": ["buyer budget"] })));
    }

    #[test]
    fn test_construct_then_patch_keeps_defaults_for_absent_args() {
        let registry = TypeRegistry::builtin();
        let minimal = json!({
            "class": "EndogenousVariable",
            "args": { "name": "sale price" }
        });

        match registry.decode(&minimal).unwrap() {
            Entity::Variable(node) => {
                assert_eq!(node.name, "sale price");
                assert_eq!(node.kind, VariableKind::Endogenous);
                assert_eq!(node.variable_type, VariableType::Continuous);
                assert!(node.units.is_empty());
                assert!(node.causes.is_empty());
                assert!(node.measurement.is_none());
            }
            other => panic!("decoded to {}", other.class()),
        }
    }

    #[test]
    fn test_missing_constructor_arg_is_reported() {
        let registry = TypeRegistry::builtin();
        let no_name = json!({ "class": "ExogenousVariable", "args": {} });

        let error = registry.decode(&no_name).unwrap_err();
        assert!(matches!(
            error,
            StateError::MissingField { ref class, ref field }
                if class == "ExogenousVariable" && field == "name"
        ));
    }

    #[test]
    fn test_unknown_class_is_reported() {
        let registry = TypeRegistry::builtin();
        let envelope = json!({ "class": "Widget", "args": {} });

        let error = registry.decode(&envelope).unwrap_err();
        assert!(matches!(error, StateError::UnknownClass(ref class) if class == "Widget"));
    }

    #[test]
    fn test_graph_round_trip_preserves_order_nodes_and_edges() {
        let original = fixture_graph();
        let encoded = encode_graph(&original).unwrap();
        let registry = TypeRegistry::builtin();

        let decoded = registry.decode_graph(&encoded).unwrap();
        assert_eq!(decoded.names(), original.names());
        assert_eq!(decoded.edges(), original.edges());
        assert_eq!(decoded.node("sale price"), original.node("sale price"));
        assert_eq!(decoded.node("buyer budget"), original.node("buyer budget"));
        assert!(decoded.is_acyclic());
    }

    #[test]
    fn test_graph_order_survives_alphabetical_node_maps() {
        // "sale price" sorts after "buyer budget", so order must come from
        // the persisted list rather than from map iteration.
        let original = fixture_graph();
        assert_eq!(original.names()[0], "sale price");

        let encoded = encode_graph(&original).unwrap();
        let decoded = TypeRegistry::builtin().decode_graph(&encoded).unwrap();
        assert_eq!(decoded.names()[0], "sale price");
        assert_eq!(decoded.outcome_name(), Some("sale price"));
    }

    #[test]
    fn test_backend_round_trip_restores_patched_fields() {
        let original = BackendSpec::new("openai", "gpt-4o")
            .with_temperature(0.2)
            .with_max_tokens(900)
            .with_system_prompt("Answer tersely.");
        let encoded = encode_backend(&original).unwrap();

        let registry = TypeRegistry::builtin();
        match registry.decode(&encoded).unwrap() {
            Entity::Backend(decoded) => {
                assert_eq!(decoded.family, "openai");
                assert_eq!(decoded.model, "gpt-4o");
                assert_eq!(decoded.temperature, 0.2);
                assert_eq!(decoded.max_tokens, Some(900));
                assert_eq!(decoded.system_prompt, "Answer tersely.");
            }
            other => panic!("decoded to {}", other.class()),
        }
    }

    #[test]
    fn test_state_round_trip_restores_every_field() {
        let mut state = ExperimentState::new(
            "a used car negotiation",
            BackendSpec::new("openai", "gpt-4o").with_temperature(0.7),
        );
        state.roles = vec!["buyer".to_string(), "seller".to_string()];
        state.graph = fixture_graph();

        let encoded = encode_state(&state).unwrap();
        let registry = TypeRegistry::builtin();
        let decoded = registry.decode_state(&encoded).unwrap();

        assert_eq!(decoded.scenario, state.scenario);
        assert_eq!(decoded.roles, state.roles);
        assert_eq!(decoded.backend.family, "openai");
        assert_eq!(decoded.backend.temperature, 0.7);
        assert_eq!(decoded.graph.names(), state.graph.names());
        assert_eq!(decoded.graph.edges(), state.graph.edges());
        assert_eq!(
            decoded.graph.node("buyer budget"),
            state.graph.node("buyer budget")
        );
    }

    #[test]
    fn test_nested_slot_with_the_wrong_entity_errors() {
        let graph_envelope = encode_graph(&fixture_graph()).unwrap();
        let state = json!({
            "class": "ExperimentState",
            "args": {
                "scenario": "a used car negotiation",
                "backend": graph_envelope,
            }
        });

        let error = TypeRegistry::builtin().decode_state(&state).unwrap_err();
        assert!(matches!(error, StateError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_decode_state_rejects_other_entities() {
        let registry = TypeRegistry::builtin();
        let encoded = encode_graph(&fixture_graph()).unwrap();

        let error = registry.decode_state(&encoded).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("ExperimentState"));
        assert!(message.contains("CausalGraph"));
    }

    #[test]
    fn test_unrecognized_args_keys_are_ignored() {
        let registry = TypeRegistry::builtin();
        let envelope = json!({
            "class": "BackendSpec",
            "args": {
                "family": "openai",
                "model": "gpt-4o",
                "retired_knob": true,
            }
        });

        match registry.decode(&envelope).unwrap() {
            Entity::Backend(spec) => assert_eq!(spec.model, "gpt-4o"),
            other => panic!("decoded to {}", other.class()),
        }
    }
}
