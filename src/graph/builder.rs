//! Causal-model arena and the drivers that grow it.
//!
//! [`CausalGraph`] is the arena: nodes keyed by name, the cause-to-children
//! edge relation, and the insertion order of variable names. All structural
//! mutation (wiring, removal, value edits) happens here with no model
//! involvement. [`CausalGraphBuilder`] layers the collaborator on top: it
//! elicits nodes through a [`VariableElicitor`] and expands the graph
//! recursively from a single outcome, or one manually chosen cause at a
//! time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GraphError;
use crate::graph::elicit::VariableElicitor;
use crate::graph::variable::{VariableKind, VariableNode};

/// Depth at which recursive expansion stops branching.
pub const DEFAULT_MAX_DEPTH: usize = 2;
/// Causes proposed per endogenous node during recursive expansion.
pub const DEFAULT_CAUSES_PER_NODE: usize = 1;

/// Replace spaces with underscores and drop apostrophes, for names used as
/// identifiers in exported structures.
pub fn sanitize_name(name: &str) -> String {
    name.replace(' ', "_").replace('\'', "")
}

/// The causal model: an arena of variable nodes plus the edge relation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CausalGraph {
    nodes: BTreeMap<String, VariableNode>,
    /// Cause name to the set of variables it feeds into.
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Variable names in the order they entered the model. Names appear
    /// here as soon as they are proposed, possibly before their node is
    /// built.
    order: Vec<String>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a node has been built for `name`. Names wired into the edge
    /// relation but not yet built do not count.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&VariableNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut VariableNode> {
        self.nodes.get_mut(name)
    }

    /// Like [`CausalGraph::node`] but with the standard lookup error.
    pub fn expect_node(&self, name: &str) -> Result<&VariableNode, GraphError> {
        self.node(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))
    }

    /// Insert a built node. The name must already be in the order list
    /// (use [`CausalGraph::push_name`] when wiring it).
    pub fn insert_node(&mut self, node: VariableNode) {
        self.push_name(&node.name);
        self.nodes.insert(node.name.clone(), node);
    }

    /// Record a variable name in insertion order. Idempotent.
    pub fn push_name(&mut self, name: &str) {
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
    }

    /// Variable names in insertion order, built or pending.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Built nodes in insertion order.
    pub fn variables(&self) -> impl Iterator<Item = &VariableNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn exogenous(&self) -> impl Iterator<Item = &VariableNode> {
        self.variables()
            .filter(|node| node.kind == VariableKind::Exogenous)
    }

    pub fn endogenous(&self) -> impl Iterator<Item = &VariableNode> {
        self.variables()
            .filter(|node| node.kind == VariableKind::Endogenous)
    }

    /// The first variable entered into the model, by convention the
    /// scenario's outcome.
    pub fn outcome_name(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Wire `cause` into `child` without any integrity checks; the callers
    /// in this module check first.
    pub(crate) fn add_edge(&mut self, cause: &str, child: &str) {
        self.edges
            .entry(cause.to_string())
            .or_default()
            .insert(child.to_string());
    }

    pub fn children(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    pub fn edges(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.edges
    }

    /// Every variable reachable downstream of `name`. Names without
    /// outgoing edges yield an empty set.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .edges
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                if let Some(children) = self.edges.get(current) {
                    stack.extend(children.iter().map(String::as_str));
                }
            }
        }
        seen
    }

    /// No variable is downstream of itself.
    pub fn is_acyclic(&self) -> bool {
        self.order
            .iter()
            .all(|name| !self.descendants(name).contains(name))
    }

    /// Manually wire an edge from `cause` into `child`, recording the
    /// cause on the child node. The cause node itself may be built later
    /// with [`CausalGraphBuilder::build_added_cause`]. Fails when the edge
    /// would close a cycle.
    pub fn add_cause(&mut self, child: &str, cause: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(child) {
            return Err(GraphError::UnknownVariable(child.to_string()));
        }
        if self.descendants(child).contains(cause) {
            return Err(GraphError::RepeatedCause {
                cause: cause.to_string(),
                child: child.to_string(),
            });
        }
        self.add_edge(cause, child);
        self.push_name(cause);
        if let Some(node) = self.nodes.get_mut(child) {
            node.add_causes([cause]);
        }
        Ok(())
    }

    /// Remove `cause` from `child` and delete the cause outright: its
    /// edge, its place in the order, and its node. Fails when any other
    /// node still lists the cause, which would leave a dangling reference.
    pub fn remove_cause(&mut self, child: &str, cause: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(child) {
            return Err(GraphError::UnknownVariable(child.to_string()));
        }
        if !self.order.iter().any(|n| n == cause) {
            return Err(GraphError::UnknownVariable(cause.to_string()));
        }
        if let Some(holder) = self
            .nodes
            .values()
            .find(|node| node.name != child && node.causes.contains(cause))
        {
            return Err(GraphError::DanglingCause {
                variable: cause.to_string(),
                referenced_by: holder.name.clone(),
            });
        }

        if let Some(children) = self.edges.get_mut(cause) {
            children.remove(child);
            if children.is_empty() {
                self.edges.remove(cause);
            }
        }
        self.order.retain(|n| n != cause);
        if let Some(node) = self.nodes.get_mut(child) {
            node.remove_cause(cause);
        }
        self.nodes.remove(cause);
        Ok(())
    }

    /// Replace the induced variation values of a numeric variable.
    /// Binary, ordinal, and nominal values are tied to their level labels
    /// and cannot be edited.
    pub fn edit_variation_values(
        &mut self,
        variable: &str,
        values: Vec<String>,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(variable)
            .ok_or_else(|| GraphError::UnknownVariable(variable.to_string()))?;
        if node.variable_type.has_semantic_levels() {
            return Err(GraphError::VariationNotEditable {
                variable: variable.to_string(),
                variable_type: node.variable_type.to_string(),
            });
        }
        match node.variation.as_mut() {
            Some(variation) => {
                variation.attribute_values = values;
                Ok(())
            }
            None => Err(GraphError::MissingVariation(variable.to_string())),
        }
    }

    /// Edge relation with identifier-safe names, children sorted.
    pub fn export_edges(&self) -> BTreeMap<String, Vec<String>> {
        self.edges
            .iter()
            .map(|(cause, children)| {
                (
                    sanitize_name(cause),
                    children.iter().map(|c| sanitize_name(c)).collect(),
                )
            })
            .collect()
    }

    /// Built nodes as a JSON object keyed `Variable1`, `Variable2`, ... in
    /// insertion order.
    pub fn export_variables(&self) -> Result<serde_json::Value, GraphError> {
        let mut exported = serde_json::Map::new();
        for (index, node) in self.variables().enumerate() {
            exported.insert(
                format!("Variable{}", index + 1),
                serde_json::to_value(node)?,
            );
        }
        Ok(serde_json::Value::Object(exported))
    }
}

/// Grows a [`CausalGraph`] by eliciting nodes from the collaborator.
pub struct CausalGraphBuilder {
    elicitor: VariableElicitor,
    max_depth: usize,
    causes_per_node: usize,
}

impl CausalGraphBuilder {
    pub fn new(elicitor: VariableElicitor) -> Self {
        Self {
            elicitor,
            max_depth: DEFAULT_MAX_DEPTH,
            causes_per_node: DEFAULT_CAUSES_PER_NODE,
        }
    }

    /// Depth past which endogenous nodes get a single further cause.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Causes proposed per endogenous node during recursive expansion.
    pub fn with_causes_per_node(mut self, causes_per_node: usize) -> Self {
        self.causes_per_node = causes_per_node;
        self
    }

    /// Build the whole model: the outcome, its proposed causes, and every
    /// endogenous cause's own causes, recursively.
    pub async fn build(
        &self,
        outcome: &str,
        num_causes: usize,
    ) -> Result<CausalGraph, GraphError> {
        let mut graph = CausalGraph::new();
        let roots = self.build_root(&mut graph, outcome, num_causes).await?;

        for cause in &roots {
            if graph.contains(cause) {
                return Err(GraphError::RepeatedCause {
                    cause: cause.clone(),
                    child: outcome.to_string(),
                });
            }
            self.expand(&mut graph, cause, &roots, self.causes_per_node, 0)
                .await?;
        }
        info!(
            variables = graph.len(),
            outcome, "causal model build complete"
        );
        Ok(graph)
    }

    /// Build the outcome node and wire its proposed causes, without
    /// building them. Returns the proposed cause names.
    pub async fn build_root(
        &self,
        graph: &mut CausalGraph,
        outcome: &str,
        num_causes: usize,
    ) -> Result<Vec<String>, GraphError> {
        let mut node = self.elicitor.build_outcome(outcome).await?;
        let causes = if num_causes > 0 {
            self.elicitor.propose_causes(outcome, num_causes, &[]).await?
        } else {
            Vec::new()
        };
        node.add_causes(causes.iter().cloned());
        graph.insert_node(node);
        for cause in &causes {
            graph.add_edge(cause, outcome);
            graph.push_name(cause);
        }
        Ok(causes)
    }

    /// Recursively build `name` and, when it turns out endogenous, its own
    /// causes. `depth` counts recursion levels: past `max_depth` each
    /// endogenous node gets a single further cause so the recursion
    /// narrows instead of branching.
    ///
    /// A proposed cause whose node already exists aborts the whole build:
    /// silently skipping it could hide an actual cycle.
    pub async fn expand(
        &self,
        graph: &mut CausalGraph,
        name: &str,
        possible_covariates: &[String],
        num_causes: usize,
        depth: usize,
    ) -> Result<(), GraphError> {
        let descendants = graph.descendants(name);
        let outcomes_label = if descendants.is_empty() {
            graph.outcome_name().unwrap_or(name).to_string()
        } else {
            descendants.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let covariate_nodes: Vec<&VariableNode> = possible_covariates
            .iter()
            .filter(|c| c.as_str() != name && !descendants.contains(c.as_str()))
            .filter_map(|c| graph.node(c))
            .collect();

        let mut node = self
            .elicitor
            .build_cause(name, &outcomes_label, &covariate_nodes)
            .await?;
        node.descendant_outcomes = descendants;
        node.set_possible_covariates(possible_covariates.iter().cloned());

        match node.kind {
            VariableKind::Exogenous => {
                graph.insert_node(node);
            }
            VariableKind::Endogenous => {
                let proposed = self
                    .elicitor
                    .propose_causes(name, num_causes, graph.names())
                    .await?;
                node.add_causes(proposed.iter().cloned());
                graph.insert_node(node);

                // Wire every cause before building any of them, so each
                // build sees the full downstream picture.
                for cause in &proposed {
                    graph.add_edge(cause, name);
                    graph.push_name(cause);
                }
                for cause in &proposed {
                    if graph.contains(cause) {
                        warn!(cause, child = name, "proposed cause already built");
                        return Err(GraphError::RepeatedCause {
                            cause: cause.clone(),
                            child: name.to_string(),
                        });
                    }
                    let next_causes = if depth >= self.max_depth {
                        1
                    } else {
                        num_causes
                    };
                    Box::pin(self.expand(
                        graph,
                        cause,
                        possible_covariates,
                        next_causes,
                        depth + 1,
                    ))
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Propose `count` fresh causes for an existing variable without
    /// touching the graph; the caller decides which to add.
    pub async fn candidate_causes(
        &self,
        graph: &CausalGraph,
        variable: &str,
        count: usize,
    ) -> Result<Vec<String>, GraphError> {
        let node = graph.expect_node(variable)?;
        let existing: Vec<String> = node.causes.iter().cloned().collect();
        let proposed = self
            .elicitor
            .propose_causes(variable, count, &existing)
            .await?;
        Ok(proposed
            .into_iter()
            .filter(|cause| !node.causes.contains(cause))
            .collect())
    }

    /// Build the node for a cause previously wired with
    /// [`CausalGraph::add_cause`]. Covariates are every other variable the
    /// cause is not downstream of.
    pub async fn build_added_cause(
        &self,
        graph: &mut CausalGraph,
        name: &str,
    ) -> Result<(), GraphError> {
        if !graph.names().iter().any(|n| n == name) {
            return Err(GraphError::UnknownVariable(name.to_string()));
        }
        let possible_covariates: Vec<String> = graph
            .names()
            .iter()
            .filter(|n| n.as_str() != name)
            .cloned()
            .collect();
        self.expand(graph, name, &possible_covariates, self.causes_per_node, 0)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::variable::{AttributeVariation, VariableType};
    use crate::llm::{BackendSpec, ScriptedBackend};
    use crate::prompts::PromptLibrary;
    use std::sync::Arc;

    fn graph_with(names: &[(&str, VariableKind)]) -> CausalGraph {
        let mut graph = CausalGraph::new();
        for (name, kind) in names {
            graph.insert_node(VariableNode::new(*name, *kind));
        }
        graph
    }

    #[test]
    fn test_descendants_walks_transitively() {
        let mut graph = CausalGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "d");

        let descendants = graph.descendants("a");
        assert_eq!(
            descendants,
            ["b", "c", "d"].iter().map(|s| s.to_string()).collect()
        );
        assert!(graph.descendants("d").is_empty());
        assert!(graph.descendants("never seen").is_empty());
    }

    #[test]
    fn test_push_name_is_idempotent() {
        let mut graph = CausalGraph::new();
        graph.push_name("outcome");
        graph.push_name("cause");
        graph.push_name("outcome");
        assert_eq!(graph.names(), ["outcome", "cause"]);
    }

    #[test]
    fn test_add_cause_wires_edge_and_child() {
        let mut graph = graph_with(&[("outcome", VariableKind::Endogenous)]);
        graph.add_cause("outcome", "budget").unwrap();

        assert!(graph.children("budget").unwrap().contains("outcome"));
        assert!(graph.node("outcome").unwrap().causes.contains("budget"));
        assert_eq!(graph.names(), ["outcome", "budget"]);
        // The cause itself is wired but not yet built.
        assert!(!graph.contains("budget"));
    }

    #[test]
    fn test_add_cause_rejects_cycles() {
        let mut graph = graph_with(&[
            ("outcome", VariableKind::Endogenous),
            ("budget", VariableKind::Exogenous),
        ]);
        graph.add_cause("outcome", "budget").unwrap();

        let err = graph.add_cause("budget", "outcome").unwrap_err();
        assert!(matches!(err, GraphError::RepeatedCause { cause, child }
            if cause == "outcome" && child == "budget"));
    }

    #[test]
    fn test_remove_cause_deletes_node_edge_and_reference() {
        let mut graph = graph_with(&[
            ("outcome", VariableKind::Endogenous),
            ("budget", VariableKind::Exogenous),
        ]);
        graph.add_cause("outcome", "budget").unwrap();

        graph.remove_cause("outcome", "budget").unwrap();
        assert!(!graph.contains("budget"));
        assert!(graph.children("budget").is_none());
        assert!(!graph.node("outcome").unwrap().causes.contains("budget"));
        assert_eq!(graph.names(), ["outcome"]);
    }

    #[test]
    fn test_remove_cause_fails_when_still_referenced() {
        let mut graph = graph_with(&[
            ("outcome", VariableKind::Endogenous),
            ("mediator", VariableKind::Endogenous),
            ("budget", VariableKind::Exogenous),
        ]);
        graph.add_cause("outcome", "budget").unwrap();
        graph.add_cause("mediator", "budget").unwrap();

        let err = graph.remove_cause("outcome", "budget").unwrap_err();
        assert!(matches!(err, GraphError::DanglingCause { variable, referenced_by }
            if variable == "budget" && referenced_by == "mediator"));
        // Nothing was removed.
        assert!(graph.contains("budget"));
        assert!(graph.node("outcome").unwrap().causes.contains("budget"));
    }

    #[test]
    fn test_remove_cause_unknown_names() {
        let mut graph = graph_with(&[("outcome", VariableKind::Endogenous)]);
        assert!(matches!(
            graph.remove_cause("missing", "budget"),
            Err(GraphError::UnknownVariable(_))
        ));
        assert!(matches!(
            graph.remove_cause("outcome", "budget"),
            Err(GraphError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_edit_variation_values() {
        let mut graph = CausalGraph::new();
        let mut node = VariableNode::new("budget", VariableKind::Exogenous);
        node.variable_type = VariableType::Continuous;
        node.variation = Some(AttributeVariation {
            attribute_name: "your budget".to_string(),
            attribute_values: vec!["10".to_string(), "20".to_string()],
            varied_agent: "buyer".to_string(),
        });
        graph.insert_node(node);

        graph
            .edit_variation_values("budget", vec!["5".to_string(), "50".to_string()])
            .unwrap();
        let values = &graph.node("budget").unwrap().variation.as_ref().unwrap().attribute_values;
        assert_eq!(values, &["5".to_string(), "50".to_string()]);
    }

    #[test]
    fn test_edit_variation_values_rejects_semantic_levels() {
        let mut graph = CausalGraph::new();
        let mut node = VariableNode::new("patience", VariableKind::Exogenous);
        node.variable_type = VariableType::Ordinal;
        graph.insert_node(node);

        let err = graph
            .edit_variation_values("patience", vec!["low".to_string()])
            .unwrap_err();
        assert!(matches!(err, GraphError::VariationNotEditable { .. }));
    }

    #[test]
    fn test_edit_variation_values_requires_variation() {
        let mut graph = CausalGraph::new();
        let mut node = VariableNode::new("budget", VariableKind::Exogenous);
        node.variable_type = VariableType::Continuous;
        graph.insert_node(node);

        let err = graph
            .edit_variation_values("budget", vec!["5".to_string()])
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingVariation(_)));
    }

    #[test]
    fn test_export_sanitizes_names() {
        let mut graph = CausalGraph::new();
        graph.add_edge("buyer's budget", "sale price");

        let exported = graph.export_edges();
        assert_eq!(exported["buyers_budget"], vec!["sale_price"]);
    }

    #[test]
    fn test_export_variables_numbers_in_insertion_order() {
        let graph = graph_with(&[
            ("sale price", VariableKind::Endogenous),
            ("budget", VariableKind::Exogenous),
        ]);
        let exported = graph.export_variables().unwrap();
        assert_eq!(exported["Variable1"]["name"], "sale price");
        assert_eq!(exported["Variable2"]["name"], "budget");
    }

    // === Builder tests drive the whole elicitation over a scripted model ===

    fn builder(backend: Arc<ScriptedBackend>) -> CausalGraphBuilder {
        CausalGraphBuilder::new(VariableElicitor::new(
            backend,
            BackendSpec::new("openai", "gpt-4o"),
            Arc::new(PromptLibrary::builtin()),
            "two people bargaining over a used car",
            vec!["buyer".to_string(), "seller".to_string()],
        ))
    }

    fn outcome_script(responses: &mut Vec<String>) {
        responses.push("draft".to_string());
        responses.push(
            r#"{"variable": "sale price", "operationalization": "final agreed price in dollars", "explanation": "x"}"#
                .to_string(),
        );
        responses.push(r#"{"variable_type": "continuous", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "dollars", "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"levels": ["1000", "3000", "5000", "7000", "9000"], "explanation": "x"}"#
                .to_string(),
        );
        responses.push("draft".to_string());
        responses.push(
            r#"{"questions": {"buyer": "what price?", "seller": "what price?", "oracle": "what price?"}, "aggregation": "average", "explanation": "x"}"#
                .to_string(),
        );
    }

    fn exogenous_cause_script(responses: &mut Vec<String>, name: &str, varied_agent: &str) {
        responses.push("draft".to_string());
        responses.push(format!(
            r#"{{"variable": "{name}", "operationalization": "how much of {name}", "explanation": "x"}}"#
        ));
        responses.push(r#"{"variable_type": "continuous", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "dollars", "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"levels": ["1000", "2000", "3000", "4000", "5000"], "explanation": "x"}"#
                .to_string(),
        );
        responses.push(
            r#"{"when_determined": "before the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push(r#"{"scope": "individual", "explanation": "x"}"#.to_string());
        responses.push("draft".to_string());
        responses.push(format!(
            r#"{{"attribute_name": "your {name}", "attribute_values": ["2000", "4000"], "varied_agent": "{varied_agent}", "explanation": "x"}}"#
        ));
        responses.push(r#"{"choice": "private", "public_name": "", "explanation": "x"}"#.to_string());
    }

    #[tokio::test]
    async fn test_build_outcome_with_one_exogenous_cause() {
        let mut responses = Vec::new();
        outcome_script(&mut responses);
        responses.push(r#"{"causes": ["buyer budget"], "explanation": "x"}"#.to_string());
        exogenous_cause_script(&mut responses, "buyer budget", "buyer");

        let backend = Arc::new(ScriptedBackend::new(responses));
        let graph = builder(backend.clone())
            .build("sale price", 1)
            .await
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.outcome_name(), Some("sale price"));
        assert_eq!(graph.names(), ["sale price", "buyer budget"]);
        assert!(graph.children("buyer budget").unwrap().contains("sale price"));
        assert!(graph.node("sale price").unwrap().causes.contains("buyer budget"));

        let cause = graph.node("buyer budget").unwrap();
        assert_eq!(cause.kind, VariableKind::Exogenous);
        assert_eq!(cause.descendant_outcomes.len(), 1);
        assert!(cause.descendant_outcomes.contains("sale price"));
        assert!(graph.is_acyclic());
        assert_eq!(backend.calls(), 18);
    }

    #[tokio::test]
    async fn test_build_expands_endogenous_mediator() {
        let mut responses = Vec::new();
        outcome_script(&mut responses);
        responses.push(r#"{"causes": ["rapport"], "explanation": "x"}"#.to_string());
        // The mediator is determined during the interaction.
        responses.push("draft".to_string());
        responses.push(
            r#"{"variable": "rapport", "operationalization": "warmth of the exchange", "explanation": "x"}"#
                .to_string(),
        );
        responses.push(r#"{"variable_type": "ordinal", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "warmth level", "explanation": "x"}"#.to_string());
        responses.push(r#"{"levels": ["cold", "neutral", "warm"], "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"when_determined": "during the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push("draft".to_string());
        responses.push(
            r#"{"questions": {"buyer": "how warm?", "seller": "how warm?", "oracle": "how warm?"}, "aggregation": "mode", "explanation": "x"}"#
                .to_string(),
        );
        // The mediator's own cause, exogenous.
        responses.push(r#"{"causes": ["seller friendliness"], "explanation": "x"}"#.to_string());
        exogenous_cause_script(&mut responses, "seller friendliness", "seller");

        let backend = Arc::new(ScriptedBackend::new(responses));
        let graph = builder(backend).build("sale price", 1).await.unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.names(),
            ["sale price", "rapport", "seller friendliness"]
        );
        let mediator = graph.node("rapport").unwrap();
        assert_eq!(mediator.kind, VariableKind::Endogenous);
        assert!(mediator.causes.contains("seller friendliness"));
        assert!(mediator.measurement.is_some());

        // The deepest cause sees both outcomes downstream.
        let leaf = graph.node("seller friendliness").unwrap();
        assert!(leaf.descendant_outcomes.contains("rapport"));
        assert!(leaf.descendant_outcomes.contains("sale price"));
        assert!(graph.is_acyclic());
    }

    #[tokio::test]
    async fn test_build_aborts_on_repeated_cause() {
        let mut responses = Vec::new();
        outcome_script(&mut responses);
        responses.push(r#"{"causes": ["rapport"], "explanation": "x"}"#.to_string());
        responses.push("draft".to_string());
        responses.push(
            r#"{"variable": "rapport", "operationalization": "warmth of the exchange", "explanation": "x"}"#
                .to_string(),
        );
        responses.push(r#"{"variable_type": "ordinal", "explanation": "x"}"#.to_string());
        responses.push(r#"{"units": "warmth level", "explanation": "x"}"#.to_string());
        responses.push(r#"{"levels": ["cold", "neutral", "warm"], "explanation": "x"}"#.to_string());
        responses.push(
            r#"{"when_determined": "during the interaction", "explanation": "x"}"#.to_string(),
        );
        responses.push("draft".to_string());
        responses.push(
            r#"{"questions": {"buyer": "how warm?", "seller": "how warm?", "oracle": "how warm?"}, "aggregation": "mode", "explanation": "x"}"#
                .to_string(),
        );
        // The mediator proposes the already-built outcome as its own cause.
        responses.push(r#"{"causes": ["sale price"], "explanation": "x"}"#.to_string());

        let backend = Arc::new(ScriptedBackend::new(responses));
        let err = builder(backend).build("sale price", 1).await.unwrap_err();
        assert!(matches!(err, GraphError::RepeatedCause { cause, child }
            if cause == "sale price" && child == "rapport"));
    }

    #[tokio::test]
    async fn test_candidate_causes_filters_existing() {
        let mut graph = graph_with(&[("sale price", VariableKind::Endogenous)]);
        graph.add_cause("sale price", "buyer budget").unwrap();

        let backend = Arc::new(ScriptedBackend::new([
            r#"{"causes": ["buyer budget", "seller urgency"], "explanation": "x"}"#,
        ]));
        let candidates = builder(backend)
            .candidate_causes(&graph, "sale price", 2)
            .await
            .unwrap();
        assert_eq!(candidates, vec!["seller urgency"]);
    }

    #[tokio::test]
    async fn test_build_added_cause_requires_wiring_first() {
        let mut graph = graph_with(&[("sale price", VariableKind::Endogenous)]);
        let backend = Arc::new(ScriptedBackend::new(Vec::<String>::new()));
        let err = builder(backend)
            .build_added_cause(&mut graph, "buyer budget")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownVariable(_)));
    }

    #[tokio::test]
    async fn test_build_added_cause_builds_wired_name() {
        let mut graph = graph_with(&[("sale price", VariableKind::Endogenous)]);
        graph.add_cause("sale price", "buyer budget").unwrap();

        let mut responses = Vec::new();
        exogenous_cause_script(&mut responses, "buyer budget", "buyer");
        let backend = Arc::new(ScriptedBackend::new(responses));
        builder(backend)
            .build_added_cause(&mut graph, "buyer budget")
            .await
            .unwrap();

        let node = graph.node("buyer budget").unwrap();
        assert_eq!(node.kind, VariableKind::Exogenous);
        assert!(node.descendant_outcomes.contains("sale price"));
        assert!(node.variation.is_some());
    }
}
