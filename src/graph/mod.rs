//! Causal model construction.
//!
//! [`variable`] defines the node types the model is made of, [`elicit`]
//! runs the collaborator queries that fill a node in (operationalization,
//! type, levels, measurement questions, experimental variation), and
//! [`builder`] assembles nodes into the causal graph: outcome first, then
//! causes discovered recursively to a depth bound.

pub mod builder;
pub mod elicit;
pub mod variable;

pub use builder::{sanitize_name, CausalGraph, CausalGraphBuilder};
pub use elicit::VariableElicitor;
pub use variable::{
    AttributeVariation, MeasurementSpec, VariableKind, VariableNode, VariableType, VariationScope,
    VariationVisibility, Visibility, SCENARIO_WIDE,
};
