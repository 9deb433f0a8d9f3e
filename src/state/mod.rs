//! Persistence for in-progress scenarios.
//!
//! A scenario built across several CLI invocations (propose roles, build
//! the graph, edit it, run the batch) keeps its state in one JSON file.
//! Every entity in that file is a `{"class", "args"}` envelope; decoding
//! routes the discriminator through a [`TypeRegistry`] built at startup
//! and reconstructs each entity in two phases, constructor arguments
//! first and the remaining fields patched on afterwards.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::StateError;

mod envelope;
mod model;

pub use model::{
    encode_backend, encode_graph, encode_state, encode_variable, Entity, ExperimentState,
    TypeRegistry, BACKEND_CLASS, ENDOGENOUS_CLASS, EXOGENOUS_CLASS, GRAPH_CLASS, STATE_CLASS,
};

/// Write the experiment state to `path` as a pretty-printed envelope.
pub fn save_state(path: &Path, state: &ExperimentState) -> Result<(), StateError> {
    let encoded = encode_state(state)?;
    fs::write(path, serde_json::to_string_pretty(&encoded)?)?;
    info!(path = %path.display(), "saved experiment state");
    Ok(())
}

/// Load an experiment state previously written by [`save_state`].
///
/// A missing file surfaces as [`StateError::Io`]; a file whose envelopes
/// do not decode is a fatal state error, never a silent fresh start.
pub fn load_state(path: &Path, registry: &TypeRegistry) -> Result<ExperimentState, StateError> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    let state = registry.decode_state(&value)?;
    info!(
        path = %path.display(),
        scenario = %state.scenario,
        variables = state.graph.len(),
        "loaded experiment state"
    );
    Ok(state)
}
