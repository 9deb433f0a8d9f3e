//! Agent profiles: assembly from the causal model, instantiated personas,
//! and the public projection other participants are allowed to see.

pub mod assembler;
pub mod error;
pub mod persona;

pub use assembler::{
    AgentAttributeAssembler, AssembledAgents, VariationEntry, VariationSpace, VariationTarget,
    DEFAULT_CONSISTENCY_PASSES,
};
pub use error::{AgentError, AgentResult};
pub use persona::{
    render_history, AgentRoster, AgentTemplate, Persona, Statement, CONSTRAINT_KEY, GOAL_KEY,
    INTERNAL_PREFIX, NAME_KEY, ROLE_KEY,
};
