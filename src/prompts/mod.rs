//! Prompt templates for every collaborator query.
//!
//! # Architecture
//!
//! Two layers. [`templates`] holds the built-in prompt texts as string
//! constants, one per query the engine makes: variable elicitation, agent
//! assembly, interaction turns, survey parsing, scenario proposals.
//! [`PromptLibrary`] owns the registered set and renders through tera with
//! strict variables, so a prompt referencing a value the caller forgot to
//! supply fails loudly instead of going to the model half-filled.
//!
//! The built-ins cover the full pipeline; a directory of `.txt` files can
//! override any of them by name for prompt iteration without a rebuild.

pub mod library;
pub mod templates;

pub use library::PromptLibrary;
