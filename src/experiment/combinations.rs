//! Cartesian expansion of the variation space into concrete combinations.
//!
//! Each varied variable contributes one digit to a mixed-radix counter;
//! the last variable's digit moves fastest, so combination 0 holds every
//! variable's first value and combination 1 increments only the last
//! variable. A combination owns a fresh copy of the agent templates with
//! its values filled in, plus the variable-to-value assignment the survey
//! reads back.

use std::collections::BTreeMap;

use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::{AgentTemplate, AssembledAgents};
use crate::error::CombinationError;

/// One cell of the experimental design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combination {
    /// Position in the full enumeration, stable across subsampling.
    pub index: usize,
    /// Varied variable name to the value this cell assigns it.
    pub assignment: BTreeMap<String, String>,
    /// Agent templates with this cell's values filled in.
    pub templates: Vec<AgentTemplate>,
}

impl Combination {
    /// Filesystem-safe identifier for checkpoint files, built from the
    /// assignment so reruns with the same design resume the same cells.
    pub fn slug(&self) -> String {
        if self.assignment.is_empty() {
            return format!("combination_{}", self.index);
        }
        self.assignment
            .iter()
            .map(|(variable, value)| slug_component(&format!("{variable}_{value}")))
            .collect::<Vec<_>>()
            .join("__")
    }
}

fn slug_component(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Expands assembled agents into every combination of varied values.
pub struct CombinationExpander {
    assembled: AssembledAgents,
}

impl CombinationExpander {
    pub fn new(assembled: AssembledAgents) -> Self {
        Self { assembled }
    }

    /// Number of cells in the full enumeration. A variable with no values
    /// still counts as one digit position; an empty variation space means
    /// a single base combination.
    pub fn combination_count(&self) -> usize {
        self.assembled
            .variation
            .entries()
            .iter()
            .map(|entry| entry.radix().max(1))
            .product()
    }

    /// Enumerate every combination in index order.
    pub fn expand(&self) -> Result<Vec<Combination>, CombinationError> {
        self.validate_roles()?;
        let total = self.combination_count();
        debug!(combinations = total, "expanding variation space");
        Ok((0..total).map(|index| self.combination_at(index)).collect())
    }

    /// Every role named by a variation target must have a base template.
    fn validate_roles(&self) -> Result<(), CombinationError> {
        for entry in self.assembled.variation.entries() {
            for target in &entry.targets {
                if !self
                    .assembled
                    .templates
                    .iter()
                    .any(|template| template.role == target.role)
                {
                    return Err(CombinationError::UnknownRole(target.role.clone()));
                }
            }
        }
        Ok(())
    }

    fn combination_at(&self, index: usize) -> Combination {
        let entries = self.assembled.variation.entries();
        let radices: Vec<usize> = entries.iter().map(|entry| entry.radix().max(1)).collect();

        let mut digits = vec![0usize; radices.len()];
        let mut rest = index;
        for position in (0..radices.len()).rev() {
            digits[position] = rest % radices[position];
            rest /= radices[position];
        }

        let mut assignment = BTreeMap::new();
        let mut templates = self.assembled.templates.clone();
        for (entry, &digit) in entries.iter().zip(&digits) {
            if let Some(value) = entry.values.get(digit) {
                assignment.insert(entry.variable.clone(), value.clone());
            }
            for target in &entry.targets {
                // A target with a shorter value list skips digits past its
                // end rather than wrapping.
                let Some(value) = target.values.get(digit) else {
                    continue;
                };
                if let Some(template) = templates
                    .iter_mut()
                    .find(|template| template.role == target.role)
                {
                    template
                        .attributes
                        .insert(target.attribute.clone(), value.clone());
                }
            }
        }

        Combination {
            index,
            assignment,
            templates,
        }
    }
}

/// Keep a random fraction of the combinations, without replacement,
/// returned in index order. A single-cell list passes through untouched.
pub fn subsample(
    combinations: Vec<Combination>,
    proportion: f64,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<Combination>, CombinationError> {
    if proportion > 1.000001 || proportion <= 0.0 {
        return Err(CombinationError::ProportionOutOfRange(proportion));
    }
    if combinations.len() <= 1 {
        return Ok(combinations);
    }
    let keep = (combinations.len() as f64 * proportion).ceil() as usize;
    let mut kept: Vec<Combination> = combinations
        .choose_multiple(rng, keep)
        .cloned()
        .collect();
    kept.sort_by_key(|combination| combination.index);
    debug!(kept = kept.len(), out_of = combinations.len(), "subsampled combinations");
    Ok(kept)
}
