//! Experiment configuration.
//!
//! Tunables for a whole experiment run: graph elicitation depth, agent
//! consistency passes, the conversation turn budget, combination
//! subsampling, parallelism, and where checkpoints land. Values come from
//! defaults, `VIGNETTE_`-prefixed environment variables, or builder
//! methods, and are validated before use.

use std::path::PathBuf;

use thiserror::Error;

use crate::agents::DEFAULT_CONSISTENCY_PASSES;
use crate::experiment::runner::DEFAULT_MAX_INTERACTIONS;
use crate::graph::builder::{DEFAULT_CAUSES_PER_NODE, DEFAULT_MAX_DEPTH};

/// Errors that can occur loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Settings for one experiment run.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Statements allowed per conversation.
    pub max_interactions: usize,
    /// Causal-graph elicitation depth.
    pub max_depth: usize,
    /// Causes elicited per node during graph building.
    pub causes_per_node: usize,
    /// Reconciliation passes over the assembled agent profiles.
    pub consistency_passes: usize,
    /// Base seed; each combination runs at `seed + index`.
    pub seed: u64,
    /// Combinations run concurrently.
    pub parallelism: usize,
    /// Directory for checkpoints and results.
    pub output_dir: PathBuf,
    /// Fraction of the expanded combinations to actually run.
    pub subsample_proportion: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            max_interactions: DEFAULT_MAX_INTERACTIONS,
            max_depth: DEFAULT_MAX_DEPTH,
            causes_per_node: DEFAULT_CAUSES_PER_NODE,
            consistency_passes: DEFAULT_CONSISTENCY_PASSES,
            seed: 0,
            parallelism: 1,
            output_dir: PathBuf::from("experiment_logs"),
            subsample_proportion: 1.0,
        }
    }
}

impl ExperimentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the environment, falling back to defaults
    /// for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a set variable fails to parse or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("VIGNETTE_MAX_INTERACTIONS") {
            config.max_interactions = parse_env_value(&val, "VIGNETTE_MAX_INTERACTIONS")?;
        }

        if let Ok(val) = std::env::var("VIGNETTE_MAX_DEPTH") {
            config.max_depth = parse_env_value(&val, "VIGNETTE_MAX_DEPTH")?;
        }

        if let Ok(val) = std::env::var("VIGNETTE_CAUSES_PER_NODE") {
            config.causes_per_node = parse_env_value(&val, "VIGNETTE_CAUSES_PER_NODE")?;
        }

        if let Ok(val) = std::env::var("VIGNETTE_CONSISTENCY_PASSES") {
            config.consistency_passes = parse_env_value(&val, "VIGNETTE_CONSISTENCY_PASSES")?;
        }

        if let Ok(val) = std::env::var("VIGNETTE_SEED") {
            config.seed = parse_env_value(&val, "VIGNETTE_SEED")?;
        }

        if let Ok(val) = std::env::var("VIGNETTE_PARALLELISM") {
            config.parallelism = parse_env_value(&val, "VIGNETTE_PARALLELISM")?;
        }

        if let Ok(val) = std::env::var("VIGNETTE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("VIGNETTE_SUBSAMPLE") {
            config.subsample_proportion = parse_env_value(&val, "VIGNETTE_SUBSAMPLE")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_interactions == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_interactions must be greater than 0".to_string(),
            ));
        }

        if self.max_depth == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_depth must be greater than 0".to_string(),
            ));
        }

        if self.causes_per_node == 0 {
            return Err(ConfigError::ValidationFailed(
                "causes_per_node must be greater than 0".to_string(),
            ));
        }

        if self.parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "parallelism must be greater than 0".to_string(),
            ));
        }

        if self.subsample_proportion <= 0.0 || self.subsample_proportion > 1.000001 {
            return Err(ConfigError::ValidationFailed(
                "subsample_proportion must be greater than 0 and at most 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max_interactions(mut self, max_interactions: usize) -> Self {
        self.max_interactions = max_interactions;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_causes_per_node(mut self, causes_per_node: usize) -> Self {
        self.causes_per_node = causes_per_node;
        self
    }

    pub fn with_consistency_passes(mut self, consistency_passes: usize) -> Self {
        self.consistency_passes = consistency_passes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_subsample_proportion(mut self, proportion: f64) -> Self {
        self.subsample_proportion = proportion;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExperimentConfig::default();
        assert_eq!(config.max_interactions, 20);
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.causes_per_node, 1);
        assert_eq!(config.consistency_passes, 2);
        assert_eq!(config.seed, 0);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.output_dir, PathBuf::from("experiment_logs"));
        assert!((config.subsample_proportion - 1.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ExperimentConfig::new()
            .with_max_interactions(8)
            .with_max_depth(3)
            .with_seed(42)
            .with_parallelism(4)
            .with_output_dir("/tmp/vignette")
            .with_subsample_proportion(0.25);
        assert_eq!(config.max_interactions, 8);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.seed, 42);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/vignette"));
        assert!((config.subsample_proportion - 0.25).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_interactions() {
        let config = ExperimentConfig::default().with_max_interactions(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_parallelism() {
        let config = ExperimentConfig::default().with_parallelism(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_subsample() {
        assert!(ExperimentConfig::default()
            .with_subsample_proportion(0.0)
            .validate()
            .is_err());
        assert!(ExperimentConfig::default()
            .with_subsample_proportion(1.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_env_value() {
        assert_eq!(parse_env_value::<usize>("12", "TEST").unwrap(), 12);
        assert_eq!(parse_env_value::<f64>("0.5", "TEST").unwrap(), 0.5);
        let err = parse_env_value::<usize>("twelve", "TEST").unwrap_err();
        assert!(err.to_string().contains("TEST"));
    }
}
