//! Variable nodes of the causal model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Whether a variable is set before the interaction or produced by it.
///
/// Exogenous variables become experimental variation (attributes assigned
/// to agents or the scenario); endogenous variables are measured by the
/// post-run survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Exogenous,
    Endogenous,
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Exogenous => write!(f, "exogenous"),
            VariableKind::Endogenous => write!(f, "endogenous"),
        }
    }
}

/// Measurement type of a variable.
///
/// Nominal is recognized so legacy models can still be decoded, but new
/// nodes are rejected at build time: without an order there is nothing the
/// downstream analysis can do with the variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Continuous,
    Count,
    Binary,
    Ordinal,
    Nominal,
}

impl VariableType {
    /// Continuous and count variables carry plain numeric values.
    pub fn is_numeric(self) -> bool {
        matches!(self, VariableType::Continuous | VariableType::Count)
    }

    /// Binary, ordinal, and nominal variables take values from a level list.
    pub fn has_semantic_levels(self) -> bool {
        matches!(
            self,
            VariableType::Binary | VariableType::Ordinal | VariableType::Nominal
        )
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableType::Continuous => "continuous",
            VariableType::Count => "count",
            VariableType::Binary => "binary",
            VariableType::Ordinal => "ordinal",
            VariableType::Nominal => "nominal",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VariableType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continuous" => Ok(VariableType::Continuous),
            "count" => Ok(VariableType::Count),
            "binary" => Ok(VariableType::Binary),
            "ordinal" => Ok(VariableType::Ordinal),
            "nominal" => Ok(VariableType::Nominal),
            other => Err(GraphError::UnknownVariableType(other.to_string())),
        }
    }
}

/// Level a variable varies at: per participant or per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationScope {
    Individual,
    Scenario,
}

impl fmt::Display for VariationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariationScope::Individual => write!(f, "individual"),
            VariationScope::Scenario => write!(f, "scenario"),
        }
    }
}

/// Whether other participants can see a varied attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Marker used as `varied_agent` when the variation is scenario-wide
/// rather than attached to one participant.
pub const SCENARIO_WIDE: &str = "scenario";

/// Experimental variation induced for an exogenous variable: the named
/// attribute takes each value in `attribute_values` across conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeVariation {
    /// Attribute name as it appears in the varied agent's profile.
    pub attribute_name: String,
    /// Values the attribute takes, one per experimental condition.
    pub attribute_values: Vec<String>,
    /// Role of the participant who carries the attribute, or
    /// [`SCENARIO_WIDE`] when every participant shares it.
    pub varied_agent: String,
}

impl AttributeVariation {
    /// Whether this variation is shared by every participant in a run.
    pub fn is_scenario_wide(&self) -> bool {
        self.varied_agent == SCENARIO_WIDE
    }

    /// Sort the values ascending: numerically when every value parses as a
    /// number, lexicographically otherwise. Ordinal and numeric variation
    /// lists are stored low-to-high so condition indices track intensity.
    pub fn sort_values(&mut self) {
        let all_numeric = self
            .attribute_values
            .iter()
            .all(|v| v.trim().parse::<f64>().is_ok());
        if all_numeric {
            self.attribute_values.sort_by(|a, b| {
                let a: f64 = a.trim().parse().unwrap_or(f64::MAX);
                let b: f64 = b.trim().parse().unwrap_or(f64::MAX);
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            self.attribute_values.sort();
        }
    }
}

/// Public face of a varied attribute: what the other participants see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationVisibility {
    pub choice: Visibility,
    /// Attribute name as shown to the other participants; empty when
    /// private.
    pub public_name: String,
    /// Mirrored values for the public attribute; empty when private.
    pub public_values: Vec<String>,
}

/// Post-run survey design for a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSpec {
    /// Survey question per respondent role; the key `"oracle"` addresses
    /// the transcript reader.
    pub questions: BTreeMap<String, String>,
    /// Declared aggregation rule (average, sum, max, min, or mode);
    /// validated when the survey data is aggregated.
    pub aggregation: String,
}

/// A node of the causal model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableNode {
    pub name: String,
    pub kind: VariableKind,
    pub variable_type: VariableType,
    pub operationalization: String,
    pub units: String,
    /// Level labels, lowest first. Representative values only for
    /// continuous and count variables.
    pub levels: Vec<String>,
    /// Names of this node's direct causes.
    pub causes: BTreeSet<String>,
    /// Names of outcomes downstream of this node when it was built; causes
    /// proposed for this node must avoid them.
    pub descendant_outcomes: BTreeSet<String>,
    /// Other model variables this node may share variation alignment with.
    pub possible_covariates: BTreeSet<String>,
    pub measurement: Option<MeasurementSpec>,
    /// Induced variation; exogenous nodes only.
    pub variation: Option<AttributeVariation>,
    pub scope: Option<VariationScope>,
    pub visibility: Option<VariationVisibility>,
}

impl VariableNode {
    /// Create an empty node; elicitation fills the rest in.
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            variable_type: VariableType::Continuous,
            operationalization: String::new(),
            units: String::new(),
            levels: Vec::new(),
            causes: BTreeSet::new(),
            descendant_outcomes: BTreeSet::new(),
            possible_covariates: BTreeSet::new(),
            measurement: None,
            variation: None,
            scope: None,
            visibility: None,
        }
    }

    /// Record direct causes of this node.
    pub fn add_causes<I, S>(&mut self, causes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.causes.extend(causes.into_iter().map(Into::into));
    }

    /// Remove a direct cause; true when it was present.
    pub fn remove_cause(&mut self, cause: &str) -> bool {
        self.causes.remove(cause)
    }

    /// Restrict candidate covariates to those that are neither this node
    /// itself nor downstream of it.
    pub fn set_possible_covariates<I, S>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.possible_covariates = candidates
            .into_iter()
            .map(Into::into)
            .filter(|c| c != &self.name && !self.descendant_outcomes.contains(c))
            .collect();
    }

    /// Numeric code per level: binary levels are coded 0 and 1, ordinal
    /// and nominal levels 1..n in listed order. Continuous and count
    /// variables have no level codes; their values are parsed directly.
    pub fn level_codes(&self) -> BTreeMap<String, f64> {
        match self.variable_type {
            VariableType::Binary => self
                .levels
                .iter()
                .zip([0.0, 1.0])
                .map(|(level, code)| (level.clone(), code))
                .collect(),
            VariableType::Ordinal | VariableType::Nominal => self
                .levels
                .iter()
                .enumerate()
                .map(|(i, level)| (level.clone(), (i + 1) as f64))
                .collect(),
            VariableType::Continuous | VariableType::Count => BTreeMap::new(),
        }
    }

    /// Map each assigned variation value to the level at the same
    /// position, for reading realized exogenous values back out of a
    /// combination assignment. Empty when the node has no variation or no
    /// semantic levels.
    pub fn variation_level_map(&self) -> BTreeMap<String, String> {
        if !self.variable_type.has_semantic_levels() {
            return BTreeMap::new();
        }
        match &self.variation {
            Some(variation) => variation
                .attribute_values
                .iter()
                .zip(self.levels.iter())
                .map(|(value, level)| (value.clone(), level.clone()))
                .collect(),
            None => BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_type_round_trips_from_str() {
        for (text, expected) in [
            ("continuous", VariableType::Continuous),
            ("Count", VariableType::Count),
            (" BINARY ", VariableType::Binary),
            ("ordinal", VariableType::Ordinal),
            ("nominal", VariableType::Nominal),
        ] {
            assert_eq!(text.parse::<VariableType>().unwrap(), expected);
        }
    }

    #[test]
    fn test_variable_type_rejects_unknown() {
        let err = "fuzzy".parse::<VariableType>().unwrap_err();
        assert!(matches!(err, GraphError::UnknownVariableType(t) if t == "fuzzy"));
    }

    #[test]
    fn test_type_predicates() {
        assert!(VariableType::Continuous.is_numeric());
        assert!(VariableType::Count.is_numeric());
        assert!(!VariableType::Binary.is_numeric());
        assert!(VariableType::Binary.has_semantic_levels());
        assert!(VariableType::Nominal.has_semantic_levels());
        assert!(!VariableType::Count.has_semantic_levels());
    }

    #[test]
    fn test_level_codes_binary_and_ordinal() {
        let mut node = VariableNode::new("deal reached", VariableKind::Endogenous);
        node.variable_type = VariableType::Binary;
        node.levels = vec!["no deal".to_string(), "deal".to_string()];

        let codes = node.level_codes();
        assert_eq!(codes["no deal"], 0.0);
        assert_eq!(codes["deal"], 1.0);

        node.variable_type = VariableType::Ordinal;
        node.levels = vec!["low".to_string(), "mid".to_string(), "high".to_string()];
        let codes = node.level_codes();
        assert_eq!(codes["low"], 1.0);
        assert_eq!(codes["high"], 3.0);
    }

    #[test]
    fn test_level_codes_empty_for_numeric_types() {
        let mut node = VariableNode::new("price", VariableKind::Exogenous);
        node.variable_type = VariableType::Continuous;
        node.levels = vec!["10".to_string(), "20".to_string()];
        assert!(node.level_codes().is_empty());
    }

    #[test]
    fn test_possible_covariates_exclude_self_and_descendants() {
        let mut node = VariableNode::new("patience", VariableKind::Exogenous);
        node.descendant_outcomes.insert("deal reached".to_string());

        node.set_possible_covariates(["patience", "deal reached", "budget", "experience"]);
        assert_eq!(
            node.possible_covariates,
            ["budget", "experience"]
                .into_iter()
                .map(String::from)
                .collect()
        );
    }

    #[test]
    fn test_sort_values_numeric_and_lexicographic() {
        let mut variation = AttributeVariation {
            attribute_name: "budget".to_string(),
            attribute_values: vec!["100".to_string(), "25".to_string(), "5".to_string()],
            varied_agent: "buyer".to_string(),
        };
        variation.sort_values();
        assert_eq!(variation.attribute_values, vec!["5", "25", "100"]);

        let mut labels = AttributeVariation {
            attribute_name: "mood".to_string(),
            attribute_values: vec!["calm".to_string(), "angry".to_string()],
            varied_agent: "seller".to_string(),
        };
        labels.sort_values();
        assert_eq!(labels.attribute_values, vec!["angry", "calm"]);
    }

    #[test]
    fn test_variation_level_map_zips_values_with_levels() {
        let mut node = VariableNode::new("urgency", VariableKind::Exogenous);
        node.variable_type = VariableType::Ordinal;
        node.levels = vec!["low".to_string(), "high".to_string()];
        node.variation = Some(AttributeVariation {
            attribute_name: "deadline".to_string(),
            attribute_values: vec!["next month".to_string(), "tomorrow".to_string()],
            varied_agent: "buyer".to_string(),
        });

        let map = node.variation_level_map();
        assert_eq!(map["next month"], "low");
        assert_eq!(map["tomorrow"], "high");
    }

    #[test]
    fn test_scenario_wide_marker() {
        let variation = AttributeVariation {
            attribute_name: "weather".to_string(),
            attribute_values: vec!["rain".to_string(), "sun".to_string()],
            varied_agent: SCENARIO_WIDE.to_string(),
        };
        assert!(variation.is_scenario_wide());
    }
}
