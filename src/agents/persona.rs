//! Role templates, runnable personas, and the public-knowledge projection.
//!
//! A participant starts as an [`AgentTemplate`]: a bare attribute map that
//! assembly fills in and the combination expander copies per run. Once the
//! markers are in place a template becomes a [`Persona`], the validated
//! form the interaction runner and survey engine work with.
//!
//! Attribute keys double as visibility markers. The role and name entries
//! sit under fixed marker keys, and internal-only fields carry a leading
//! underscore; [`Persona::public_knowledge`] projects exactly the two
//! marker entries (renamed `role` and `name`) and withholds everything
//! else, which is the only way one agent ever learns about another.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agents::error::{AgentError, AgentResult};

/// Attribute key holding the agent's display name.
pub const NAME_KEY: &str = "your name";

/// Attribute key holding the agent's role.
pub const ROLE_KEY: &str = "your role is";

/// Prefix marking internal-only attributes.
pub const INTERNAL_PREFIX: &str = "_";

/// Internal attribute key for the agent's goal.
pub const GOAL_KEY: &str = "_goal";

/// Internal attribute key for the agent's constraint.
pub const CONSTRAINT_KEY: &str = "_constraint";

/// One role's attribute dictionary while it is being assembled.
///
/// Varied attributes hold an empty placeholder until the combination
/// expander writes a concrete value into each copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub role: String,
    pub attributes: BTreeMap<String, String>,
}

impl AgentTemplate {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// A runnable participant: a finalized template whose required markers
/// have been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    role: String,
    attributes: BTreeMap<String, String>,
}

impl Persona {
    /// Validate a finalized template. Fails if the role marker, name
    /// marker, goal, or constraint is missing.
    pub fn from_template(template: AgentTemplate) -> AgentResult<Self> {
        for key in [ROLE_KEY, NAME_KEY, GOAL_KEY, CONSTRAINT_KEY] {
            if !template.attributes.contains_key(key) {
                return Err(AgentError::MissingAttribute {
                    role: template.role,
                    attribute: key.to_string(),
                });
            }
        }
        Ok(Self {
            role: template.role,
            attributes: template.attributes,
        })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn name(&self) -> &str {
        self.attr(NAME_KEY)
    }

    pub fn goal(&self) -> &str {
        self.attr(GOAL_KEY)
    }

    pub fn constraint(&self) -> &str {
        self.attr(CONSTRAINT_KEY)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn attr(&self, key: &str) -> &str {
        self.attributes
            .get(key)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// What other agents may learn about this one: the role and name
    /// marker entries, renamed. Every other attribute is withheld.
    pub fn public_knowledge(&self) -> Vec<String> {
        vec![
            format!("role: {}", self.attr(ROLE_KEY)),
            format!("name: {}", self.attr(NAME_KEY)),
        ]
    }

    /// Every attribute except the role and name markers, rendered for the
    /// agent's own prompts.
    pub fn characteristics(&self) -> String {
        self.attributes
            .iter()
            .filter(|(key, _)| key.as_str() != NAME_KEY && key.as_str() != ROLE_KEY)
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// In-conversation context: who the agent is plus the transcript so
    /// far. An agent with no history yet is told it opens the
    /// conversation.
    pub fn current_context(&self, history: &[Statement]) -> String {
        let mut context = format!(
            "In this conversation you are {} named {} with the following characteristics: {}. \
             Here is the conversation in the scenario so far: {}.",
            self.attr(ROLE_KEY),
            self.attr(NAME_KEY),
            self.characteristics(),
            render_history(history),
        );
        if history.is_empty() {
            context.push_str(" You will be the first person to speak.");
        }
        context
    }

    /// Post-conversation context used when the agent answers survey
    /// questions.
    pub fn final_context(
        &self,
        scenario: &str,
        group_knowledge: &str,
        history: &[Statement],
    ) -> String {
        format!(
            "You are a person with the following characteristics: {}. \
             You have just participated in this conversation: {}, which was a simulation of \
             this scenario: {}, and was with these other people: {}. \
             During the conversation your goal was: \"{}\" and you had this constraint: {}.",
            self.characteristics(),
            render_history(history),
            scenario,
            group_knowledge,
            self.goal(),
            self.constraint(),
        )
    }
}

/// One turn of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub speaker: String,
    pub text: String,
}

impl Statement {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.speaker, self.text)
    }
}

/// Render a transcript for prompt insertion.
pub fn render_history(history: &[Statement]) -> String {
    history
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The instantiated participants of one simulation run, in roster order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRoster {
    personas: Vec<Persona>,
}

impl AgentRoster {
    pub fn new(personas: Vec<Persona>) -> Self {
        Self { personas }
    }

    /// Instantiate every template, failing on the first missing marker.
    pub fn from_templates(templates: Vec<AgentTemplate>) -> AgentResult<Self> {
        let personas = templates
            .into_iter()
            .map(Persona::from_template)
            .collect::<AgentResult<Vec<_>>>()?;
        Ok(Self { personas })
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn roles(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.role.clone()).collect()
    }

    pub fn get(&self, role: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.role == role)
    }

    pub fn require(&self, role: &str) -> AgentResult<&Persona> {
        self.get(role)
            .ok_or_else(|| AgentError::UnknownRole(role.to_string()))
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Public knowledge of the whole roster.
    pub fn group_knowledge(&self) -> String {
        self.render_knowledge(|_| true)
    }

    /// Public knowledge of everyone except `role`: the counterparties a
    /// speaker addresses.
    pub fn group_knowledge_excluding(&self, role: &str) -> String {
        self.render_knowledge(|p| p.role != role)
    }

    fn render_knowledge(&self, keep: impl Fn(&Persona) -> bool) -> String {
        self.personas
            .iter()
            .filter(|p| keep(p))
            .map(|p| format!("[{}]", p.public_knowledge().join(", ")))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buyer_template() -> AgentTemplate {
        let mut template = AgentTemplate::new("buyer");
        template
            .attributes
            .insert(ROLE_KEY.to_string(), "buyer".to_string());
        template
            .attributes
            .insert(NAME_KEY.to_string(), "alice".to_string());
        template
            .attributes
            .insert(GOAL_KEY.to_string(), "buy the car cheaply".to_string());
        template
            .attributes
            .insert(CONSTRAINT_KEY.to_string(), "budget of 5000".to_string());
        template
            .attributes
            .insert("favorite color".to_string(), "green".to_string());
        template
    }

    fn seller_persona() -> Persona {
        let mut template = AgentTemplate::new("seller");
        template
            .attributes
            .insert(ROLE_KEY.to_string(), "seller".to_string());
        template
            .attributes
            .insert(NAME_KEY.to_string(), "bob".to_string());
        template
            .attributes
            .insert(GOAL_KEY.to_string(), "sell high".to_string());
        template
            .attributes
            .insert(CONSTRAINT_KEY.to_string(), "needs cash this week".to_string());
        Persona::from_template(template).unwrap()
    }

    #[test]
    fn test_public_knowledge_exposes_role_and_name_only() {
        let persona = Persona::from_template(buyer_template()).unwrap();
        assert_eq!(
            persona.public_knowledge(),
            vec!["role: buyer".to_string(), "name: alice".to_string()]
        );
    }

    #[test]
    fn test_characteristics_withhold_markers_but_keep_internals() {
        let persona = Persona::from_template(buyer_template()).unwrap();
        let characteristics = persona.characteristics();
        assert!(characteristics.contains("favorite color: green"));
        assert!(characteristics.contains("_goal: buy the car cheaply"));
        assert!(!characteristics.contains("your name"));
        assert!(!characteristics.contains("your role is"));
    }

    #[test]
    fn test_from_template_requires_goal() {
        let mut template = buyer_template();
        template.attributes.remove(GOAL_KEY);
        let err = Persona::from_template(template).unwrap_err();
        assert!(matches!(
            err,
            AgentError::MissingAttribute { role, attribute }
                if role == "buyer" && attribute == GOAL_KEY
        ));
    }

    #[test]
    fn test_current_context_marks_the_first_speaker() {
        let persona = Persona::from_template(buyer_template()).unwrap();

        let opening = persona.current_context(&[]);
        assert!(opening.contains("You will be the first person to speak"));

        let history = vec![Statement::new("bob", "hello there")];
        let reply = persona.current_context(&history);
        assert!(!reply.contains("You will be the first person to speak"));
        assert!(reply.contains("bob: hello there"));
    }

    #[test]
    fn test_final_context_names_goal_and_constraint() {
        let persona = Persona::from_template(buyer_template()).unwrap();
        let context = persona.final_context("car sale", "[role: seller, name: bob]", &[]);
        assert!(context.contains("buy the car cheaply"));
        assert!(context.contains("budget of 5000"));
        assert!(context.contains("car sale"));
    }

    #[test]
    fn test_render_history_keeps_turn_order() {
        let history = vec![
            Statement::new("alice", "hi"),
            Statement::new("bob", "hello"),
        ];
        assert_eq!(render_history(&history), "alice: hi bob: hello");
    }

    #[test]
    fn test_roster_lookup_and_exclusion() {
        let roster = AgentRoster::new(vec![
            Persona::from_template(buyer_template()).unwrap(),
            seller_persona(),
        ]);

        assert_eq!(roster.roles(), vec!["buyer", "seller"]);
        assert_eq!(roster.require("seller").unwrap().name(), "bob");
        assert!(matches!(
            roster.require("mechanic").unwrap_err(),
            AgentError::UnknownRole(role) if role == "mechanic"
        ));

        let counterparties = roster.group_knowledge_excluding("buyer");
        assert!(counterparties.contains("role: seller"));
        assert!(!counterparties.contains("role: buyer"));
    }
}
