use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Expr;

/// The outcome a rule (or a final decision) carries for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn is_allow(self) -> bool {
        matches!(self, Effect::Allow)
    }

    /// Parse the textual form used in policy and suite documents.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => write!(f, "allow"),
            Effect::Deny => write!(f, "deny"),
        }
    }
}

/// The actor requesting access. Immutable per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Free-form attributes consulted by rule conditions (`P.attr.*`).
    #[serde(default)]
    pub attr: Value,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            attr: Value::Null,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.attr.is_object() {
            self.attr = Value::Object(Default::default());
        }
        if let Some(map) = self.attr.as_object_mut() {
            map.insert(key.into(), value);
        }
        self
    }
}

/// The entity being protected. `kind` selects the governing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    pub id: String,
    /// Free-form attributes consulted by rule conditions (`R.attr.*`).
    #[serde(default)]
    pub attr: Value,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            attr: Value::Null,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.attr.is_object() {
            self.attr = Value::Object(Default::default());
        }
        if let Some(map) = self.attr.as_object_mut() {
            map.insert(key.into(), value);
        }
        self
    }
}

// ---------- Policy domain types ----------

/// One rule inside a resource policy. Rules are kept in file order and the
/// first passing candidate for an action decides its effect.
#[derive(Debug, Clone)]
pub struct RuleDef {
    /// Optional author-supplied label, surfaced in decisions and diagnostics.
    pub name: Option<String>,
    pub actions: Vec<String>,
    pub effect: Effect,
    pub roles: Vec<String>,
    /// Compiled at load time; `None` means the rule matches unconditionally.
    pub condition: Option<Expr>,
}

impl RuleDef {
    /// Label used in decisions and diagnostics: the rule's name, or its
    /// 1-based position when unnamed.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("rule #{}", index + 1),
        }
    }
}

/// The ordered rule set governing one resource kind.
#[derive(Debug, Clone)]
pub struct ResourcePolicy {
    pub kind: String,
    pub rules: Vec<RuleDef>,
}

// ---------- Decision types ----------

/// Why an action decided the way it did. Default-deny paths are named so
/// that no denial is silent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Effect supplied by the named (or positional) rule.
    Rule(String),
    /// No policy is loaded for the resource kind.
    NoPolicy,
    /// A policy exists but no candidate rule passed for this action.
    NoMatchingRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDecision {
    pub effect: Effect,
    pub outcome: Outcome,
}

/// Per-request decision: one effect per requested action. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub principal_id: String,
    pub resource_id: String,
    pub actions: BTreeMap<String, ActionDecision>,
}

impl Decision {
    /// Effect for a single action; absent actions read as deny.
    pub fn effect_of(&self, action: &str) -> Effect {
        self.actions
            .get(action)
            .map(|d| d.effect)
            .unwrap_or(Effect::Deny)
    }
}

// ---------- API request types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub principal: Principal,
    pub resource: Resource,
    pub actions: Vec<String>,
}
