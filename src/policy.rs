//! KDL policy documents. One document governs one resource kind:
//!
//! ```kdl
//! resource "profile" {
//!     rule "owner-read" effect="allow" {
//!         actions { - "read" }
//!         roles { - "employee" }
//!         condition "R.attr.owner == P.id || 'hr' in P.roles"
//!     }
//! }
//! ```
//!
//! A `condition` may carry an expression string (above) or a structured
//! group of `all` / `any` / `not` / `expr` nodes; both compile to the same
//! expression AST.

use kdl::{KdlDocument, KdlNode};

use crate::condition::{self, Expr};
use crate::errors::PalisadeError;
use crate::types::{Effect, ResourcePolicy, RuleDef};

/// Parse a KDL policy document into a compiled `ResourcePolicy`.
/// Conditions are compiled here so that nothing parses on the decision path.
pub fn parse_policy_document(source: &str) -> Result<ResourcePolicy, PalisadeError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| PalisadeError::KdlParse(e.to_string()))?;

    let mut resource_node = None;
    for node in doc.nodes() {
        match node.name().value() {
            "resource" => {
                if resource_node.replace(node).is_some() {
                    return Err(PalisadeError::InvalidPolicy(
                        "a policy document must name exactly one resource kind; found a second `resource` node".into(),
                    ));
                }
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    let Some(node) = resource_node else {
        return Err(PalisadeError::InvalidPolicy(
            "policy document contains no `resource` node".into(),
        ));
    };

    let kind = first_string_arg(node).ok_or_else(|| {
        PalisadeError::InvalidPolicy(
            "resource node requires a kind argument (e.g. resource \"profile\")".into(),
        )
    })?;

    let mut rules = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "rule" => {
                    let position = format!("rule #{} in resource `{kind}`", rules.len() + 1);
                    rules.push(parse_rule(child, &position)?);
                }
                other => {
                    return Err(PalisadeError::InvalidPolicy(format!(
                        "unexpected child `{other}` in resource `{kind}` (expected `rule`)"
                    )));
                }
            }
        }
    }

    Ok(ResourcePolicy { kind, rules })
}

fn parse_rule(node: &KdlNode, position: &str) -> Result<RuleDef, PalisadeError> {
    let name = first_string_arg(node);

    let effect_str = node.get("effect").and_then(|v| v.as_string()).ok_or_else(|| {
        PalisadeError::InvalidPolicy(format!(
            "{position}: missing `effect` property (effect=\"allow\" or effect=\"deny\")"
        ))
    })?;
    let effect = Effect::parse(effect_str).ok_or_else(|| {
        PalisadeError::InvalidPolicy(format!(
            "{position}: effect must be \"allow\" or \"deny\", got `{effect_str}`"
        ))
    })?;

    let mut actions = Vec::new();
    let mut roles = Vec::new();
    let mut condition = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => {
                    actions = dash_list(child);
                }
                "roles" => {
                    roles = dash_list(child);
                }
                "condition" => {
                    condition = Some(parse_condition_node(child, position)?);
                }
                other => {
                    return Err(PalisadeError::InvalidPolicy(format!(
                        "{position}: unexpected child `{other}` (expected `actions`, `roles` or `condition`)"
                    )));
                }
            }
        }
    }

    if actions.is_empty() {
        return Err(PalisadeError::InvalidPolicy(format!(
            "{position}: a rule must govern at least one action"
        )));
    }
    if roles.is_empty() {
        // Legal but inert: an empty role set intersects no principal.
        tracing::warn!("{position} has no roles and can never match");
    }

    Ok(RuleDef {
        name,
        actions,
        effect,
        roles,
        condition,
    })
}

/// A `condition` node either carries the expression as its argument or one
/// structured group child.
fn parse_condition_node(node: &KdlNode, position: &str) -> Result<Expr, PalisadeError> {
    if let Some(source) = first_string_arg(node) {
        return condition::parse(&source);
    }

    let groups: Vec<&KdlNode> = node
        .children()
        .map(|c| c.nodes().iter().collect())
        .unwrap_or_default();
    match groups.as_slice() {
        [single] => parse_group(single, position),
        [] => Err(PalisadeError::InvalidPolicy(format!(
            "{position}: `condition` needs an expression string or one `all`/`any`/`not`/`expr` child"
        ))),
        _ => Err(PalisadeError::InvalidPolicy(format!(
            "{position}: `condition` must have exactly one root group (wrap siblings in `all` or `any`)"
        ))),
    }
}

fn parse_group(node: &KdlNode, position: &str) -> Result<Expr, PalisadeError> {
    let children: Vec<&KdlNode> = node
        .children()
        .map(|c| c.nodes().iter().collect())
        .unwrap_or_default();

    match node.name().value() {
        "expr" => {
            let source = first_string_arg(node).ok_or_else(|| {
                PalisadeError::InvalidPolicy(format!(
                    "{position}: `expr` requires an expression string argument"
                ))
            })?;
            condition::parse(&source)
        }
        group @ ("all" | "any") => {
            if children.is_empty() {
                return Err(PalisadeError::InvalidPolicy(format!(
                    "{position}: `{group}` group must contain at least one sub-expression"
                )));
            }
            let branches = children
                .iter()
                .map(|c| parse_group(c, position))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if group == "all" {
                Expr::All(branches)
            } else {
                Expr::Any(branches)
            })
        }
        "not" => match children.as_slice() {
            [single] => Ok(Expr::Not(Box::new(parse_group(single, position)?))),
            _ => Err(PalisadeError::InvalidPolicy(format!(
                "{position}: `not` group must contain exactly one sub-expression"
            ))),
        },
        other => Err(PalisadeError::InvalidPolicy(format!(
            "{position}: unknown condition group `{other}` (expected `all`, `any`, `not` or `expr`)"
        ))),
    }
}

/// Extract the first string argument from a KDL node.
pub(crate) fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// actions {
///     - "read"
///     - "update"
/// }
/// ```
pub(crate) fn dash_list(node: &KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
