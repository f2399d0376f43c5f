//! The decision core. Pure and deterministic: the same (principal,
//! resource, actions, store) tuple always yields the same `Decision`, and
//! every unmatched path denies rather than errors.

use std::collections::BTreeMap;

use crate::condition;
use crate::errors::PalisadeError;
use crate::store::PolicyStore;
use crate::types::{ActionDecision, Decision, Effect, Outcome, Principal, Resource, ResourcePolicy};

/// Compute the effect of each requested action for `principal` on
/// `resource`.
///
/// Rules are scanned in file order. A rule is a candidate for an action iff
/// its action set contains the action and its role set intersects the
/// principal's roles; the first candidate whose condition passes (or that
/// has none) decides. A candidate whose condition fails is skipped and the
/// scan continues — condition failure never terminates the scan. With no
/// passing candidate, or no policy for the resource kind, the action denies.
pub fn check(
    store: &PolicyStore,
    principal: &Principal,
    resource: &Resource,
    actions: &[String],
) -> Result<Decision, PalisadeError> {
    validate_request(principal, resource, actions)?;

    let policy = store.lookup(&resource.kind);

    let mut decisions = BTreeMap::new();
    for action in actions {
        let decision = decide_action(policy, principal, resource, action);
        tracing::debug!(
            principal = %principal.id,
            resource_kind = %resource.kind,
            resource_id = %resource.id,
            action = %action,
            effect = %decision.effect,
            outcome = ?decision.outcome,
            "decision"
        );
        decisions.insert(action.clone(), decision);
    }

    Ok(Decision {
        principal_id: principal.id.clone(),
        resource_id: resource.id.clone(),
        actions: decisions,
    })
}

fn validate_request(
    principal: &Principal,
    resource: &Resource,
    actions: &[String],
) -> Result<(), PalisadeError> {
    if principal.id.is_empty() {
        return Err(PalisadeError::InvalidRequest(
            "principal id must not be empty".into(),
        ));
    }
    if resource.kind.is_empty() {
        return Err(PalisadeError::InvalidRequest(
            "resource kind must not be empty".into(),
        ));
    }
    if resource.id.is_empty() {
        return Err(PalisadeError::InvalidRequest(
            "resource id must not be empty".into(),
        ));
    }
    if actions.is_empty() {
        return Err(PalisadeError::InvalidRequest(
            "at least one action must be requested".into(),
        ));
    }
    if actions.iter().any(|a| a.is_empty()) {
        return Err(PalisadeError::InvalidRequest(
            "action names must not be empty".into(),
        ));
    }
    Ok(())
}

fn decide_action(
    policy: Option<&ResourcePolicy>,
    principal: &Principal,
    resource: &Resource,
    action: &str,
) -> ActionDecision {
    let Some(policy) = policy else {
        return ActionDecision {
            effect: Effect::Deny,
            outcome: Outcome::NoPolicy,
        };
    };

    for (index, rule) in policy.rules.iter().enumerate() {
        let is_candidate = rule.actions.iter().any(|a| a == action)
            && rule.roles.iter().any(|r| principal.roles.contains(r));
        if !is_candidate {
            continue;
        }

        let passes = match &rule.condition {
            Some(expr) => condition::eval(expr, principal, resource),
            None => true,
        };
        if passes {
            return ActionDecision {
                effect: rule.effect,
                outcome: Outcome::Rule(rule.label(index)),
            };
        }
        // condition failed: fall through to later candidates
    }

    ActionDecision {
        effect: Effect::Deny,
        outcome: Outcome::NoMatchingRule,
    }
}
