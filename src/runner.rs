//! Executes test suites against the decision engine and reports per-case
//! pass/fail. The runner never mutates the policy store; cases are
//! evaluated independently and their results merged afterwards, so a suite
//! can be run repeatedly (or concurrently with live checks) without
//! interference.

use std::fmt;

use crate::engine;
use crate::errors::PalisadeError;
use crate::store::PolicyStore;
use crate::suite::TestSuite;
use crate::types::Effect;

/// One compared (principal, resource, action) triple that did not produce
/// the expected effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub principal: String,
    pub resource: String,
    pub action: String,
    pub expected: Effect,
    pub actual: Effect,
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    /// Triples compared in this case.
    pub checks: usize,
    pub mismatches: Vec<Mismatch>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TestReport {
    pub suite: String,
    pub cases: Vec<CaseResult>,
    pub checks_executed: usize,
    pub checks_passed: usize,
}

impl TestReport {
    /// The suite passes iff every case passes.
    pub fn passed(&self) -> bool {
        self.cases.iter().all(CaseResult::passed)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} checks executed, {} ok",
            self.checks_executed, self.checks_passed
        )
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "suite `{}`", self.suite)?;
        for case in &self.cases {
            let verdict = if case.passed() { "PASS" } else { "FAIL" };
            writeln!(f, "  {verdict} {}", case.name)?;
            for m in &case.mismatches {
                writeln!(
                    f,
                    "       {} x {} x {}: expected {}, got {}",
                    m.principal, m.resource, m.action, m.expected, m.actual
                )?;
            }
        }
        write!(f, "{}", self.summary())
    }
}

/// Drive the engine for every (principal x resource x action) triple a
/// suite's cases name and diff actual against expected effects.
///
/// Pairs without an `expect` block, and actions an `expect` block leaves
/// out, are expected to deny.
pub fn run(store: &PolicyStore, suite: &TestSuite) -> Result<TestReport, PalisadeError> {
    let mut cases = Vec::with_capacity(suite.cases.len());

    for case in &suite.cases {
        let mut result = CaseResult {
            name: case.name.clone(),
            checks: 0,
            mismatches: Vec::new(),
        };

        for principal_name in &case.principals {
            let principal = suite.principals.get(principal_name).ok_or_else(|| {
                PalisadeError::UnresolvedFixture {
                    name: principal_name.clone(),
                    test: case.name.clone(),
                }
            })?;

            for resource_name in &case.resources {
                let resource = suite.resources.get(resource_name).ok_or_else(|| {
                    PalisadeError::UnresolvedFixture {
                        name: resource_name.clone(),
                        test: case.name.clone(),
                    }
                })?;

                let decision = engine::check(store, principal, resource, &case.actions)?;
                let expectation = case.expectation_for(principal_name, resource_name);

                for action in &case.actions {
                    let expected = expectation
                        .and_then(|e| e.actions.get(action))
                        .copied()
                        .unwrap_or(Effect::Deny);
                    let actual = decision.effect_of(action);
                    result.checks += 1;
                    if actual != expected {
                        result.mismatches.push(Mismatch {
                            principal: principal_name.clone(),
                            resource: resource_name.clone(),
                            action: action.clone(),
                            expected,
                            actual,
                        });
                    }
                }
            }
        }

        cases.push(result);
    }

    let checks_executed = cases.iter().map(|c| c.checks).sum();
    let checks_passed = checks_executed
        - cases
            .iter()
            .map(|c| c.mismatches.len())
            .sum::<usize>();

    let report = TestReport {
        suite: suite.name.clone(),
        cases,
        checks_executed,
        checks_passed,
    };

    tracing::info!(
        suite = %report.suite,
        checks = report.checks_executed,
        ok = report.checks_passed,
        passed = report.passed(),
        "suite finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::parse_policy_document;
    use crate::suite::parse_suite_document;

    fn profile_store() -> PolicyStore {
        let policy = parse_policy_document(
            r#"
resource "profile" {
    rule "owner-read" effect="allow" {
        actions { - "read" }
        roles { - "employee" }
        condition "R.attr.owner == P.id || 'hr' in P.roles"
    }
    rule "hr-full-access" effect="allow" {
        actions { - "create"; - "read"; - "update"; - "delete" }
        roles { - "hr" }
    }
}
"#,
        )
        .unwrap();
        PolicyStore::from_policies(vec![policy]).unwrap()
    }

    const PASSING_SUITE: &str = r#"
suite "profile access" {
    principal "emp1" {
        roles { - "employee" }
    }
    principal "emp3" {
        roles { - "employee" }
    }
    principal "hr1" {
        roles { - "hr" }
    }
    resource "emp1_profile" kind="profile" id="emp1" {
        attrs { owner "emp1" }
    }
    test "owner reads own profile" {
        input {
            principals { - "emp1"; - "emp3" }
            resources { - "emp1_profile" }
            actions { - "read" }
        }
        expect principal="emp1" resource="emp1_profile" {
            read "allow"
        }
        expect principal="emp3" resource="emp1_profile" {
            read "deny"
        }
    }
    test "hr full access" {
        input {
            principals { - "hr1" }
            resources { - "emp1_profile" }
            actions { - "create"; - "read"; - "update"; - "delete" }
        }
        expect principal="hr1" resource="emp1_profile" {
            create "allow"
            read "allow"
            update "allow"
            delete "allow"
        }
    }
}
"#;

    #[test]
    fn test_passing_suite() {
        let store = profile_store();
        let suite = parse_suite_document(PASSING_SUITE).unwrap();
        let report = run(&store, &suite).unwrap();

        assert!(report.passed());
        assert_eq!(report.cases.len(), 2);
        assert_eq!(report.checks_executed, 6);
        assert_eq!(report.checks_passed, 6);
        assert_eq!(report.summary(), "6 checks executed, 6 ok");
    }

    #[test]
    fn test_single_wrong_expectation_fails_only_that_case() {
        let store = profile_store();
        let suite = parse_suite_document(
            r#"
suite "one wrong" {
    principal "emp1" {
        roles { - "employee" }
    }
    principal "emp3" {
        roles { - "employee" }
    }
    resource "emp1_profile" kind="profile" id="emp1" {
        attrs { owner "emp1" }
    }
    test "owner allowed" {
        input {
            principals { - "emp1" }
            resources { - "emp1_profile" }
            actions { - "read" }
        }
        expect principal="emp1" resource="emp1_profile" {
            read "allow"
        }
    }
    test "stranger wrongly expected to read" {
        input {
            principals { - "emp3" }
            resources { - "emp1_profile" }
            actions { - "read" }
        }
        expect principal="emp3" resource="emp1_profile" {
            read "allow"
        }
    }
}
"#,
        )
        .unwrap();

        let report = run(&store, &suite).unwrap();
        assert!(!report.passed());
        assert!(report.cases[0].passed());
        assert!(!report.cases[1].passed());

        let mismatch = &report.cases[1].mismatches[0];
        assert_eq!(mismatch.principal, "emp3");
        assert_eq!(mismatch.action, "read");
        assert_eq!(mismatch.expected, Effect::Allow);
        assert_eq!(mismatch.actual, Effect::Deny);

        assert_eq!(report.checks_executed, 2);
        assert_eq!(report.checks_passed, 1);
    }

    #[test]
    fn test_missing_expectation_defaults_to_deny() {
        let store = profile_store();
        let suite = parse_suite_document(
            r#"
suite "defaults" {
    principal "emp3" {
        roles { - "employee" }
    }
    resource "emp1_profile" kind="profile" id="emp1" {
        attrs { owner "emp1" }
    }
    test "no expect block means deny expected" {
        input {
            principals { - "emp3" }
            resources { - "emp1_profile" }
            actions { - "read"; - "update" }
        }
    }
}
"#,
        )
        .unwrap();

        let report = run(&store, &suite).unwrap();
        assert!(report.passed());
        assert_eq!(report.checks_executed, 2);
    }

    #[test]
    fn test_report_display_lists_mismatches() {
        let store = profile_store();
        let suite = parse_suite_document(
            r#"
suite "display" {
    principal "emp3" {
        roles { - "employee" }
    }
    resource "emp1_profile" kind="profile" id="emp1" {
        attrs { owner "emp1" }
    }
    test "wrong" {
        input {
            principals { - "emp3" }
            resources { - "emp1_profile" }
            actions { - "read" }
        }
        expect principal="emp3" resource="emp1_profile" {
            read "allow"
        }
    }
}
"#,
        )
        .unwrap();

        let report = run(&store, &suite).unwrap();
        let rendered = report.to_string();
        assert!(rendered.contains("FAIL wrong"));
        assert!(rendered.contains("expected allow, got deny"));
        assert!(rendered.contains("1 checks executed, 0 ok"));
    }

    #[test]
    fn test_runner_is_repeatable() {
        let store = profile_store();
        let suite = parse_suite_document(PASSING_SUITE).unwrap();
        let first = run(&store, &suite).unwrap();
        let second = run(&store, &suite).unwrap();
        assert_eq!(first.checks_passed, second.checks_passed);
        assert_eq!(first.passed(), second.passed());
    }
}
