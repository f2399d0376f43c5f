//! Declarative test suites for policies. A suite declares principal and
//! resource fixtures inline and a list of test cases over them:
//!
//! ```kdl
//! suite "profile access" {
//!     principal "emp1" {
//!         roles { - "employee" }
//!         attrs { department "engineering" }
//!     }
//!     resource "emp1_profile" kind="profile" id="emp1" {
//!         attrs { owner "emp1" }
//!     }
//!     test "employee reads own profile" {
//!         input {
//!             principals { - "emp1" }
//!             resources { - "emp1_profile" }
//!             actions { - "read" }
//!         }
//!         expect principal="emp1" resource="emp1_profile" {
//!             read "allow"
//!         }
//!     }
//! }
//! ```
//!
//! A principal fixture's name is its principal id. A resource fixture's
//! `id` defaults to the fixture name. Input pairs without an `expect`
//! block, and input actions an `expect` block leaves out, are expected to
//! deny — default-deny is the reference expectation.

use std::collections::HashMap;

use kdl::{KdlDocument, KdlNode, KdlValue};
use serde_json::Value;

use crate::errors::PalisadeError;
use crate::policy::{dash_list, first_string_arg};
use crate::types::{Effect, Principal, Resource};

#[derive(Debug, Clone)]
pub struct TestSuite {
    pub name: String,
    /// fixture name (= principal id) -> Principal
    pub principals: HashMap<String, Principal>,
    /// fixture name -> Resource
    pub resources: HashMap<String, Resource>,
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    /// Principal fixture names; crossed with `resources`.
    pub principals: Vec<String>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    pub expectations: Vec<Expectation>,
}

impl TestCase {
    pub fn expectation_for(&self, principal: &str, resource: &str) -> Option<&Expectation> {
        self.expectations
            .iter()
            .find(|e| e.principal == principal && e.resource == resource)
    }
}

/// Expected effects for one (principal, resource) pair of a case.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub principal: String,
    pub resource: String,
    pub actions: HashMap<String, Effect>,
}

/// Parse and validate a KDL suite document. Fixture references are
/// resolved here: a dangling reference fails the suite's loading, before
/// anything runs.
pub fn parse_suite_document(source: &str) -> Result<TestSuite, PalisadeError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| PalisadeError::KdlParse(e.to_string()))?;

    let mut suite_node = None;
    for node in doc.nodes() {
        match node.name().value() {
            "suite" => {
                if suite_node.replace(node).is_some() {
                    return Err(PalisadeError::InvalidSuite(
                        "a suite document must contain exactly one `suite` node".into(),
                    ));
                }
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    let Some(node) = suite_node else {
        return Err(PalisadeError::InvalidSuite(
            "suite document contains no `suite` node".into(),
        ));
    };

    let name = first_string_arg(node).ok_or_else(|| {
        PalisadeError::InvalidSuite(
            "suite node requires a name argument (e.g. suite \"profile access\")".into(),
        )
    })?;

    let mut suite = TestSuite {
        name,
        principals: HashMap::new(),
        resources: HashMap::new(),
        cases: Vec::new(),
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "principal" => {
                    let (fixture, principal) = parse_principal_fixture(child)?;
                    if suite.principals.insert(fixture.clone(), principal).is_some() {
                        return Err(PalisadeError::InvalidSuite(format!(
                            "duplicate principal fixture `{fixture}`"
                        )));
                    }
                }
                "resource" => {
                    let (fixture, resource) = parse_resource_fixture(child)?;
                    if suite.resources.insert(fixture.clone(), resource).is_some() {
                        return Err(PalisadeError::InvalidSuite(format!(
                            "duplicate resource fixture `{fixture}`"
                        )));
                    }
                }
                "test" => {
                    suite.cases.push(parse_test_case(child)?);
                }
                other => {
                    return Err(PalisadeError::InvalidSuite(format!(
                        "unexpected child `{other}` in suite `{}` (expected `principal`, `resource` or `test`)",
                        suite.name
                    )));
                }
            }
        }
    }

    validate_references(&suite)?;
    Ok(suite)
}

fn parse_principal_fixture(node: &KdlNode) -> Result<(String, Principal), PalisadeError> {
    let id = first_string_arg(node).ok_or_else(|| {
        PalisadeError::InvalidSuite(
            "principal fixture requires an id argument (e.g. principal \"emp1\")".into(),
        )
    })?;

    let mut principal = Principal::new(&id);
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "roles" => {
                    principal.roles = dash_list(child);
                }
                "attrs" => {
                    principal.attr = parse_attrs(child);
                }
                other => {
                    return Err(PalisadeError::InvalidSuite(format!(
                        "unexpected child `{other}` in principal `{id}` (expected `roles` or `attrs`)"
                    )));
                }
            }
        }
    }
    Ok((id, principal))
}

fn parse_resource_fixture(node: &KdlNode) -> Result<(String, Resource), PalisadeError> {
    let fixture = first_string_arg(node).ok_or_else(|| {
        PalisadeError::InvalidSuite(
            "resource fixture requires a name argument (e.g. resource \"emp1_profile\")".into(),
        )
    })?;

    let kind = node
        .get("kind")
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            PalisadeError::InvalidSuite(format!(
                "resource fixture `{fixture}` missing `kind` property (e.g. kind=\"profile\")"
            ))
        })?
        .to_string();

    let id = node
        .get("id")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .unwrap_or_else(|| fixture.clone());

    let mut resource = Resource::new(kind, id);
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "attrs" => {
                    resource.attr = parse_attrs(child);
                }
                other => {
                    return Err(PalisadeError::InvalidSuite(format!(
                        "unexpected child `{other}` in resource `{fixture}` (expected `attrs`)"
                    )));
                }
            }
        }
    }
    Ok((fixture, resource))
}

/// An `attrs` block maps to a JSON object: a child with children is a
/// nested map, a child with one argument is a scalar, a child with several
/// arguments is a list.
fn parse_attrs(node: &KdlNode) -> Value {
    let mut map = serde_json::Map::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = if child.children().is_some() {
                parse_attrs(child)
            } else {
                let args: Vec<Value> = child
                    .entries()
                    .iter()
                    .filter(|e| e.name().is_none())
                    .map(|e| kdl_to_json(e.value()))
                    .collect();
                match args.len() {
                    0 => Value::Null,
                    1 => args.into_iter().next().unwrap_or(Value::Null),
                    _ => Value::Array(args),
                }
            };
            map.insert(key, value);
        }
    }
    Value::Object(map)
}

fn kdl_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

fn parse_test_case(node: &KdlNode) -> Result<TestCase, PalisadeError> {
    let name = first_string_arg(node).ok_or_else(|| {
        PalisadeError::InvalidSuite("test node requires a name argument".into())
    })?;

    let mut case = TestCase {
        name: name.clone(),
        principals: Vec::new(),
        resources: Vec::new(),
        actions: Vec::new(),
        expectations: Vec::new(),
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "input" => {
                    for part in child.children().map(|c| c.nodes()).unwrap_or_default() {
                        match part.name().value() {
                            "principals" => case.principals = dash_list(part),
                            "resources" => case.resources = dash_list(part),
                            "actions" => case.actions = dash_list(part),
                            other => {
                                return Err(PalisadeError::InvalidSuite(format!(
                                    "test `{name}`: unexpected child `{other}` in `input`"
                                )));
                            }
                        }
                    }
                }
                "expect" => {
                    case.expectations.push(parse_expectation(child, &name)?);
                }
                other => {
                    return Err(PalisadeError::InvalidSuite(format!(
                        "test `{name}`: unexpected child `{other}` (expected `input` or `expect`)"
                    )));
                }
            }
        }
    }

    if case.principals.is_empty() || case.resources.is_empty() || case.actions.is_empty() {
        return Err(PalisadeError::InvalidSuite(format!(
            "test `{name}`: `input` must name at least one principal, resource and action"
        )));
    }

    Ok(case)
}

fn parse_expectation(node: &KdlNode, test: &str) -> Result<Expectation, PalisadeError> {
    let principal = node
        .get("principal")
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            PalisadeError::InvalidSuite(format!(
                "test `{test}`: `expect` missing `principal` property"
            ))
        })?
        .to_string();
    let resource = node
        .get("resource")
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            PalisadeError::InvalidSuite(format!(
                "test `{test}`: `expect` missing `resource` property"
            ))
        })?
        .to_string();

    let mut actions = HashMap::new();
    for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
        let action = child.name().value().to_string();
        let effect_str = first_string_arg(child).ok_or_else(|| {
            PalisadeError::InvalidSuite(format!(
                "test `{test}`: expected effect missing for action `{action}`"
            ))
        })?;
        let effect = Effect::parse(&effect_str).ok_or_else(|| {
            PalisadeError::InvalidSuite(format!(
                "test `{test}`: effect for action `{action}` must be \"allow\" or \"deny\", got `{effect_str}`"
            ))
        })?;
        actions.insert(action, effect);
    }

    Ok(Expectation {
        principal,
        resource,
        actions,
    })
}

/// Every name a test mentions must resolve to a fixture, and expectations
/// may only target pairs and actions the test's input produces.
fn validate_references(suite: &TestSuite) -> Result<(), PalisadeError> {
    for case in &suite.cases {
        for p in &case.principals {
            if !suite.principals.contains_key(p) {
                return Err(PalisadeError::UnresolvedFixture {
                    name: p.clone(),
                    test: case.name.clone(),
                });
            }
        }
        for r in &case.resources {
            if !suite.resources.contains_key(r) {
                return Err(PalisadeError::UnresolvedFixture {
                    name: r.clone(),
                    test: case.name.clone(),
                });
            }
        }
        for exp in &case.expectations {
            if !case.principals.contains(&exp.principal) {
                return Err(PalisadeError::InvalidSuite(format!(
                    "test `{}`: `expect` names principal `{}` which is not in its input",
                    case.name, exp.principal
                )));
            }
            if !case.resources.contains(&exp.resource) {
                return Err(PalisadeError::InvalidSuite(format!(
                    "test `{}`: `expect` names resource `{}` which is not in its input",
                    case.name, exp.resource
                )));
            }
            for action in exp.actions.keys() {
                if !case.actions.contains(action) {
                    return Err(PalisadeError::InvalidSuite(format!(
                        "test `{}`: `expect` names action `{action}` which is not in its input",
                        case.name
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROFILE_SUITE: &str = r#"
suite "profile access" {
    principal "emp1" {
        roles { - "employee" }
        attrs { department "engineering" }
    }
    principal "hr1" {
        roles { - "hr" }
    }
    resource "emp1_profile" kind="profile" id="emp1" {
        attrs { owner "emp1" }
    }
    test "employee reads own profile" {
        input {
            principals { - "emp1" }
            resources { - "emp1_profile" }
            actions { - "read" }
        }
        expect principal="emp1" resource="emp1_profile" {
            read "allow"
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
    fn test_parse_full_suite() {
        let suite = parse_suite_document(PROFILE_SUITE).unwrap();
        assert_eq!(suite.name, "profile access");
        assert_eq!(suite.principals.len(), 2);
        assert_eq!(suite.resources.len(), 1);
        assert_eq!(suite.cases.len(), 2);

        let emp1 = &suite.principals["emp1"];
        assert_eq!(emp1.id, "emp1");
        assert_eq!(emp1.roles, vec!["employee"]);
        assert_eq!(emp1.attr["department"], json!("engineering"));

        let profile = &suite.resources["emp1_profile"];
        assert_eq!(profile.kind, "profile");
        assert_eq!(profile.id, "emp1");
        assert_eq!(profile.attr["owner"], json!("emp1"));

        let case = &suite.cases[1];
        assert_eq!(case.actions.len(), 4);
        let exp = case.expectation_for("hr1", "emp1_profile").unwrap();
        assert_eq!(exp.actions["delete"], Effect::Allow);
    }

    #[test]
    fn test_resource_id_defaults_to_fixture_name() {
        let suite = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
        roles { - "employee" }
    }
    resource "doc-1" kind="doc" {
    }
    test "t" {
        input {
            principals { - "p1" }
            resources { - "doc-1" }
            actions { - "read" }
        }
    }
}
"#,
        )
        .unwrap();
        assert_eq!(suite.resources["doc-1"].id, "doc-1");
    }

    #[test]
    fn test_nested_and_list_attrs() {
        let suite = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
        attrs {
            clearance 3
            active true
            tags "a" "b"
            org {
                team "core"
            }
        }
    }
    resource "r1" kind="doc" {
    }
    test "t" {
        input {
            principals { - "p1" }
            resources { - "r1" }
            actions { - "read" }
        }
    }
}
"#,
        )
        .unwrap();
        let attr = &suite.principals["p1"].attr;
        assert_eq!(attr["clearance"], json!(3));
        assert_eq!(attr["active"], json!(true));
        assert_eq!(attr["tags"], json!(["a", "b"]));
        assert_eq!(attr["org"]["team"], json!("core"));
    }

    #[test]
    fn test_unresolved_principal_fixture() {
        let err = parse_suite_document(
            r#"
suite "s" {
    resource "r1" kind="doc" {
    }
    test "t" {
        input {
            principals { - "ghost" }
            resources { - "r1" }
            actions { - "read" }
        }
    }
}
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, PalisadeError::UnresolvedFixture { ref name, ref test } if name == "ghost" && test == "t")
        );
    }

    #[test]
    fn test_unresolved_resource_fixture() {
        let err = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
    }
    test "t" {
        input {
            principals { - "p1" }
            resources { - "missing" }
            actions { - "read" }
        }
    }
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PalisadeError::UnresolvedFixture { .. }));
    }

    #[test]
    fn test_expect_must_reference_input() {
        let err = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
    }
    principal "p2" {
    }
    resource "r1" kind="doc" {
    }
    test "t" {
        input {
            principals { - "p1" }
            resources { - "r1" }
            actions { - "read" }
        }
        expect principal="p2" resource="r1" {
            read "allow"
        }
    }
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PalisadeError::InvalidSuite(_)));
    }

    #[test]
    fn test_bad_expected_effect() {
        let err = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
    }
    resource "r1" kind="doc" {
    }
    test "t" {
        input {
            principals { - "p1" }
            resources { - "r1" }
            actions { - "read" }
        }
        expect principal="p1" resource="r1" {
            read "granted"
        }
    }
}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("granted"));
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
    }
    test "t" {
        input {
            principals { - "p1" }
        }
    }
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PalisadeError::InvalidSuite(_)));
    }

    #[test]
    fn test_duplicate_fixture_rejected() {
        let err = parse_suite_document(
            r#"
suite "s" {
    principal "p1" {
    }
    principal "p1" {
    }
}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate principal fixture"));
    }
}
