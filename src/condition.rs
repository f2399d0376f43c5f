//! Boolean condition expressions over principal and resource attributes.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Membership: `x in list`
//! - Attribute paths rooted at `P`/`principal` or `R`/`resource`,
//!   e.g. `P.id`, `P.roles`, `R.attr.owner`, `principal.attr.department`
//! - Literals: integers, floats, `"strings"` / `'strings'`, `true`, `false`
//! - Parentheses for grouping
//!
//! Parsing is strict and fails at policy load time. Evaluation is total:
//! an absent attribute makes every comparison false, and a non-boolean
//! operand of `&&`/`||`/`!` reads as false. A malformed request can only
//! ever deny, never error.

use serde_json::Value;

use crate::errors::PalisadeError;
use crate::types::{Principal, Resource};

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Attribute path, e.g. `["P", "attr", "owner"]`. Validated at parse
    /// time to be rooted in a known namespace.
    Path(Vec<String>),
    /// Conjunction of one or more sub-expressions (`&&`, `all` groups).
    All(Vec<Expr>),
    /// Disjunction of one or more sub-expressions (`||`, `any` groups).
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

// ─── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Dot,
    LParen,
    RParen,
    Cmp(CmpOp),
    And,
    Or,
    Bang,
    In,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, PalisadeError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '.' => {
                    self.chars.next();
                    tokens.push(Token::Dot);
                }
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                '=' => {
                    self.chars.next();
                    self.expect('=', "`==`")?;
                    tokens.push(Token::Cmp(CmpOp::Eq));
                }
                '!' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Cmp(CmpOp::Ne));
                    } else {
                        tokens.push(Token::Bang);
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Cmp(CmpOp::Ge));
                    } else {
                        tokens.push(Token::Cmp(CmpOp::Gt));
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Cmp(CmpOp::Le));
                    } else {
                        tokens.push(Token::Cmp(CmpOp::Lt));
                    }
                }
                '&' => {
                    self.chars.next();
                    self.expect('&', "`&&`")?;
                    tokens.push(Token::And);
                }
                '|' => {
                    self.chars.next();
                    self.expect('|', "`||`")?;
                    tokens.push(Token::Or);
                }
                '"' | '\'' => {
                    tokens.push(Token::Str(self.string(c)?));
                }
                c if c.is_ascii_digit() => {
                    tokens.push(self.number()?);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let word = self.word();
                    tokens.push(match word.as_str() {
                        "true" => Token::Bool(true),
                        "false" => Token::Bool(false),
                        "in" => Token::In,
                        _ => Token::Ident(word),
                    });
                }
                c => {
                    return Err(PalisadeError::InvalidCondition(format!(
                        "unexpected character `{c}`"
                    )));
                }
            }
        }
        Ok(tokens)
    }

    fn expect(&mut self, c: char, what: &str) -> Result<(), PalisadeError> {
        if self.chars.next() == Some(c) {
            Ok(())
        } else {
            Err(PalisadeError::InvalidCondition(format!("expected {what}")))
        }
    }

    fn string(&mut self, quote: char) -> Result<String, PalisadeError> {
        self.chars.next(); // opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(s),
                Some('\\') => match self.chars.next() {
                    Some(esc) => s.push(esc),
                    None => break,
                },
                Some(c) => s.push(c),
                None => break,
            }
        }
        Err(PalisadeError::InvalidCondition(
            "unterminated string literal".into(),
        ))
    }

    fn number(&mut self) -> Result<Token, PalisadeError> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if text.contains('.') {
            text.parse()
                .map(Token::Float)
                .map_err(|_| PalisadeError::InvalidCondition(format!("invalid float `{text}`")))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| PalisadeError::InvalidCondition(format!("invalid integer `{text}`")))
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, PalisadeError> {
        let mut branches = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            branches.push(self.parse_and()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            Expr::Any(branches)
        })
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, PalisadeError> {
        let mut branches = vec![self.parse_comparison()?];
        while self.peek() == Some(&Token::And) {
            self.advance();
            branches.push(self.parse_comparison()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            Expr::All(branches)
        })
    }

    /// comparison = unary (cmp_op unary | "in" unary)?
    fn parse_comparison(&mut self) -> Result<Expr, PalisadeError> {
        let left = self.parse_unary()?;
        match self.peek() {
            Some(&Token::Cmp(op)) => {
                self.advance();
                let right = self.parse_unary()?;
                Ok(Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            Some(&Token::In) => {
                self.advance();
                let haystack = self.parse_unary()?;
                Ok(Expr::In {
                    needle: Box::new(left),
                    haystack: Box::new(haystack),
                })
            }
            _ => Ok(left),
        }
    }

    /// unary = "!" unary | atom
    fn parse_unary(&mut self) -> Result<Expr, PalisadeError> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    /// atom = literal | path | "(" or_expr ")"
    fn parse_atom(&mut self) -> Result<Expr, PalisadeError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Literal::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Literal::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Literal::Bool(b))),
            Some(Token::Ident(root)) => {
                let mut path = vec![root];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        // `in` may double as a path segment name
                        Some(Token::In) => path.push("in".into()),
                        _ => {
                            return Err(PalisadeError::InvalidCondition(
                                "expected identifier after `.`".into(),
                            ));
                        }
                    }
                }
                validate_path(&path)?;
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                if self.advance() != Some(Token::RParen) {
                    return Err(PalisadeError::InvalidCondition(
                        "expected closing parenthesis `)`".into(),
                    ));
                }
                Ok(expr)
            }
            other => Err(PalisadeError::InvalidCondition(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }
}

/// Paths must land in a namespace the evaluator can resolve; anything else
/// is rejected when the policy loads rather than silently denying forever.
fn validate_path(path: &[String]) -> Result<(), PalisadeError> {
    let joined = path.join(".");
    let fields: &[&str] = match path[0].as_str() {
        "P" | "principal" => &["id", "roles", "attr"],
        "R" | "resource" => &["kind", "id", "attr"],
        other => {
            return Err(PalisadeError::InvalidCondition(format!(
                "unknown namespace `{other}` in `{joined}` (expected P/principal or R/resource)"
            )));
        }
    };
    let Some(field) = path.get(1) else {
        return Err(PalisadeError::InvalidCondition(format!(
            "`{joined}` names a namespace, not a value"
        )));
    };
    if !fields.contains(&field.as_str()) {
        return Err(PalisadeError::InvalidCondition(format!(
            "unknown field `{field}` in `{joined}` (expected one of {fields:?})"
        )));
    }
    if field != "attr" && path.len() > 2 {
        return Err(PalisadeError::InvalidCondition(format!(
            "`{joined}` descends into a scalar field"
        )));
    }
    Ok(())
}

/// Parse a condition expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, PalisadeError> {
    let tokens = Lexer::new(input).run()?;
    if tokens.is_empty() {
        return Err(PalisadeError::InvalidCondition("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(PalisadeError::InvalidCondition(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// A value produced while evaluating an expression. `Absent` stands for
/// missing attributes and non-scalar lookups; it makes every comparison
/// false.
#[derive(Debug, Clone, PartialEq)]
enum CondValue {
    Absent,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<CondValue>),
}

impl CondValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            CondValue::Int(n) => Some(*n as f64),
            CondValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn truthy(&self) -> bool {
        matches!(self, CondValue::Bool(true))
    }
}

/// Evaluate a compiled condition for a (principal, resource) pair.
/// Total: never panics, never errors.
pub fn eval(expr: &Expr, principal: &Principal, resource: &Resource) -> bool {
    eval_value(expr, principal, resource).truthy()
}

fn eval_value(expr: &Expr, principal: &Principal, resource: &Resource) -> CondValue {
    match expr {
        Expr::Literal(lit) => match lit {
            Literal::Int(n) => CondValue::Int(*n),
            Literal::Float(f) => CondValue::Float(*f),
            Literal::Str(s) => CondValue::Str(s.clone()),
            Literal::Bool(b) => CondValue::Bool(*b),
        },
        Expr::Path(path) => resolve_path(path, principal, resource),
        Expr::All(branches) => CondValue::Bool(
            branches
                .iter()
                .all(|b| eval_value(b, principal, resource).truthy()),
        ),
        Expr::Any(branches) => CondValue::Bool(
            branches
                .iter()
                .any(|b| eval_value(b, principal, resource).truthy()),
        ),
        Expr::Not(inner) => match eval_value(inner, principal, resource) {
            CondValue::Bool(b) => CondValue::Bool(!b),
            // Negating a non-boolean still fails closed.
            _ => CondValue::Bool(false),
        },
        Expr::Compare { op, left, right } => {
            let l = eval_value(left, principal, resource);
            let r = eval_value(right, principal, resource);
            CondValue::Bool(compare(*op, &l, &r))
        }
        Expr::In { needle, haystack } => {
            let n = eval_value(needle, principal, resource);
            let h = eval_value(haystack, principal, resource);
            let found = match (&n, &h) {
                (CondValue::Absent, _) => false,
                (_, CondValue::List(items)) => items.iter().any(|item| values_eq(item, &n)),
                _ => false,
            };
            CondValue::Bool(found)
        }
    }
}

fn compare(op: CmpOp, l: &CondValue, r: &CondValue) -> bool {
    if matches!(l, CondValue::Absent) || matches!(r, CondValue::Absent) {
        return false;
    }
    match op {
        CmpOp::Eq => values_eq(l, r),
        CmpOp::Ne => !values_eq(l, r),
        CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => match op {
                CmpOp::Gt => a > b,
                CmpOp::Lt => a < b,
                CmpOp::Ge => a >= b,
                CmpOp::Le => a <= b,
                _ => unreachable!(),
            },
            _ => false,
        },
    }
}

/// Equality across evaluated values. Ints and floats compare numerically;
/// anything absent or of mismatched type is unequal.
fn values_eq(a: &CondValue, b: &CondValue) -> bool {
    match (a, b) {
        (CondValue::Int(x), CondValue::Int(y)) => x == y,
        (CondValue::Float(x), CondValue::Float(y)) => x == y,
        (CondValue::Int(x), CondValue::Float(y)) | (CondValue::Float(y), CondValue::Int(x)) => {
            (*x as f64) == *y
        }
        (CondValue::Str(x), CondValue::Str(y)) => x == y,
        (CondValue::Bool(x), CondValue::Bool(y)) => x == y,
        (CondValue::List(x), CondValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(i, j)| values_eq(i, j))
        }
        _ => false,
    }
}

fn resolve_path(path: &[String], principal: &Principal, resource: &Resource) -> CondValue {
    match (path[0].as_str(), path[1].as_str()) {
        ("P" | "principal", "id") => CondValue::Str(principal.id.clone()),
        ("P" | "principal", "roles") => CondValue::List(
            principal
                .roles
                .iter()
                .map(|r| CondValue::Str(r.clone()))
                .collect(),
        ),
        ("P" | "principal", "attr") => json_lookup(&principal.attr, &path[2..]),
        ("R" | "resource", "kind") => CondValue::Str(resource.kind.clone()),
        ("R" | "resource", "id") => CondValue::Str(resource.id.clone()),
        ("R" | "resource", "attr") => json_lookup(&resource.attr, &path[2..]),
        _ => CondValue::Absent,
    }
}

fn json_lookup(root: &Value, segments: &[String]) -> CondValue {
    let mut current = root;
    for seg in segments {
        match current.get(seg) {
            Some(next) => current = next,
            None => return CondValue::Absent,
        }
    }
    json_to_value(current)
}

fn json_to_value(value: &Value) -> CondValue {
    match value {
        Value::Null => CondValue::Absent,
        Value::Bool(b) => CondValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CondValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                CondValue::Float(f)
            } else {
                CondValue::Absent
            }
        }
        Value::String(s) => CondValue::Str(s.clone()),
        Value::Array(items) => CondValue::List(items.iter().map(json_to_value).collect()),
        // Whole maps are not comparable values
        Value::Object(_) => CondValue::Absent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emp1() -> Principal {
        Principal::new("emp1")
            .with_role("employee")
            .with_attr("department", json!("engineering"))
            .with_attr("clearance", json!(3))
    }

    fn profile(owner: &str) -> Resource {
        Resource::new("profile", owner).with_attr("owner", json!(owner))
    }

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse("R.attr.owner == P.id").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                op: CmpOp::Eq,
                left: Box::new(Expr::Path(vec!["R".into(), "attr".into(), "owner".into()])),
                right: Box::new(Expr::Path(vec!["P".into(), "id".into()])),
            }
        );
    }

    #[test]
    fn test_parse_long_namespace_aliases() {
        let expr = parse("resource.attr.owner == principal.id").unwrap();
        match expr {
            Expr::Compare { op: CmpOp::Eq, .. } => {}
            other => panic!("expected Compare, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_chained_and_or_flatten() {
        let expr = parse("P.attr.a == 1 && P.attr.b == 2 && P.attr.c == 3").unwrap();
        match expr {
            Expr::All(branches) => assert_eq!(branches.len(), 3),
            other => panic!("expected All, got {other:?}"),
        }

        let expr = parse("P.attr.a == 1 || P.attr.b == 2").unwrap();
        match expr {
            Expr::Any(branches) => assert_eq!(branches.len(), 2),
            other => panic!("expected Any, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_precedence_or_over_and() {
        // a && b || c parses as (a && b) || c
        let expr = parse("P.attr.a == 1 && P.attr.b == 2 || P.attr.c == 3").unwrap();
        match expr {
            Expr::Any(branches) => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(branches[0], Expr::All(_)));
            }
            other => panic!("expected Any, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse("(P.attr.a == 1 || P.attr.b == 2) && P.attr.c == 3").unwrap();
        match expr {
            Expr::All(branches) => {
                assert!(matches!(branches[0], Expr::Any(_)));
            }
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_single_quoted_string() {
        let expr = parse("'hr' in P.roles").unwrap();
        match expr {
            Expr::In { needle, .. } => {
                assert_eq!(*needle, Expr::Literal(Literal::Str("hr".into())));
            }
            other => panic!("expected In, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_namespace() {
        let err = parse("request.ip == '10.0.0.1'").unwrap_err();
        assert!(matches!(err, PalisadeError::InvalidCondition(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        assert!(parse("P.department == 'x'").is_err());
        assert!(parse("R.owner == 'x'").is_err());
    }

    #[test]
    fn test_parse_rejects_bare_namespace() {
        assert!(parse("P == 'x'").is_err());
    }

    #[test]
    fn test_parse_rejects_descent_into_scalar() {
        assert!(parse("P.id.first == 'x'").is_err());
    }

    #[test]
    fn test_parse_rejects_trailing_tokens() {
        assert!(parse("P.id == 'x' P.id").is_err());
        assert!(parse("").is_err());
        assert!(parse("P.id == 'unterminated").is_err());
    }

    #[test]
    fn test_eval_ownership_condition() {
        let expr = parse("R.attr.owner == P.id || 'hr' in P.roles").unwrap();

        assert!(eval(&expr, &emp1(), &profile("emp1")));
        assert!(!eval(&expr, &emp1(), &profile("emp2")));

        let hr = Principal::new("hr1").with_role("hr");
        assert!(eval(&expr, &hr, &profile("emp2")));
    }

    #[test]
    fn test_eval_numeric_comparisons() {
        let p = emp1();
        let r = profile("emp1");
        assert!(eval(&parse("P.attr.clearance >= 3").unwrap(), &p, &r));
        assert!(eval(&parse("P.attr.clearance > 2.5").unwrap(), &p, &r));
        assert!(!eval(&parse("P.attr.clearance < 3").unwrap(), &p, &r));
        assert!(eval(&parse("P.attr.clearance != 4").unwrap(), &p, &r));
    }

    #[test]
    fn test_eval_nested_attr_path() {
        let p = Principal::new("emp1").with_attr("org", json!({ "team": { "name": "core" } }));
        let r = profile("emp1");
        assert!(eval(&parse("P.attr.org.team.name == 'core'").unwrap(), &p, &r));
        assert!(!eval(&parse("P.attr.org.team.size == 5").unwrap(), &p, &r));
    }

    #[test]
    fn test_eval_missing_attribute_fails_closed() {
        let p = Principal::new("emp1");
        let r = Resource::new("profile", "emp1");
        // every comparison against an absent value is false, including !=
        assert!(!eval(&parse("P.attr.department == 'x'").unwrap(), &p, &r));
        assert!(!eval(&parse("P.attr.department != 'x'").unwrap(), &p, &r));
        assert!(!eval(&parse("P.attr.clearance > 0").unwrap(), &p, &r));
        assert!(!eval(&parse("'hr' in P.attr.groups").unwrap(), &p, &r));
    }

    #[test]
    fn test_eval_not_fails_closed_on_non_boolean() {
        let p = Principal::new("emp1");
        let r = Resource::new("profile", "emp1");
        // !absent is false, not true
        assert!(!eval(&parse("!P.attr.disabled").unwrap(), &p, &r));

        let p = p.with_attr("disabled", json!(false));
        assert!(eval(&parse("!P.attr.disabled").unwrap(), &p, &r));
    }

    #[test]
    fn test_eval_type_mismatch() {
        let p = Principal::new("emp1").with_attr("level", json!("high"));
        let r = Resource::new("profile", "emp1");
        assert!(!eval(&parse("P.attr.level == 3").unwrap(), &p, &r));
        // present values of mismatched type are unequal
        assert!(eval(&parse("P.attr.level != 3").unwrap(), &p, &r));
        assert!(!eval(&parse("P.attr.level > 1").unwrap(), &p, &r));
    }

    #[test]
    fn test_eval_in_literal_membership() {
        let p = emp1();
        let r = profile("emp1");
        let expr = parse("P.attr.department in R.attr.allowed_departments").unwrap();
        let r2 = r
            .clone()
            .with_attr("allowed_departments", json!(["engineering", "hr"]));
        assert!(eval(&expr, &p, &r2));
        assert!(!eval(&expr, &p, &r));
    }

    #[test]
    fn test_eval_deterministic() {
        let expr = parse("R.attr.owner == P.id && P.attr.clearance >= 2").unwrap();
        let p = emp1();
        let r = profile("emp1");
        let first = eval(&expr, &p, &r);
        for _ in 0..10 {
            assert_eq!(eval(&expr, &p, &r), first);
        }
    }
}
