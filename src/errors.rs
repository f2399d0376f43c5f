use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PalisadeError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(palisade::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(palisade::invalid_policy),
        help("Each policy document must contain one `resource` node whose rules declare non-empty `actions`, an `effect` of \"allow\" or \"deny\", and `roles`")
    )]
    InvalidPolicy(String),

    #[error("Duplicate policy for resource kind `{0}`")]
    #[diagnostic(
        code(palisade::duplicate_policy),
        help("Each resource kind may be governed by exactly one policy document")
    )]
    DuplicatePolicy(String),

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(palisade::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths are rooted at P/principal or R/resource (e.g. R.attr.owner)")
    )]
    InvalidCondition(String),

    #[error("Invalid request: {0}")]
    #[diagnostic(
        code(palisade::invalid_request),
        help("A check request needs a non-empty principal id, resource kind and id, and at least one named action")
    )]
    InvalidRequest(String),

    #[error("Invalid test suite: {0}")]
    #[diagnostic(
        code(palisade::invalid_suite),
        help("A suite document contains one `suite` node with `principal`, `resource` and `test` children")
    )]
    InvalidSuite(String),

    #[error("Unresolved fixture `{name}` in test `{test}`")]
    #[diagnostic(
        code(palisade::unresolved_fixture),
        help("Every principal/resource named by a test must be declared as a fixture in the same suite")
    )]
    UnresolvedFixture { name: String, test: String },

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(palisade::kdl_parse),
        help("Check your KDL file syntax — see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(palisade::io))]
    Io(#[from] std::io::Error),
}

impl IntoResponse for PalisadeError {
    fn into_response(self) -> Response {
        let status = match &self {
            PalisadeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
