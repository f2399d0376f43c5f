//! Thin HTTP front end over the decision engine. The transport adds no
//! semantics: it deserializes a check request, calls the engine, and
//! serializes the decision.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;

use crate::engine;
use crate::settings::Settings;
use crate::store::PolicyStore;
use crate::types::CheckRequest;

pub fn router(store: Arc<PolicyStore>) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/healthz", get(health))
        .with_state(store)
}

async fn handle_check(
    State(store): State<Arc<PolicyStore>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    match engine::check(&store, &req.principal, &req.resource, &req.actions) {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn serve(settings: &Settings, store: PolicyStore) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .into_diagnostic()?;

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "palisade listening");
    axum::serve(listener, router(Arc::new(store)))
        .await
        .into_diagnostic()?;
    Ok(())
}
