//! HTTP routes over an [`AgentService`] (feature `http-server`).
//!
//! | Method | Path                                   | Body / Response                                   |
//! |--------|----------------------------------------|---------------------------------------------------|
//! | POST   | `/{agent_key}`                         | `{query, correlation_id?}` → `{response, correlation_id}` |
//! | DELETE | `/memory/{agent_key}/{correlation_id}` | → `{"status": "deleted"}` or 404                  |
//! | GET    | `/services`                            | → `{"services": [...]}`                           |
//!
//! ```rust,no_run
//! use agentry::config::Settings;
//! use agentry::http::serve;
//! use agentry::library::load_library;
//! use agentry::service::AgentService;
//! use std::sync::Arc;
//!
//! # async {
//! let settings = Settings::from_env();
//! let agents = load_library("agents", &settings).unwrap();
//! let service = Arc::new(AgentService::from_library(agents, &settings, None).unwrap());
//! serve(service, "127.0.0.1:8000".parse().unwrap()).await.unwrap();
//! # };
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::agentry::error::AgentError;
use crate::agentry::service::AgentService;

/// Body of `POST /{agent_key}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub query: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Reply of `POST /{agent_key}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,
    pub correlation_id: String,
}

fn error_response(err: AgentError) -> Response {
    let status = match &err {
        AgentError::UnknownAgent(_) | AgentError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        AgentError::TurnFailed(_) => StatusCode::BAD_GATEWAY,
        AgentError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"detail": err.to_string()}))).into_response()
}

async fn respond(
    State(service): State<Arc<AgentService>>,
    Path(agent_key): Path<String>,
    Json(request): Json<AgentRequest>,
) -> Response {
    match service
        .respond(&agent_key, request.correlation_id.as_deref(), &request.query)
        .await
    {
        Ok((response, correlation_id)) => Json(AgentResponse {
            response,
            correlation_id,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_memory(
    State(service): State<Arc<AgentService>>,
    Path((agent_key, correlation_id)): Path<(String, String)>,
) -> Response {
    match service.delete_session(&agent_key, &correlation_id).await {
        Ok(()) => Json(json!({"status": "deleted"})).into_response(),
        Err(AgentError::SessionNotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Memory not found"})),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_services(State(service): State<Arc<AgentService>>) -> Response {
    Json(json!({"services": service.agent_infos()})).into_response()
}

/// Router serving every agent of `service`.
pub fn router(service: Arc<AgentService>) -> Router {
    Router::new()
        .route("/services", get(list_services))
        .route("/memory/{agent_key}/{correlation_id}", delete(delete_memory))
        .route("/{agent_key}", post(respond))
        .with_state(service)
}

/// Bind `addr` and serve until the server fails.
pub async fn serve(
    service: Arc<AgentService>,
    addr: SocketAddr,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "serving agents [{}] on http://{}",
        service.agent_keys().collect::<Vec<_>>().join(", "),
        addr
    );
    axum::serve(listener, router(service)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentry::client_wrapper::{
        AssistantReply, CompletionClient, CompletionError, CompletionRequest,
    };
    use crate::agentry::config::AgentDescriptor;
    use crate::agentry::orchestrator::AgentOrchestrator;
    use crate::agentry::session_store::SessionStore;
    use crate::agentry::tool_protocols::LocalToolProtocol;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Pong;

    #[async_trait]
    impl CompletionClient for Pong {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<AssistantReply, CompletionError> {
            Ok(AssistantReply::text(r#"{"textResponse":"pong"}"#))
        }

        fn model_name(&self) -> &str {
            "pong"
        }
    }

    fn app() -> (Router, Arc<AgentService>) {
        let mut service = AgentService::new(SessionStore::new());
        service.register(AgentOrchestrator::new(
            "ping",
            AgentDescriptor {
                name: "Ping".into(),
                description: "Answers pong".into(),
                model: "openai/pong".into(),
                ..Default::default()
            },
            "Say pong.",
            Arc::new(Pong),
            Arc::new(LocalToolProtocol::new()),
        ));
        let service = Arc::new(service);
        (router(Arc::clone(&service)), service)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_agent_returns_response_and_correlation_id() {
        let (app, service) = app();
        let response = app
            .oneshot(
                Request::post("/ping")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"ping","correlation_id":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], "pong");
        assert_eq!(body["correlation_id"], "abc");
        assert!(service.sessions().contains("ping", "abc"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_404() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::post("/nobody")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_memory_routes() {
        let (app, service) = app();
        service.sessions().get_or_create("ping", Some("abc"));

        let response = app
            .clone()
            .oneshot(Request::delete("/memory/ping/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "deleted"}));

        let response = app
            .oneshot(Request::delete("/memory/ping/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_services_lists_agents() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/services").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["services"][0]["name"], "ping");
        assert_eq!(body["services"][0]["display_name"], "Ping");
    }
}
