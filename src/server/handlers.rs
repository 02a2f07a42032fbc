use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{presets, ConfigError, ServerConfig};
use crate::k8s::JobState;
use crate::server::state::AppState;
use crate::session::{ServerHandle, SessionError, WaitError};

/// Request body for `POST /create_mcp_server`
#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub runtime_exec: Option<String>,
    pub runtime_mcp: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    /// Named preset ("fetch", "git", ...); overrides the runtime fields
    pub preset: Option<String>,
    #[serde(default = "default_true")]
    pub wait_for_ready: bool,
}

/// Request body for `POST /delete_mcp_server`
#[derive(Debug, Deserialize)]
pub struct DeleteServerRequest {
    pub name: String,
    #[serde(default = "default_true")]
    pub wait_for_deletion: bool,
}

fn default_true() -> bool {
    true
}

/// Wire representation of a running server
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    pub pod_name: String,
    pub url: String,
    pub sse_url: String,
    pub config: ServerConfig,
}

impl From<ServerHandle> for ServerResponse {
    fn from(handle: ServerHandle) -> Self {
        Self {
            pod_name: handle.pod_name.clone(),
            url: handle.url(),
            sse_url: handle.sse_url(),
            config: handle.config,
        }
    }
}

/// Error translated to an HTTP response
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::JobNotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Wait(WaitError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
    }
}

/// Service banner
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// List all registered MCP servers
pub async fn list_mcp_servers(State(state): State<AppState>) -> Json<Vec<ServerResponse>> {
    let servers = state.manager.servers().into_iter().map(Into::into).collect();
    Json(servers)
}

/// Create a new MCP server from a preset or an explicit runtime pair
pub async fn create_mcp_server(
    State(state): State<AppState>,
    Json(request): Json<CreateServerRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    let config = build_config(request.runtime_exec, request.runtime_mcp, request.env, request.preset)?;
    let handle = state.manager.create_server(config, request.wait_for_ready).await?;
    Ok(Json(handle.into()))
}

/// Delete an MCP server by name
pub async fn delete_mcp_server(
    State(state): State<AppState>,
    Json(request): Json<DeleteServerRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    let handle = state
        .manager
        .delete_server(&request.name, request.wait_for_deletion)
        .await?;
    Ok(Json(handle.into()))
}

/// Current job status of an MCP server
pub async fn get_mcp_server_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobState>, ApiError> {
    let status = state.manager.get_job_status(&name).await?;
    Ok(Json(status))
}

fn build_config(
    runtime_exec: Option<String>,
    runtime_mcp: Option<String>,
    env: Option<HashMap<String, String>>,
    preset: Option<String>,
) -> Result<ServerConfig, ApiError> {
    if let Some(name) = preset {
        return presets::preset(&name).ok_or_else(|| {
            ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("unknown preset '{name}'"),
            )
        });
    }

    if runtime_exec.is_none() && runtime_mcp.is_none() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "either a preset or runtime_exec and runtime_mcp are required",
        ));
    }

    let mut builder = ServerConfig::builder();
    if let Some(exec) = runtime_exec {
        builder = builder.runtime_exec(exec);
    }
    if let Some(mcp) = runtime_mcp {
        builder = builder.runtime_mcp(mcp);
    }
    if let Some(env) = env {
        builder = builder.env(env);
    }
    Ok(builder.build()?)
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/list_mcp_servers", get(list_mcp_servers))
        .route("/create_mcp_server", post(create_mcp_server))
        .route("/delete_mcp_server", post(delete_mcp_server))
        .route("/get_mcp_server_status/{name}", get(get_mcp_server_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::k8s::client::mock::MockControlPlane;
    use crate::session::SessionManager;

    async fn create_test_app() -> (Router, Arc<SessionManager>) {
        let mock = Arc::new(MockControlPlane::new());
        let manager = Arc::new(
            SessionManager::new("default")
                .with_timing(Duration::from_millis(10), Duration::from_millis(100))
                .with_control_plane(mock),
        );
        manager.enter().await.unwrap();
        (create_router(AppState::new(manager.clone())), manager)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_root_banner() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_servers_empty() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/list_mcp_servers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_server_with_runtime_pair() {
        let (app, manager) = create_test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/create_mcp_server",
                serde_json::json!({
                    "runtime_exec": "uvx",
                    "runtime_mcp": "mcp-server-fetch",
                    "env": {"HTTP_PROXY": "http://proxy:3128"},
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(manager.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_create_server_with_preset() {
        let (app, manager) = create_test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/create_mcp_server",
                serde_json::json!({"preset": "fetch"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(manager.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_create_server_mismatched_runtime_is_unprocessable() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/create_mcp_server",
                serde_json::json!({"runtime_exec": "uvx"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_create_server_unknown_preset_is_unprocessable() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/create_mcp_server",
                serde_json::json!({"preset": "nope"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_delete_unknown_server_is_not_found() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(json_request(
                "POST",
                "/delete_mcp_server",
                serde_json::json!({"name": "missing"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_existing_server() {
        let (app, manager) = create_test_app().await;
        let handle = manager
            .create_server(crate::config::presets::fetch(), false)
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/delete_mcp_server",
                serde_json::json!({"name": handle.pod_name}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(manager.servers().is_empty());
    }

    #[tokio::test]
    async fn test_status_of_unknown_server_is_not_found() {
        let (app, _) = create_test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/get_mcp_server_status/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
