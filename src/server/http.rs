//! HTTP transport.
//!
//! `POST /rpc` carries one JSON-RPC request per call; `GET /health`
//! answers "ok". Callers authenticate with `Authorization: Bearer
//! <token>`, which resolves to a tenant through the api-key table; the
//! session id rides in the `Mcp-Session-Id` header. Shutdown is
//! signal-driven with a bounded drain period for in-flight requests.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::error::Error;

use super::auth;
use super::rpc::{RpcRequest, RpcResponse, METHOD_NOT_FOUND};
use super::tools::{self, DispatchError, ToolContext};
use super::AppState;

/// Request header carrying the session id.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Build the router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    let id = request.id.clone().unwrap_or(Value::Null);

    let tenant = match resolve_tenant(&state, &headers).await {
        Ok(tenant) => tenant,
        Err(err) => return Json(RpcResponse::domain_error(id, &err)),
    };

    if !tools::is_tool(&request.method) {
        return Json(RpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method: {}", request.method),
        ));
    }

    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .filter(|s| !s.is_empty());

    let ctx = ToolContext { tenant, session_id };

    match tools::dispatch(&state, &ctx, &request.method, request.params).await {
        Ok(result) => Json(RpcResponse::success(id, result)),
        Err(DispatchError::InvalidParams(message)) => {
            Json(RpcResponse::invalid_params(id, message))
        }
        Err(DispatchError::Domain(err)) => {
            tracing::debug!(code = err.error_code().as_str(), "tool call failed");
            Json(RpcResponse::domain_error(id, &err))
        }
    }
}

async fn resolve_tenant(state: &AppState, headers: &HeaderMap) -> Result<String, Error> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("missing Authorization header".into()))?;

    let token = auth::bearer_token(header)?;
    let store = state.store.lock().await;
    auth::tenant_for_token(&*store, token)
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Serve HTTP until a shutdown signal, then drain in-flight requests
/// for at most `grace`.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn serve(state: AppState, addr: SocketAddr, grace: Duration) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http transport listening");

    let (notify_tx, mut drain_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = notify_tx.send(true);
    });

    let mut graceful_rx = drain_rx.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = graceful_rx.changed().await;
        })
        .into_future();

    tokio::select! {
        result = server => result.map_err(Into::into),
        () = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("drain grace period elapsed; exiting");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ApiKeyStore, SqliteStorage};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::util::ServiceExt;

    async fn call(
        app: Router,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (axum::http::StatusCode, Value) {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .method("POST")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string()))
                .unwrap(),
            None => builder.method("GET").body(axum::body::Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };
        (status, value)
    }

    fn authed_state() -> (AppState, String) {
        let mut store = SqliteStorage::open_memory().unwrap();
        let token = auth::generate_token();
        store
            .insert_api_key(&auth::hash_token(&token), "tenant-a", Some("test"))
            .unwrap();
        (AppState::new(store, "local"), token)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _) = authed_state();
        let (status, body) = call(router(state), "/health", None, &[]).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));
    }

    #[tokio::test]
    async fn test_rpc_requires_bearer_token() {
        let (state, _) = authed_state();
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "get_project"});

        let (_, body) = call(router(state), "/rpc", Some(request), &[]).await;
        assert_eq!(body["error"]["data"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_rpc_rejects_unknown_token() {
        let (state, _) = authed_state();
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "get_project"});

        let (_, body) = call(
            router(state),
            "/rpc",
            Some(request),
            &[("authorization", "Bearer arb_bogus")],
        )
        .await;
        assert_eq!(body["error"]["data"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_rpc_resolves_tenant_from_token() {
        let (state, token) = authed_state();
        let auth_header = format!("Bearer {token}");
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "get_project"});

        let (_, body) = call(
            router(state.clone()),
            "/rpc",
            Some(request),
            &[("authorization", auth_header.as_str())],
        )
        .await;
        assert_eq!(body["result"]["name"], "Default Project");

        // The default project landed under the token's tenant, not the
        // local fallback.
        let store = state.store.lock().await;
        use crate::storage::ProjectStore;
        assert_eq!(store.list_projects("tenant-a").unwrap().len(), 1);
        assert!(store.list_projects("local").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_header_reaches_dispatch() {
        let (state, token) = authed_state();
        let auth_header = format!("Bearer {token}");

        let request = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "create_record",
            "params": {"type": "note", "title": "T", "summary": "S", "body": "B"},
        });
        let (_, body) = call(
            router(state),
            "/rpc",
            Some(request),
            &[
                ("authorization", auth_header.as_str()),
                (SESSION_HEADER, "sess_http"),
            ],
        )
        .await;

        assert_eq!(body["result"]["auto_activated"], true);
    }

    #[tokio::test]
    async fn test_malformed_params_code() {
        use crate::server::rpc::INVALID_PARAMS;

        let (state, token) = authed_state();
        let auth_header = format!("Bearer {token}");
        let request = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "transition",
            "params": {"id": "rec_1", "to_state": 42},
        });

        let (_, body) = call(
            router(state),
            "/rpc",
            Some(request),
            &[("authorization", auth_header.as_str())],
        )
        .await;
        assert_eq!(body["error"]["code"], INVALID_PARAMS);
        assert!(body["error"].get("data").is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_code() {
        let (state, token) = authed_state();
        let auth_header = format!("Bearer {token}");
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": "bogus"});

        let (_, body) = call(
            router(state),
            "/rpc",
            Some(request),
            &[("authorization", auth_header.as_str())],
        )
        .await;
        assert_eq!(body["error"]["code"], METHOD_NOT_FOUND);
    }
}
