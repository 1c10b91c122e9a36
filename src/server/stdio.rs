//! Line-delimited JSON-RPC over stdio.
//!
//! One JSON object per `\n`-terminated line, both directions. Each
//! request runs as its own task; responses are funneled through a
//! writer channel so concurrent completions never interleave bytes on
//! stdout. Stdout belongs to the protocol; logs go to stderr.
//!
//! The session id rides in the request's `meta.session_id` field; the
//! tenant is the configured default (local mode has no bearer tokens).

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::rpc::{RpcRequest, RpcResponse, METHOD_NOT_FOUND, PARSE_ERROR};
use super::tools::{self, DispatchError, ToolContext};
use super::AppState;

/// Serve the stdio transport until EOF or an interrupt signal.
///
/// # Errors
///
/// Returns an error if stdin/stdout I/O fails.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    // Serialized writer: tasks send finished responses, one task owns
    // stdout.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    tracing::info!("stdio transport ready");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    None => break, // EOF
                    Some(line) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let state = state.clone();
                        let tx = tx.clone();
                        let raw = trimmed.to_string();
                        tokio::spawn(async move {
                            if let Some(response) = handle_line(&state, &raw).await {
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = tx.send(json);
                                }
                            }
                        });
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; draining stdio transport");
                break;
            }
        }
    }

    // Dropping our sender lets the writer drain queued responses once
    // in-flight tasks finish; a hung task cannot stall exit forever.
    drop(tx);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), writer).await;
    Ok(())
}

/// Process one request line. Returns `None` for notifications (no id).
async fn handle_line(state: &AppState, raw: &str) -> Option<RpcResponse> {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return Some(RpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {e}"),
            ));
        }
    };

    let id = request.id.clone();
    let response = respond(state, request).await;

    match id {
        Some(id) => Some(finish(id, response)),
        None => None,
    }
}

enum Outcome {
    Ok(Value),
    InvalidParams(String),
    Domain(crate::error::Error),
    UnknownMethod(String),
}

async fn respond(state: &AppState, request: RpcRequest) -> Outcome {
    if !tools::is_tool(&request.method) {
        return Outcome::UnknownMethod(request.method);
    }

    let ctx = ToolContext {
        tenant: state.default_tenant.clone(),
        session_id: request.meta.and_then(|m| m.session_id),
    };

    match tools::dispatch(state, &ctx, &request.method, request.params).await {
        Ok(value) => Outcome::Ok(value),
        Err(DispatchError::InvalidParams(message)) => Outcome::InvalidParams(message),
        Err(DispatchError::Domain(err)) => Outcome::Domain(err),
    }
}

fn finish(id: Value, outcome: Outcome) -> RpcResponse {
    match outcome {
        Outcome::Ok(value) => RpcResponse::success(id, value),
        Outcome::InvalidParams(message) => RpcResponse::invalid_params(id, message),
        Outcome::Domain(err) => {
            tracing::debug!(code = err.error_code().as_str(), "tool call failed");
            RpcResponse::domain_error(id, &err)
        }
        Outcome::UnknownMethod(method) => RpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method: {method}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use serde_json::json;

    fn state() -> AppState {
        AppState::new(SqliteStorage::open_memory().unwrap(), "local")
    }

    #[tokio::test]
    async fn test_handle_line_success() {
        let state = state();
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "get_project",
            "params": {},
        })
        .to_string();

        let response = handle_line(&state, &raw).await.unwrap();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["result"]["name"], "Default Project");
    }

    #[tokio::test]
    async fn test_handle_line_parse_error() {
        let state = state();
        let response = handle_line(&state, "{not json").await.unwrap();
        assert_eq!(response.error.as_ref().unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_params_use_invalid_params_code() {
        use crate::server::rpc::INVALID_PARAMS;

        let state = state();
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "transition",
            "params": {"id": "rec_1", "to_state": 42},
        })
        .to_string();

        let response = handle_line(&state, &raw).await.unwrap();
        assert_eq!(response.error.as_ref().unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_line_unknown_method() {
        let state = state();
        let raw = json!({"jsonrpc": "2.0", "id": 2, "method": "no_such_tool"}).to_string();
        let response = handle_line(&state, &raw).await.unwrap();
        assert_eq!(response.error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let state = state();
        let raw = json!({"jsonrpc": "2.0", "method": "get_project"}).to_string();
        assert!(handle_line(&state, &raw).await.is_none());
    }

    #[tokio::test]
    async fn test_meta_session_id_reaches_dispatch() {
        let state = state();

        // Create a record through a meta-supplied session id; the
        // session is minted on first use and the record auto-activated.
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "create_record",
            "params": {"type": "note", "title": "T", "summary": "S", "body": "B"},
            "meta": {"session_id": "sess_meta"},
        })
        .to_string();

        let response = handle_line(&state, &raw).await.unwrap();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["result"]["auto_activated"], true);

        let store = state.store.lock().await;
        assert!(crate::storage::SessionStore::get_session(&*store, "local", "sess_meta")
            .unwrap()
            .is_some());
    }
}
