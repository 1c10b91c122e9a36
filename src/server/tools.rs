//! Tool dispatch.
//!
//! A static table from tool name to handler: the method name of the
//! JSON-RPC request is the tool name, `params` its argument object.
//! The dispatcher resolves the tenant and session id (injected by the
//! transport), falls back to the default project when a `project_id` is
//! omitted, and is the single point translating domain errors into API
//! error payloads. A detected update conflict is returned as a success
//! payload with a `conflict` field.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::RecordState;
use crate::service::{activity, project, record, session};
use crate::storage::{ActivityFilter, RecordFilter, SearchFilter, SqliteStorage};

use super::AppState;

/// How a tool invocation fails, from the transport's point of view.
///
/// An argument object that does not deserialize into the tool's
/// declared inputs is a protocol fault and maps to JSON-RPC `-32602`;
/// everything the services reject is a domain error carrying a stable
/// API code, mapped to `-32000` with structured data.
#[derive(Debug)]
pub enum DispatchError {
    InvalidParams(String),
    Domain(Error),
}

impl From<Error> for DispatchError {
    fn from(err: Error) -> Self {
        Self::Domain(err)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Domain(Error::Json(err))
    }
}

/// Every tool the dispatcher knows, in the order they are documented.
pub const TOOL_NAMES: &[&str] = &[
    "create_project",
    "list_projects",
    "get_project",
    "get_project_overview",
    "search_records",
    "list_records",
    "get_record_ref",
    "activate",
    "sync_session",
    "create_record",
    "update_record",
    "transition",
    "save_session",
    "close_session",
    "branch_session",
    "get_record_history",
    "get_active_sessions",
    "get_recent_activity",
];

/// True when the method names a known tool.
#[must_use]
pub fn is_tool(method: &str) -> bool {
    TOOL_NAMES.contains(&method)
}

/// Per-request identity resolved by the transport.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant: String,
    pub session_id: Option<String>,
}

// ── Tool argument shapes ──────────────────────────────────────

#[derive(Deserialize)]
struct CreateProjectArgs {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize, Default)]
struct GetProjectArgs {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize, Default)]
struct OverviewArgs {
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Deserialize)]
struct SearchArgs {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    query: String,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

#[derive(Deserialize, Default)]
struct ListRecordsArgs {
    #[serde(default)]
    project_id: Option<String>,
    /// Empty string means "roots only"; absent means no parent filter.
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

#[derive(Deserialize)]
struct IdArgs {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize, Default)]
struct SessionArgs {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct BranchArgs {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    focus_record: Option<String>,
}

#[derive(Deserialize)]
struct HistoryArgs {
    #[serde(default)]
    id: String,
    #[serde(default)]
    limit: u32,
}

#[derive(Deserialize)]
struct ActiveSessionsArgs {
    #[serde(default)]
    record_id: String,
}

#[derive(Deserialize, Default)]
struct RecentActivityArgs {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    limit: u32,
}

// ── Helpers ───────────────────────────────────────────────────

fn parse_args<T: serde::de::DeserializeOwned>(
    params: Value,
) -> std::result::Result<T, DispatchError> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| DispatchError::InvalidParams(e.to_string()))
}

fn parse_states(states: &[String]) -> Result<Vec<RecordState>> {
    states
        .iter()
        .map(|s| {
            RecordState::parse(s)
                .ok_or_else(|| Error::InvalidInput(format!("unknown state: {s}")))
        })
        .collect()
}

/// `parent_id` tri-state: absent = no filter, "" = roots, id = children.
fn parent_filter(parent_id: Option<String>) -> Option<Option<String>> {
    match parent_id {
        None => None,
        Some(id) if id.is_empty() => Some(None),
        Some(id) => Some(Some(id)),
    }
}

/// Session id for session tools: explicit argument, else the transport
/// channel.
fn session_or_channel(arg: Option<String>, ctx: &ToolContext) -> Result<String> {
    arg.filter(|s| !s.is_empty())
        .or_else(|| ctx.session_id.clone())
        .ok_or_else(|| Error::SessionNotFound {
            id: "(none provided)".to_string(),
        })
}

/// Session id for write tools: the transport channel only. Missing
/// means the caller never activated anything.
fn writing_session(ctx: &ToolContext, record_id: &str) -> Result<String> {
    ctx.session_id
        .clone()
        .ok_or_else(|| Error::NotActivated {
            session_id: "(none provided)".to_string(),
            id: record_id.to_string(),
        })
}

fn resolve_project_id(
    store: &mut SqliteStorage,
    tenant: &str,
    id: Option<&str>,
) -> Result<String> {
    Ok(project::resolve(store, tenant, id)?.id)
}

// ── Dispatch ──────────────────────────────────────────────────

/// Invoke a tool by name.
///
/// The store lock is held for the duration of one call; every store
/// operation inside is a short transaction.
pub async fn dispatch(
    state: &AppState,
    ctx: &ToolContext,
    method: &str,
    params: Value,
) -> std::result::Result<Value, DispatchError> {
    let mut guard = state.store.lock().await;
    let store = &mut *guard;
    let tenant = ctx.tenant.as_str();

    match method {
        "create_project" => {
            let args: CreateProjectArgs = parse_args(params)?;
            let created = project::create(
                store,
                tenant,
                &args.name,
                args.description.as_deref(),
                args.id.as_deref(),
            )?;
            Ok(serde_json::to_value(created)?)
        }

        "list_projects" => {
            let projects = project::list(store, tenant)?;
            Ok(serde_json::to_value(projects)?)
        }

        "get_project" => {
            let args: GetProjectArgs = parse_args(params)?;
            let found = project::resolve(store, tenant, args.id.as_deref())?;
            Ok(serde_json::to_value(found)?)
        }

        "get_project_overview" => {
            let args: OverviewArgs = parse_args(params)?;
            let view = project::overview(store, tenant, args.project_id.as_deref())?;
            Ok(serde_json::to_value(view)?)
        }

        "search_records" => {
            let args: SearchArgs = parse_args(params)?;
            let project_id = resolve_project_id(store, tenant, args.project_id.as_deref())?;
            let filter = SearchFilter {
                project_id,
                states: parse_states(&args.states)?,
                types: args.types,
                limit: args.limit,
                offset: args.offset,
            };
            let hits = record::search(store, tenant, &args.query, &filter)?;
            Ok(serde_json::to_value(hits)?)
        }

        "list_records" => {
            let args: ListRecordsArgs = parse_args(params)?;
            let project_id = resolve_project_id(store, tenant, args.project_id.as_deref())?;
            let filter = RecordFilter {
                project_id,
                parent: parent_filter(args.parent_id),
                states: parse_states(&args.states)?,
                types: args.types,
                limit: args.limit,
                offset: args.offset,
            };
            let refs = record::list(store, tenant, &filter)?;
            Ok(serde_json::to_value(refs)?)
        }

        "get_record_ref" => {
            let args: IdArgs = parse_args(params)?;
            let reference = record::get_ref(store, tenant, &args.id)?;
            Ok(serde_json::to_value(reference)?)
        }

        "activate" => {
            let args: IdArgs = parse_args(params)?;
            let result = session::activate(store, tenant, ctx.session_id.as_deref(), &args.id)?;
            Ok(serde_json::to_value(result)?)
        }

        "sync_session" => {
            let args: SessionArgs = parse_args(params)?;
            let session_id = session_or_channel(args.session_id, ctx)?;
            let result = session::sync(store, tenant, &session_id)?;
            let mut out = json!({
                "session_id": result.session_id,
                "staleness": result.tick_gap,
                "session_status": result.status,
            });
            if result.tick_gap > 0 {
                out["warning"] = Value::String(format!(
                    "{} change(s) committed since last sync; re-activate records before writing",
                    result.tick_gap
                ));
            }
            Ok(out)
        }

        "create_record" => {
            let mut input: record::CreateRecordInput = parse_args(params)?;
            if input.project_id.is_empty() {
                input.project_id = resolve_project_id(store, tenant, None)?;
            }
            let created = record::create(store, tenant, ctx.session_id.as_deref(), &input)?;
            Ok(json!({
                "record": created.record,
                "auto_activated": created.auto_activated,
            }))
        }

        "update_record" => {
            let args: record::UpdateRecordInput = parse_args(params)?;
            let session_id = writing_session(ctx, &args.id)?;
            match record::update(store, tenant, &session_id, &args)? {
                record::UpdateOutcome::Updated(rec) => Ok(json!({ "record": rec })),
                record::UpdateOutcome::Conflict { message, remote } => Ok(json!({
                    "conflict": { "message": message, "other_version": remote },
                })),
            }
        }

        "transition" => {
            let args: record::TransitionInput = parse_args(params)?;
            let session_id = writing_session(ctx, &args.id)?;
            let rec = record::transition(store, tenant, &session_id, &args)?;
            Ok(serde_json::to_value(rec)?)
        }

        "save_session" => {
            let args: SessionArgs = parse_args(params)?;
            let session_id = session_or_channel(args.session_id, ctx)?;
            session::save(store, tenant, &session_id)?;
            Ok(json!({ "status": "ok" }))
        }

        "close_session" => {
            let args: SessionArgs = parse_args(params)?;
            let session_id = session_or_channel(args.session_id, ctx)?;
            session::close(store, tenant, &session_id)?;
            Ok(json!({ "status": "closed" }))
        }

        "branch_session" => {
            let args: BranchArgs = parse_args(params)?;
            let source = session_or_channel(args.session_id, ctx)?;
            let branch = session::branch(store, tenant, &source, args.focus_record.as_deref())?;
            Ok(serde_json::to_value(branch)?)
        }

        "get_record_history" => {
            let args: HistoryArgs = parse_args(params)?;
            let history = activity::record_history(store, tenant, &args.id, args.limit)?;
            Ok(serde_json::to_value(history)?)
        }

        "get_active_sessions" => {
            let args: ActiveSessionsArgs = parse_args(params)?;
            let sessions = session::sessions_for_record(
                store,
                tenant,
                &args.record_id,
                ctx.session_id.as_deref(),
            )?;
            Ok(serde_json::to_value(sessions)?)
        }

        "get_recent_activity" => {
            let args: RecentActivityArgs = parse_args(params)?;
            // Without any scope at all, fall back to the default project
            let project_id = match (&args.project_id, &args.record_id) {
                (None, None) => Some(resolve_project_id(store, tenant, None)?),
                _ => args.project_id,
            };
            let filter = ActivityFilter {
                project_id,
                record_id: args.record_id,
                limit: args.limit,
                ..Default::default()
            };
            let entries = activity::list(store, tenant, &filter)?;
            Ok(serde_json::to_value(entries)?)
        }

        other => Err(Error::Other(format!("unknown tool: {other}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(SqliteStorage::open_memory().unwrap(), "local")
    }

    fn ctx(session: Option<&str>) -> ToolContext {
        ToolContext {
            tenant: "local".to_string(),
            session_id: session.map(ToString::to_string),
        }
    }

    #[tokio::test]
    async fn test_get_project_lazily_creates_default() {
        let state = state();

        let first = dispatch(&state, &ctx(None), "get_project", Value::Null)
            .await
            .unwrap();
        assert_eq!(first["name"], "Default Project");
        assert_eq!(first["tick"], 0);

        let second = dispatch(&state, &ctx(None), "get_project", Value::Null)
            .await
            .unwrap();
        assert_eq!(second["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_update_without_session_is_not_activated() {
        let state = state();
        let err = dispatch(
            &state,
            &ctx(None),
            "update_record",
            json!({"id": "rec_1", "title": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(Error::NotActivated { .. })));
    }

    #[tokio::test]
    async fn test_unknown_state_filter_is_invalid_input() {
        let state = state();
        let err = dispatch(
            &state,
            &ctx(None),
            "list_records",
            json!({"states": ["PENDING"]}),
        )
        .await
        .unwrap_err();
        // Well-formed params, bad value: a domain error, not -32602
        assert!(matches!(err, DispatchError::Domain(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_malformed_params_is_protocol_error() {
        let state = state();
        let err = dispatch(
            &state,
            &ctx(Some("S")),
            "transition",
            json!({"id": "rec_1", "to_state": 42}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_parent_filter_tri_state() {
        assert_eq!(parent_filter(None), None);
        assert_eq!(parent_filter(Some(String::new())), Some(None));
        assert_eq!(
            parent_filter(Some("rec_1".into())),
            Some(Some("rec_1".into()))
        );
    }

    #[tokio::test]
    async fn test_create_record_falls_back_to_default_project() {
        let state = state();
        let created = dispatch(
            &state,
            &ctx(Some("sess_pre")),
            "create_record",
            json!({"type": "note", "title": "T", "summary": "S", "body": "B"}),
        )
        .await
        .unwrap();

        assert_eq!(created["auto_activated"], true);
        assert_eq!(created["record"]["tick"], 1);

        let project = dispatch(&state, &ctx(None), "get_project", Value::Null)
            .await
            .unwrap();
        assert_eq!(created["record"]["project_id"], project["id"]);
    }

    #[tokio::test]
    async fn test_sync_session_requires_some_session() {
        let state = state();
        let err = dispatch(&state, &ctx(None), "sync_session", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(Error::SessionNotFound { .. })));
    }
}
