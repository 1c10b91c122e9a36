//! Session service.
//!
//! Activation is the entry point into writing mode: it selects or mints
//! a session, records the activation edge at the project's current
//! tick, and returns the context bundle: a scoped view of the target's
//! neighborhood. Sync reports staleness as the tick gap between the
//! session's last observed tick and the project clock.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    now_ms, ActivityEntry, ActivityKind, ContextBundle, Record, RecordRef, RecordState, Session,
    SessionStatus,
};
use crate::storage::{ProjectStore, RecordStore, SessionStore};

/// Result of `activate`.
#[derive(Debug, Clone, Serialize)]
pub struct ActivateResult {
    pub session_id: String,
    pub context_bundle: ContextBundle,
    pub warnings: Vec<String>,
}

/// Result of `sync_session`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub session_id: String,
    pub tick_gap: i64,
    pub status: SessionStatus,
}

/// A session holding a record, as reported by `get_active_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPresence {
    pub session_id: String,
    pub last_activity: i64,
    pub is_current: bool,
}

/// Activate a record into a session, minting the session when needed.
///
/// Session selection:
/// - no id: a fresh session focused on the target;
/// - known id: refreshed (active, synced to the current tick, focus set
///   if still unset);
/// - unknown id: created with the given id, so transports can pre-mint
///   session ids.
pub fn activate<S: RecordStore + SessionStore + ProjectStore>(
    store: &mut S,
    tenant: &str,
    session_id: Option<&str>,
    record_id: &str,
) -> Result<ActivateResult> {
    let record = store
        .get_record(tenant, record_id)?
        .ok_or_else(|| Error::RecordNotFound {
            id: record_id.to_string(),
        })?;

    let project = store
        .get_project(tenant, &record.project_id)?
        .ok_or_else(|| Error::ProjectNotFound {
            id: record.project_id.clone(),
        })?;
    let tick = project.tick;

    let (session, is_new) = match session_id {
        None => (
            Session::new(tenant, &record.project_id, None, Some(record_id), tick),
            true,
        ),
        Some(sid) => match store.get_session(tenant, sid)? {
            Some(mut session) => {
                if session.project_id != record.project_id {
                    return Err(Error::InvalidInput(format!(
                        "session {sid} belongs to project {}; sessions never migrate",
                        session.project_id
                    )));
                }
                session.status = SessionStatus::Active;
                session.last_sync_tick = tick;
                session.last_activity = now_ms();
                if session.focus_record.is_none() {
                    session.focus_record = Some(record_id.to_string());
                }
                (session, false)
            }
            None => (
                Session::new(tenant, &record.project_id, Some(sid), Some(record_id), tick),
                true,
            ),
        },
    };

    store.persist_activation(&session, record_id, tick, is_new)?;

    let context_bundle = build_bundle(store, tenant, &record)?;

    // Other live sessions holding this record are worth flagging.
    let warnings = store
        .sessions_for_record(tenant, record_id)?
        .into_iter()
        .filter(|s| s.id != session.id)
        .map(|s| format!("record active in session {}", s.id))
        .collect();

    tracing::debug!(session_id = %session.id, record_id, tick, "record activated");

    Ok(ActivateResult {
        session_id: session.id,
        context_bundle,
        warnings,
    })
}

/// Assemble the context bundle for a target record.
///
/// Target and parent come back full, OPEN children full, the rest of
/// the children as refs, grandchildren (one more level, any state) as
/// refs. Each list is ordered by `created_at` ASC.
fn build_bundle<S: RecordStore>(store: &S, tenant: &str, target: &Record) -> Result<ContextBundle> {
    let parent = match target.parent_id.as_deref() {
        Some(parent_id) => store.get_record(tenant, parent_id)?,
        None => None,
    };

    let children = store.children_of(tenant, &target.id)?;

    let mut open_children = Vec::new();
    let mut other_children = Vec::new();
    let mut grandchildren: Vec<RecordRef> = Vec::new();

    for child in children {
        for grandchild in store.children_of(tenant, &child.id)? {
            if let Some(r) = store.get_record_ref(tenant, &grandchild.id)? {
                grandchildren.push(r);
            }
        }
        if child.state == RecordState::Open {
            open_children.push(child);
        } else if let Some(r) = store.get_record_ref(tenant, &child.id)? {
            other_children.push(r);
        }
    }
    grandchildren.sort_by_key(|r| r.created_at);

    Ok(ContextBundle {
        target: target.clone(),
        parent,
        open_children,
        other_children,
        grandchildren,
    })
}

fn load_session<S: SessionStore>(store: &S, tenant: &str, session_id: &str) -> Result<Session> {
    store
        .get_session(tenant, session_id)?
        .ok_or_else(|| Error::SessionNotFound {
            id: session_id.to_string(),
        })
}

/// Sync a session to the project clock and report the tick gap.
pub fn sync<S: SessionStore + ProjectStore>(
    store: &mut S,
    tenant: &str,
    session_id: &str,
) -> Result<SyncResult> {
    let mut session = load_session(store, tenant, session_id)?;
    let project = store
        .get_project(tenant, &session.project_id)?
        .ok_or_else(|| Error::ProjectNotFound {
            id: session.project_id.clone(),
        })?;

    let tick_gap = project.tick - session.last_sync_tick;
    session.last_sync_tick = project.tick;
    session.last_activity = now_ms();
    session.status = SessionStatus::Active;

    let entry = ActivityEntry::new(
        tenant,
        &session.project_id,
        ActivityKind::SessionSynced,
        &format!("synced (gap {tick_gap})"),
    )
    .with_session(&session.id)
    .at_tick(project.tick);
    store.save_session_state(&session, Some(entry))?;

    Ok(SyncResult {
        session_id: session.id,
        tick_gap,
        status: session.status,
    })
}

/// Save is an explicit checkpoint: same effect as sync, no gap report.
pub fn save<S: SessionStore + ProjectStore>(
    store: &mut S,
    tenant: &str,
    session_id: &str,
) -> Result<()> {
    let mut session = load_session(store, tenant, session_id)?;
    let project = store
        .get_project(tenant, &session.project_id)?
        .ok_or_else(|| Error::ProjectNotFound {
            id: session.project_id.clone(),
        })?;

    session.last_sync_tick = project.tick;
    session.last_activity = now_ms();
    session.status = SessionStatus::Active;

    let entry = ActivityEntry::new(
        tenant,
        &session.project_id,
        ActivityKind::SessionSaved,
        "session saved",
    )
    .with_session(&session.id)
    .at_tick(project.tick);
    store.save_session_state(&session, Some(entry))
}

/// Close a session. Idempotent once closed; unknown ids are an error.
pub fn close<S: SessionStore>(store: &mut S, tenant: &str, session_id: &str) -> Result<()> {
    let mut session = load_session(store, tenant, session_id)?;
    if session.status == SessionStatus::Closed {
        return Ok(());
    }

    session.status = SessionStatus::Closed;
    session.closed_at = Some(now_ms());
    session.last_activity = now_ms();

    let entry = ActivityEntry::new(
        tenant,
        &session.project_id,
        ActivityKind::SessionClosed,
        "session closed",
    )
    .with_session(&session.id)
    .at_tick(session.last_sync_tick);
    store.save_session_state(&session, Some(entry))
}

/// Branch a new session off an existing one.
///
/// The branch shares the project, records its parentage, focuses on the
/// given record (defaulting to the source's focus), and starts lean:
/// only the focus record is activated. The source session is marked
/// stale; it has been superseded.
pub fn branch<S: SessionStore + ProjectStore + RecordStore>(
    store: &mut S,
    tenant: &str,
    source_session_id: &str,
    focus_record_id: Option<&str>,
) -> Result<Session> {
    let source = load_session(store, tenant, source_session_id)?;
    let project = store
        .get_project(tenant, &source.project_id)?
        .ok_or_else(|| Error::ProjectNotFound {
            id: source.project_id.clone(),
        })?;

    let focus = focus_record_id
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .or_else(|| source.focus_record.clone());

    if let Some(focus_id) = focus.as_deref() {
        if store.get_record(tenant, focus_id)?.is_none() {
            return Err(Error::RecordNotFound {
                id: focus_id.to_string(),
            });
        }
    }

    let mut branch = Session::new(tenant, &source.project_id, None, focus.as_deref(), project.tick);
    branch.parent_session = Some(source.id.clone());

    store.branch_session(&source, &branch, focus.as_deref(), project.tick)?;
    tracing::info!(source = %source.id, branch = %branch.id, "session branched");

    Ok(branch)
}

/// Sessions in `{active, stale}` holding a record.
pub fn sessions_for_record<S: SessionStore>(
    store: &S,
    tenant: &str,
    record_id: &str,
    current_session: Option<&str>,
) -> Result<Vec<SessionPresence>> {
    let sessions = store.sessions_for_record(tenant, record_id)?;
    Ok(sessions
        .into_iter()
        .map(|s| SessionPresence {
            is_current: current_session == Some(s.id.as_str()),
            session_id: s.id,
            last_activity: s.last_activity,
        })
        .collect())
}

/// Sessions with status `active` in a project.
pub fn list_active<S: SessionStore>(
    store: &S,
    tenant: &str,
    project_id: &str,
) -> Result<Vec<Session>> {
    store.list_active_sessions(tenant, project_id)
}
