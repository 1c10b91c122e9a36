//! Record service.
//!
//! Validation, the state machine, optimistic updates with conflict
//! surfacing, and relation maintenance. The conflict rule: an update
//! whose activation tick lags the record's current tick does not write;
//! it returns the remote version as a normal result so the agent can
//! reconcile. `force: true` bypasses the check but still goes through
//! the conditional write, so a racing writer is never silently lost.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{
    now_ms, transition_requirement, Record, RecordRef, RecordState, SearchHit, Session,
    TransitionRequirement,
};
use crate::storage::{
    ProjectStore, RecordFilter, RecordStore, SearchFilter, SearchStore, SessionStore,
};

/// Inputs for record creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRecordInput {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: Option<RecordState>,
    #[serde(default)]
    pub related: Vec<String>,
}

/// Result of record creation.
#[derive(Debug, Clone)]
pub struct CreatedRecord {
    pub record: Record,
    /// True when the record was implicitly activated in the creating session.
    pub auto_activated: bool,
}

/// Inputs for record update. Fields left `None` are not touched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecordInput {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub related: Option<Vec<String>>,
    #[serde(default)]
    pub force: bool,
}

/// Outcome of an update: either the write happened, or the caller's
/// view was behind and the remote version is returned for reconciling.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Updated(Record),
    Conflict { message: String, remote: Record },
}

/// Inputs for a state transition.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionInput {
    #[serde(default)]
    pub id: String,
    pub to_state: RecordState,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

fn require_field(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidInput(format!("{name} must not be empty")))
    } else {
        Ok(())
    }
}

/// Load a session and reject writes through closed ones.
fn writable_session<S: SessionStore>(store: &S, tenant: &str, session_id: &str) -> Result<Session> {
    let session = store
        .get_session(tenant, session_id)?
        .ok_or_else(|| Error::SessionNotFound {
            id: session_id.to_string(),
        })?;
    if session.status == crate::model::SessionStatus::Closed {
        return Err(Error::InvalidInput(format!(
            "session {session_id} is closed"
        )));
    }
    Ok(session)
}

/// Create a record.
///
/// A `parent_id` requires an active session holding the parent in its
/// activation set. When a session is supplied, the new record is
/// implicitly activated in it; a session id the store has never seen is
/// minted on the fly (transports may pre-assign session ids).
pub fn create<S: RecordStore + SessionStore + ProjectStore>(
    store: &mut S,
    tenant: &str,
    session_id: Option<&str>,
    input: &CreateRecordInput,
) -> Result<CreatedRecord> {
    require_field(&input.project_id, "project_id")?;
    require_field(&input.record_type, "type")?;
    require_field(&input.title, "title")?;
    require_field(&input.summary, "summary")?;
    require_field(&input.body, "body")?;

    let project = store
        .get_project(tenant, &input.project_id)?
        .ok_or_else(|| Error::ProjectNotFound {
            id: input.project_id.clone(),
        })?;

    if let Some(parent_id) = input.parent_id.as_deref() {
        let parent = store
            .get_record(tenant, parent_id)?
            .ok_or_else(|| Error::RecordNotFound {
                id: parent_id.to_string(),
            })?;
        if parent.project_id != input.project_id {
            return Err(Error::InvalidInput(
                "parent record belongs to a different project".into(),
            ));
        }

        // Child creation is a write against the parent: it must be in
        // the creating session's activation set. A missing or unknown
        // session means there is no such edge.
        let Some(session_id) = session_id else {
            return Err(Error::ParentNotActivated {
                parent_id: parent_id.to_string(),
            });
        };
        match store.get_session(tenant, session_id)? {
            None => {
                return Err(Error::ParentNotActivated {
                    parent_id: parent_id.to_string(),
                });
            }
            Some(session) if session.status == crate::model::SessionStatus::Closed => {
                return Err(Error::InvalidInput(format!(
                    "session {session_id} is closed"
                )));
            }
            Some(_) => {}
        }
        if store.get_activation(session_id, parent_id)?.is_none() {
            return Err(Error::ParentNotActivated {
                parent_id: parent_id.to_string(),
            });
        }
    } else if let Some(session_id) = session_id {
        // Root creation through a transport-minted session id: create
        // the session row on first use, mirroring activate.
        if store.get_session(tenant, session_id)?.is_none() {
            let session =
                Session::new(tenant, &input.project_id, Some(session_id), None, project.tick);
            store.create_session(&session)?;
        }
    }

    let record = Record::new(
        tenant,
        &input.project_id,
        input.record_type.trim(),
        input.title.trim(),
        &input.summary,
        &input.body,
        input.state.unwrap_or_default(),
        input.parent_id.as_deref(),
    );

    let record = store.create_record(&record, &input.related, session_id)?;
    tracing::debug!(record_id = %record.id, tick = record.tick, "record created");

    Ok(CreatedRecord {
        record,
        auto_activated: session_id.is_some(),
    })
}

/// Update a record under optimistic concurrency.
pub fn update<S: RecordStore + SessionStore>(
    store: &mut S,
    tenant: &str,
    session_id: &str,
    input: &UpdateRecordInput,
) -> Result<UpdateOutcome> {
    require_field(&input.id, "id")?;
    require_field(session_id, "session_id")?;

    writable_session(store, tenant, session_id)?;

    // Activation discipline comes before existence: a session that
    // never activated the record gets NOT_ACTIVATED even if the id is
    // also unknown.
    let activation = store
        .get_activation(session_id, &input.id)?
        .ok_or_else(|| Error::NotActivated {
            session_id: session_id.to_string(),
            id: input.id.clone(),
        })?;

    let record = store
        .get_record(tenant, &input.id)?
        .ok_or_else(|| Error::RecordNotFound {
            id: input.id.clone(),
        })?;

    // Conflict rule: the session's view is behind the record. Not an
    // error; hand back the remote version so the agent can reconcile.
    if activation.activation_tick != record.tick && !input.force {
        let message = format!(
            "record changed since activation (tick {} -> {}); review the remote version, then retry with force or re-activate",
            activation.activation_tick, record.tick
        );
        return Ok(UpdateOutcome::Conflict {
            message,
            remote: record,
        });
    }

    // Overlay only the provided fields onto the current version.
    let mut next = record.clone();
    if let Some(title) = &input.title {
        next.title.clone_from(title);
    }
    if let Some(summary) = &input.summary {
        next.summary.clone_from(summary);
    }
    if let Some(body) = &input.body {
        next.body.clone_from(body);
    }
    next.modified_at = now_ms();

    let written =
        store.update_record_cas(&next, record.tick, session_id, input.related.as_deref())?;
    Ok(UpdateOutcome::Updated(written))
}

/// Apply a state transition.
pub fn transition<S: RecordStore + SessionStore>(
    store: &mut S,
    tenant: &str,
    session_id: &str,
    input: &TransitionInput,
) -> Result<Record> {
    require_field(&input.id, "id")?;
    require_field(session_id, "session_id")?;

    writable_session(store, tenant, session_id)?;

    if store.get_activation(session_id, &input.id)?.is_none() {
        return Err(Error::NotActivated {
            session_id: session_id.to_string(),
            id: input.id.clone(),
        });
    }

    let record = store
        .get_record(tenant, &input.id)?
        .ok_or_else(|| Error::RecordNotFound {
            id: input.id.clone(),
        })?;

    match transition_requirement(record.state, input.to_state)? {
        TransitionRequirement::Reason => {
            if input.reason.as_deref().is_none_or(|r| r.trim().is_empty()) {
                return Err(Error::MissingReason {
                    to: input.to_state.api_str().to_string(),
                });
            }
        }
        TransitionRequirement::ResolvedBy => {
            if input
                .resolved_by
                .as_deref()
                .is_none_or(|r| r.trim().is_empty())
            {
                return Err(Error::MissingResolvedBy);
            }
        }
        TransitionRequirement::None => {}
    }

    let mut next = record.clone();
    next.state = input.to_state;
    if input.to_state == RecordState::Resolved {
        next.resolved_by.clone_from(&input.resolved_by);
    }
    next.modified_at = now_ms();

    store.transition_record_cas(
        &next,
        record.tick,
        record.state,
        input.reason.as_deref(),
        session_id,
    )
}

/// Load a full record.
pub fn get<S: RecordStore>(store: &S, tenant: &str, id: &str) -> Result<Record> {
    store
        .get_record(tenant, id)?
        .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })
}

/// Load the light projection.
pub fn get_ref<S: RecordStore>(store: &S, tenant: &str, id: &str) -> Result<RecordRef> {
    store
        .get_record_ref(tenant, id)?
        .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })
}

/// List light projections under a filter.
pub fn list<S: RecordStore>(store: &S, tenant: &str, filter: &RecordFilter) -> Result<Vec<RecordRef>> {
    let mut filter = filter.clone();
    filter.limit = super::effective_limit(filter.limit);
    store.list_records(tenant, &filter)
}

/// Full-text search, tenant and project scoped.
pub fn search<S: SearchStore>(
    store: &S,
    tenant: &str,
    query: &str,
    filter: &SearchFilter,
) -> Result<Vec<SearchHit>> {
    require_field(query, "query")?;
    let mut filter = filter.clone();
    filter.limit = super::effective_limit(filter.limit);
    store.search_records(tenant, query, &filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{project, session};
    use crate::storage::SqliteStorage;

    fn setup() -> (SqliteStorage, crate::model::Project) {
        let mut store = SqliteStorage::open_memory().unwrap();
        let proj = project::create(&mut store, "t", "P", None, None).unwrap();
        (store, proj)
    }

    fn create_input(project_id: &str, title: &str) -> CreateRecordInput {
        CreateRecordInput {
            project_id: project_id.to_string(),
            record_type: "decision".to_string(),
            title: title.to_string(),
            summary: "summary".to_string(),
            body: "body".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_validates_required_fields() {
        let (mut store, proj) = setup();
        let mut input = create_input(&proj.id, "Title");
        input.body = String::new();

        let err = create(&mut store, "t", None, &input).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_create_defaults_to_open() {
        let (mut store, proj) = setup();
        let created = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();
        assert_eq!(created.record.state, RecordState::Open);
        assert_eq!(created.record.tick, 1);
        assert!(!created.auto_activated);
    }

    #[test]
    fn test_child_requires_activated_parent() {
        let (mut store, proj) = setup();
        let root = create(&mut store, "t", None, &create_input(&proj.id, "Root")).unwrap();

        // Parent exists but no session at all
        let mut child = create_input(&proj.id, "Child");
        child.parent_id = Some(root.record.id.clone());
        let err = create(&mut store, "t", None, &child).unwrap_err();
        assert!(matches!(err, Error::ParentNotActivated { .. }));

        // Session exists but never activated the parent
        let activated = session::activate(&mut store, "t", None, &root.record.id).unwrap();
        let other = create(&mut store, "t", None, &create_input(&proj.id, "Other")).unwrap();
        let mut child2 = create_input(&proj.id, "Child2");
        child2.parent_id = Some(other.record.id.clone());
        let err = create(&mut store, "t", Some(&activated.session_id), &child2).unwrap_err();
        assert!(matches!(err, Error::ParentNotActivated { .. }));

        // Activated parent works and auto-activates the child
        let mut child3 = create_input(&proj.id, "Child3");
        child3.parent_id = Some(root.record.id.clone());
        let created = create(&mut store, "t", Some(&activated.session_id), &child3).unwrap();
        assert!(created.auto_activated);
        assert_eq!(created.record.parent_id.as_deref(), Some(root.record.id.as_str()));
    }

    #[test]
    fn test_update_requires_activation() {
        let (mut store, proj) = setup();
        let a = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();
        let b = create(&mut store, "t", None, &create_input(&proj.id, "B")).unwrap();

        let act = session::activate(&mut store, "t", None, &a.record.id).unwrap();

        let input = UpdateRecordInput {
            id: b.record.id.clone(),
            title: Some("new".into()),
            ..Default::default()
        };
        let err = update(&mut store, "t", &act.session_id, &input).unwrap_err();
        assert!(matches!(err, Error::NotActivated { .. }));
    }

    #[test]
    fn test_update_conflict_then_force() {
        let (mut store, proj) = setup();
        let a = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();

        // Session 1 activates at tick 1
        let s1 = session::activate(&mut store, "t", None, &a.record.id).unwrap();
        // Session 2 activates and updates, advancing the record to tick 2
        let s2 = session::activate(&mut store, "t", None, &a.record.id).unwrap();
        let input2 = UpdateRecordInput {
            id: a.record.id.clone(),
            body: Some("rewritten".into()),
            ..Default::default()
        };
        assert!(matches!(
            update(&mut store, "t", &s2.session_id, &input2).unwrap(),
            UpdateOutcome::Updated(_)
        ));

        // Session 1's view is stale: conflict payload, record unchanged
        let input1 = UpdateRecordInput {
            id: a.record.id.clone(),
            title: Some("x".into()),
            ..Default::default()
        };
        match update(&mut store, "t", &s1.session_id, &input1).unwrap() {
            UpdateOutcome::Conflict { remote, .. } => {
                assert_eq!(remote.tick, 2);
                assert_eq!(remote.body, "rewritten");
            }
            UpdateOutcome::Updated(_) => panic!("expected conflict"),
        }
        assert_eq!(get(&store, "t", &a.record.id).unwrap().title, "A");

        // Force override wins and refreshes the activation edge
        let forced = UpdateRecordInput {
            force: true,
            ..input1
        };
        match update(&mut store, "t", &s1.session_id, &forced).unwrap() {
            UpdateOutcome::Updated(rec) => {
                assert_eq!(rec.title, "x");
                assert_eq!(rec.tick, 3);
                // Unset fields were not touched
                assert_eq!(rec.body, "rewritten");
            }
            UpdateOutcome::Conflict { .. } => panic!("force must override"),
        }

        // A follow-up update in the same session no longer conflicts
        let again = UpdateRecordInput {
            id: a.record.id.clone(),
            summary: Some("tightened".into()),
            ..Default::default()
        };
        assert!(matches!(
            update(&mut store, "t", &s1.session_id, &again).unwrap(),
            UpdateOutcome::Updated(_)
        ));
    }

    #[test]
    fn test_update_without_changes_bumps_tick() {
        let (mut store, proj) = setup();
        let a = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();
        let s = session::activate(&mut store, "t", None, &a.record.id).unwrap();

        let input = UpdateRecordInput {
            id: a.record.id.clone(),
            ..Default::default()
        };
        match update(&mut store, "t", &s.session_id, &input).unwrap() {
            UpdateOutcome::Updated(rec) => assert_eq!(rec.tick, 2),
            UpdateOutcome::Conflict { .. } => panic!("no-op update is legal"),
        }
    }

    #[test]
    fn test_transition_validation_and_success() {
        let (mut store, proj) = setup();
        let a = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();
        let s = session::activate(&mut store, "t", None, &a.record.id).unwrap();

        // RESOLVED without resolved_by
        let err = transition(
            &mut store,
            "t",
            &s.session_id,
            &TransitionInput {
                id: a.record.id.clone(),
                to_state: RecordState::Resolved,
                reason: None,
                resolved_by: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingResolvedBy));

        // With resolved_by it lands and is persisted
        let rec = transition(
            &mut store,
            "t",
            &s.session_id,
            &TransitionInput {
                id: a.record.id.clone(),
                to_state: RecordState::Resolved,
                reason: None,
                resolved_by: Some("R2".into()),
            },
        )
        .unwrap();
        assert_eq!(rec.state, RecordState::Resolved);
        assert_eq!(rec.resolved_by.as_deref(), Some("R2"));
        assert_eq!(rec.tick, 2);

        // RESOLVED -> LATER is denied by the table
        let err = transition(
            &mut store,
            "t",
            &s.session_id,
            &TransitionInput {
                id: a.record.id.clone(),
                to_state: RecordState::Later,
                reason: Some("park it".into()),
                resolved_by: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_transition_to_later_requires_reason() {
        let (mut store, proj) = setup();
        let a = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();
        let s = session::activate(&mut store, "t", None, &a.record.id).unwrap();

        let err = transition(
            &mut store,
            "t",
            &s.session_id,
            &TransitionInput {
                id: a.record.id.clone(),
                to_state: RecordState::Later,
                reason: Some("  ".into()),
                resolved_by: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingReason { .. }));
    }

    #[test]
    fn test_closed_session_rejects_writes() {
        let (mut store, proj) = setup();
        let a = create(&mut store, "t", None, &create_input(&proj.id, "A")).unwrap();
        let s = session::activate(&mut store, "t", None, &a.record.id).unwrap();
        session::close(&mut store, "t", &s.session_id).unwrap();

        let input = UpdateRecordInput {
            id: a.record.id.clone(),
            title: Some("x".into()),
            ..Default::default()
        };
        let err = update(&mut store, "t", &s.session_id, &input).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_search_requires_query() {
        let (store, _proj) = setup();
        let err = search(&store, "t", "  ", &SearchFilter::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
