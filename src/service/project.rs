//! Project service.
//!
//! Owns the default-project policy: the first project created for a
//! tenant is its default, and `get_default` lazily creates one so that
//! agents can issue write tools without first managing projects.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Project, ProjectSummary, RecordRef, Session};
use crate::storage::{ProjectStore, RecordFilter, RecordStore, SessionStore};

/// Name given to the lazily-created default project.
pub const DEFAULT_PROJECT_NAME: &str = "Default Project";

/// Create a project. A supplied id is honored; a blank name is rejected.
pub fn create<S: ProjectStore>(
    store: &mut S,
    tenant: &str,
    name: &str,
    description: Option<&str>,
    id: Option<&str>,
) -> Result<Project> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("project name must not be blank".into()));
    }

    let project = Project::new(tenant, name.trim(), description, id);
    store.insert_project(&project)?;
    tracing::info!(project_id = %project.id, "project created");
    Ok(project)
}

/// Load a project by id.
pub fn get<S: ProjectStore>(store: &S, tenant: &str, id: &str) -> Result<Project> {
    store
        .get_project(tenant, id)?
        .ok_or_else(|| Error::ProjectNotFound { id: id.to_string() })
}

/// The tenant's default project: the earliest-created one, lazily
/// created when the tenant has none.
pub fn get_default<S: ProjectStore>(store: &mut S, tenant: &str) -> Result<Project> {
    if let Some(project) = store.earliest_project(tenant)? {
        return Ok(project);
    }
    create(store, tenant, DEFAULT_PROJECT_NAME, None, None)
}

/// Resolve an optional project id: explicit id, or the default project.
pub fn resolve<S: ProjectStore>(store: &mut S, tenant: &str, id: Option<&str>) -> Result<Project> {
    match id {
        Some(id) if !id.is_empty() => get(store, tenant, id),
        _ => get_default(store, tenant),
    }
}

/// List all projects for a tenant, with counts.
pub fn list<S: ProjectStore>(store: &S, tenant: &str) -> Result<Vec<ProjectSummary>> {
    store.list_projects(tenant)
}

/// One open session row in a project overview.
#[derive(Debug, Clone, Serialize)]
pub struct OpenSession {
    pub id: String,
    pub focus_record: Option<String>,
    pub last_activity: i64,
    pub last_sync_tick: i64,
    pub tick_gap: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// The project overview returned by `get_project_overview`.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOverview {
    pub project: Project,
    pub open_sessions: Vec<OpenSession>,
    pub root_records: Vec<RecordRef>,
}

fn open_session_info(session: &Session, project_tick: i64) -> OpenSession {
    let tick_gap = project_tick - session.last_sync_tick;
    OpenSession {
        id: session.id.clone(),
        focus_record: session.focus_record.clone(),
        last_activity: session.last_activity,
        last_sync_tick: session.last_sync_tick,
        tick_gap,
        warning: (tick_gap > 0).then(|| {
            format!("session is {tick_gap} tick(s) behind; sync_session before writing")
        }),
    }
}

/// Assemble the project overview: the project itself, its active
/// sessions with tick gaps, and the root records of its tree.
pub fn overview<S: ProjectStore + RecordStore + SessionStore>(
    store: &mut S,
    tenant: &str,
    project_id: Option<&str>,
) -> Result<ProjectOverview> {
    let project = resolve(store, tenant, project_id)?;

    let open_sessions = store
        .list_active_sessions(tenant, &project.id)?
        .iter()
        .map(|s| open_session_info(s, project.tick))
        .collect();

    let root_records = store.list_records(
        tenant,
        &RecordFilter {
            project_id: project.id.clone(),
            parent: Some(None),
            limit: super::DEFAULT_LIMIT,
            ..Default::default()
        },
    )?;

    Ok(ProjectOverview {
        project,
        open_sessions,
        root_records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    #[test]
    fn test_create_rejects_blank_name() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let err = create(&mut store, "t", "   ", None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_get_default_is_lazy_and_stable() {
        let mut store = SqliteStorage::open_memory().unwrap();

        let first = get_default(&mut store, "t").unwrap();
        assert_eq!(first.name, DEFAULT_PROJECT_NAME);
        assert_eq!(first.tick, 0);

        let second = get_default(&mut store, "t").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(list(&store, "t").unwrap().len(), 1);
    }

    #[test]
    fn test_default_is_earliest_created() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let a = create(&mut store, "t", "First", None, Some("proj_a")).unwrap();
        create(&mut store, "t", "Second", None, Some("proj_b")).unwrap();

        assert_eq!(get_default(&mut store, "t").unwrap().id, a.id);
    }

    #[test]
    fn test_defaults_are_per_tenant() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let a = get_default(&mut store, "tenant-a").unwrap();
        let b = get_default(&mut store, "tenant-b").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.tenant_id, "tenant-a");
        assert_eq!(b.tenant_id, "tenant-b");
    }

    #[test]
    fn test_overview_reports_tick_gap() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let project = create(&mut store, "t", "P", None, None).unwrap();

        // A session observed tick 0, then two records land
        let record = crate::model::Record::new(
            "t", &project.id, "note", "A", "S", "B",
            crate::model::RecordState::Open, None,
        );
        let rec = crate::storage::RecordStore::create_record(&mut store, &record, &[], None).unwrap();
        let session = Session::new("t", &project.id, None, None, 0);
        crate::storage::SessionStore::persist_activation(&mut store, &session, &rec.id, 0, true)
            .unwrap();

        let record2 = crate::model::Record::new(
            "t", &project.id, "note", "B", "S", "B",
            crate::model::RecordState::Open, None,
        );
        crate::storage::RecordStore::create_record(&mut store, &record2, &[], None).unwrap();

        let view = overview(&mut store, "t", Some(&project.id)).unwrap();
        assert_eq!(view.project.tick, 2);
        assert_eq!(view.open_sessions.len(), 1);
        assert_eq!(view.open_sessions[0].tick_gap, 2);
        assert!(view.open_sessions[0].warning.is_some());
        assert_eq!(view.root_records.len(), 2);
    }
}
