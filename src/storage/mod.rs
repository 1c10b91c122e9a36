//! Storage layer for Arbor.
//!
//! The SQLite backend lives in [`sqlite`]; [`schema`] holds the DDL and
//! FTS index definition; [`search`] the full-text query building.
//!
//! Each domain service depends on a narrow capability trait defined
//! here rather than on the concrete backend. Composite mutations (tick
//! increment + conditional write + activation refresh + activity
//! append) are single trait methods so one call is one transaction:
//! a cancelled request either committed everything or nothing.

pub mod schema;
pub mod search;
pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::Result;
use crate::model::{
    Activation, ActivityEntry, ActivityKind, Project, ProjectSummary, Record, RecordRef,
    RecordState, SearchHit, Session,
};

/// Filters for [`RecordStore::list_records`].
///
/// `parent`: `None` = no parent filter, `Some(None)` = roots only,
/// `Some(Some(id))` = children of `id`.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub project_id: String,
    pub parent: Option<Option<String>>,
    pub states: Vec<RecordState>,
    pub types: Vec<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Filters for [`ActivityStore::list_activity`].
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub project_id: Option<String>,
    pub record_id: Option<String>,
    pub session_id: Option<String>,
    pub kind: Option<ActivityKind>,
    pub limit: u32,
    pub offset: u32,
}

/// Filters for [`SearchStore::search_records`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub project_id: String,
    pub states: Vec<RecordState>,
    pub types: Vec<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Metadata row for a provisioned api key (never the key itself).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiKeyInfo {
    pub tenant_id: String,
    pub label: Option<String>,
    pub created_at: i64,
}

/// Store capabilities required by the project service.
pub trait ProjectStore {
    /// Insert a new project row.
    fn insert_project(&mut self, project: &Project) -> Result<()>;

    /// Load a project by id within a tenant.
    fn get_project(&self, tenant: &str, id: &str) -> Result<Option<Project>>;

    /// The earliest-created project for a tenant (the default project).
    fn earliest_project(&self, tenant: &str) -> Result<Option<Project>>;

    /// All projects for a tenant with record/session counts.
    fn list_projects(&self, tenant: &str) -> Result<Vec<ProjectSummary>>;
}

/// Store capabilities required by the record service.
pub trait RecordStore {
    /// Atomically: increment the project tick, insert the record at the
    /// new tick, write its relation edges, optionally record an
    /// activation edge for the creating session, and append the
    /// `record_created` activity entry. Returns the record as written.
    fn create_record(
        &mut self,
        record: &Record,
        related: &[String],
        session_id: Option<&str>,
    ) -> Result<Record>;

    /// Load a full record (including relations) by id within a tenant.
    fn get_record(&self, tenant: &str, id: &str) -> Result<Option<Record>>;

    /// Load the light projection with child counts.
    fn get_record_ref(&self, tenant: &str, id: &str) -> Result<Option<RecordRef>>;

    /// List light projections matching the filter, `created_at` DESC.
    fn list_records(&self, tenant: &str, filter: &RecordFilter) -> Result<Vec<RecordRef>>;

    /// Full child records of a parent, `created_at` ASC.
    fn children_of(&self, tenant: &str, parent_id: &str) -> Result<Vec<Record>>;

    /// Atomically: increment the project tick and write the already
    /// overlaid record conditional on its previous tick; replace the
    /// relation set when provided; refresh the writing session's
    /// activation edge to the new tick; append `record_updated`.
    ///
    /// # Errors
    ///
    /// `CONFLICT` if the conditional write matched zero rows while the
    /// record still exists; `RECORD_NOT_FOUND` if it is gone.
    fn update_record_cas(
        &mut self,
        record: &Record,
        old_tick: i64,
        session_id: &str,
        related: Option<&[String]>,
    ) -> Result<Record>;

    /// Atomically: apply a validated state transition under the same
    /// tick + conditional-write protocol as an update, appending a
    /// `state_transition` activity entry.
    fn transition_record_cas(
        &mut self,
        record: &Record,
        old_tick: i64,
        from: RecordState,
        reason: Option<&str>,
        session_id: &str,
    ) -> Result<Record>;

    /// Delete a record. Relation and activation edges cascade; children
    /// are promoted to roots.
    fn delete_record(&mut self, tenant: &str, id: &str) -> Result<()>;
}

/// Store capabilities required by the session service.
pub trait SessionStore {
    /// Atomically: insert or refresh the session row, upsert the
    /// activation edge at the given tick, and append the activity
    /// entries (`session_started` when new, `record_activated` always).
    fn persist_activation(
        &mut self,
        session: &Session,
        record_id: &str,
        tick: i64,
        is_new_session: bool,
    ) -> Result<()>;

    /// Insert a session row with no activation (transport-minted ids
    /// used by write tools before any activate call).
    fn create_session(&mut self, session: &Session) -> Result<()>;

    /// Load a session by id within a tenant.
    fn get_session(&self, tenant: &str, id: &str) -> Result<Option<Session>>;

    /// Write the mutable session fields (status, focus, sync tick,
    /// activity timestamps), logging an activity entry in the same
    /// transaction when provided.
    fn save_session_state(&mut self, session: &Session, entry: Option<ActivityEntry>)
        -> Result<()>;

    /// Atomically: insert the branched session, seed its focus
    /// activation when given, and mark the source session stale.
    fn branch_session(
        &mut self,
        source: &Session,
        branch: &Session,
        focus_record: Option<&str>,
        tick: i64,
    ) -> Result<()>;

    /// Load one activation edge.
    fn get_activation(&self, session_id: &str, record_id: &str) -> Result<Option<Activation>>;

    /// Sessions in `{active, stale}` holding an activation for a record.
    fn sessions_for_record(&self, tenant: &str, record_id: &str) -> Result<Vec<Session>>;

    /// Sessions with status `active` in a project.
    fn list_active_sessions(&self, tenant: &str, project_id: &str) -> Result<Vec<Session>>;
}

/// Store capabilities required by the activity service.
pub trait ActivityStore {
    /// Append one entry; returns the store-assigned id.
    fn log_activity(&mut self, entry: &ActivityEntry) -> Result<i64>;

    /// List entries matching the filter, `created_at` DESC.
    fn list_activity(&self, tenant: &str, filter: &ActivityFilter) -> Result<Vec<ActivityEntry>>;
}

/// Store capabilities required by the search adapter.
pub trait SearchStore {
    /// Full-text query over record title/summary/body, tenant and
    /// project scoped, ordered by relevance then `created_at` DESC.
    fn search_records(
        &self,
        tenant: &str,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;
}

/// Store capabilities required by the auth boundary.
pub trait ApiKeyStore {
    /// Resolve a SHA-256 hex digest to its tenant.
    fn tenant_for_key_hash(&self, key_hash: &str) -> Result<Option<String>>;

    /// Provision a key digest for a tenant.
    fn insert_api_key(&mut self, key_hash: &str, tenant: &str, label: Option<&str>) -> Result<()>;

    /// List provisioned keys (metadata only).
    fn list_api_keys(&self) -> Result<Vec<ApiKeyInfo>>;
}
