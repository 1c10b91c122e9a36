//! The SQLite backend behind every store trait.
//!
//! Transaction discipline is the point of this module: each domain
//! mutation runs inside one IMMEDIATE transaction via [`SqliteStorage::mutate`],
//! activity entries queued during the mutation are written before
//! commit, and an error anywhere rolls the whole operation back,
//! including the tick increment, so failed mutations never consume
//! ticks.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::error::{Error, Result};
use crate::model::{
    Activation, ActivityEntry, ActivityKind, Project, ProjectSummary, Record, RecordRef,
    RecordState, SearchHit, Session, SessionStatus, now_ms,
};
use crate::storage::schema::apply_schema;
use crate::storage::{
    ActivityFilter, ActivityStore, ApiKeyInfo, ApiKeyStore, ProjectStore, RecordFilter,
    RecordStore, SearchFilter, SearchStore, SessionStore,
};

/// The concrete store: one SQLite connection implementing every
/// per-service store trait.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Side-effect collector handed to mutation closures.
///
/// Activity entries queued here are written inside the same
/// transaction as the mutation itself, just before commit.
pub struct MutationContext {
    /// The operation being performed, for trace output.
    pub op_name: String,
    /// Activity entries to append at commit time.
    pub entries: Vec<ActivityEntry>,
}

impl MutationContext {
    fn new(op_name: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Queue an activity entry for this operation.
    pub fn record(&mut self, entry: ActivityEntry) {
        self.entries.push(entry);
    }
}

/// How long a writer waits on a locked database before giving up.
/// Every mutation is a short transaction, so contention clears fast;
/// failing early here would turn routine lock handoffs into errors.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl SqliteStorage {
    /// Open the store at `path`, creating the file and schema on first
    /// use, with the default busy timeout.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open the store at `path` with an explicit busy timeout.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// A throwaway in-memory store; the test suites run against this.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Borrow the raw connection. Reads go straight through it; every
    /// write belongs inside [`Self::mutate`].
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run one domain mutation as one IMMEDIATE transaction.
    ///
    /// The closure performs the writes and may queue activity entries
    /// on the [`MutationContext`]; those land in `activity_log` right
    /// before the commit, so an entry can never describe a write that
    /// was rolled back. An error from any step aborts the whole
    /// transaction, tick increment included.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op);
        let result = f(&tx, &mut ctx)?;

        for entry in &ctx.entries {
            insert_activity(&tx, entry)?;
        }

        tx.commit()?;
        tracing::debug!(op = %ctx.op_name, "mutation committed");

        Ok(result)
    }
}

// ==================
// Transaction helpers
// ==================

/// Atomically advance a project's tick and return the new value.
///
/// This is the single authoritative mutator of `projects.tick`; it runs
/// inside the caller's transaction so the new tick is reserved before
/// any concurrent mutation can claim it.
fn increment_tick(tx: &Transaction, tenant: &str, project_id: &str) -> Result<i64> {
    tx.query_row(
        "UPDATE projects SET tick = tick + 1 WHERE id = ?1 AND tenant_id = ?2 RETURNING tick",
        rusqlite::params![project_id, tenant],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::ProjectNotFound {
        id: project_id.to_string(),
    })
}

/// Insert an activity entry (append-only; store assigns the id).
fn insert_activity(tx: &Connection, entry: &ActivityEntry) -> Result<i64> {
    tx.execute(
        "INSERT INTO activity_log (tenant_id, project_id, session_id, record_id, activity_type, summary, details, created_at, tick)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            entry.tenant_id,
            entry.project_id,
            entry.session_id,
            entry.record_id,
            entry.kind.as_str(),
            entry.summary,
            entry.details,
            entry.created_at,
            entry.tick,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Upsert an activation edge; reactivation refreshes tick and timestamp.
fn upsert_activation(tx: &Transaction, session_id: &str, record_id: &str, tick: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO session_activations (session_id, record_id, activation_tick, activated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, record_id) DO UPDATE SET
           activation_tick = excluded.activation_tick,
           activated_at = excluded.activated_at",
        rusqlite::params![session_id, record_id, tick, now_ms()],
    )?;
    Ok(())
}

/// Deduplicate a relation list, preserving first-seen order.
fn dedup_related(related: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    related
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Replace the outgoing relation set of a record.
///
/// Every referent must exist in the same tenant and project at
/// insertion time; a missing referent aborts the transaction.
fn replace_relations(
    tx: &Transaction,
    tenant: &str,
    project_id: &str,
    from_id: &str,
    related: &[String],
) -> Result<()> {
    tx.execute(
        "DELETE FROM record_relations WHERE from_record_id = ?1",
        [from_id],
    )?;

    let mut check = tx.prepare(
        "SELECT 1 FROM records WHERE id = ?1 AND tenant_id = ?2 AND project_id = ?3",
    )?;
    let mut insert = tx.prepare(
        "INSERT OR IGNORE INTO record_relations (from_record_id, to_record_id) VALUES (?1, ?2)",
    )?;

    for to_id in related {
        if !check.exists(rusqlite::params![to_id, tenant, project_id])? {
            return Err(Error::RecordNotFound {
                id: to_id.to_string(),
            });
        }
        insert.execute(rusqlite::params![from_id, to_id])?;
    }
    Ok(())
}

fn insert_session_row(tx: &Transaction, session: &Session) -> Result<()> {
    tx.execute(
        "INSERT INTO sessions (id, tenant_id, project_id, status, focus_record, parent_session, last_sync_tick, created_at, last_activity, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            session.id,
            session.tenant_id,
            session.project_id,
            session.status.as_str(),
            session.focus_record,
            session.parent_session,
            session.last_sync_tick,
            session.created_at,
            session.last_activity,
            session.closed_at,
        ],
    )?;
    Ok(())
}

// ==================
// Row mappers
// ==================

const RECORD_COLS: &str =
    "id, tenant_id, project_id, record_type, title, summary, body, state, parent_id, resolved_by, created_at, modified_at, tick";

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let state: String = row.get(7)?;
    Ok(Record {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        record_type: row.get(3)?,
        title: row.get(4)?,
        summary: row.get(5)?,
        body: row.get(6)?,
        state: RecordState::parse(&state).unwrap_or_default(),
        parent_id: row.get(8)?,
        resolved_by: row.get(9)?,
        created_at: row.get(10)?,
        modified_at: row.get(11)?,
        tick: row.get(12)?,
        related: Vec::new(),
    })
}

/// SELECT list for the light projection, including child-count
/// subqueries (children always share the parent's tenant).
const REF_SELECT: &str = "SELECT r.id, r.project_id, r.record_type, r.title, r.summary, r.state, r.parent_id, r.created_at, r.modified_at, r.tick,
       (SELECT COUNT(*) FROM records c WHERE c.parent_id = r.id) AS children_count,
       (SELECT COUNT(*) FROM records c WHERE c.parent_id = r.id AND c.state = 'open') AS open_children_count
  FROM records r";

fn record_ref_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecordRef> {
    let state: String = row.get(5)?;
    Ok(RecordRef {
        id: row.get(0)?,
        project_id: row.get(1)?,
        record_type: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        state: RecordState::parse(&state).unwrap_or_default(),
        parent_id: row.get(6)?,
        created_at: row.get(7)?,
        modified_at: row.get(8)?,
        tick: row.get(9)?,
        children_count: row.get(10)?,
        open_children_count: row.get(11)?,
    })
}

fn project_from_row(row: &rusqlite::Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        tick: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn session_from_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let status: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Active),
        focus_record: row.get(4)?,
        parent_session: row.get(5)?,
        last_sync_tick: row.get(6)?,
        created_at: row.get(7)?,
        last_activity: row.get(8)?,
        closed_at: row.get(9)?,
    })
}

const SESSION_COLS: &str =
    "id, tenant_id, project_id, status, focus_record, parent_session, last_sync_tick, created_at, last_activity, closed_at";

// ==================
// Project operations
// ==================

impl ProjectStore for SqliteStorage {
    fn insert_project(&mut self, project: &Project) -> Result<()> {
        let project = project.clone();
        self.mutate("create_project", |tx, _ctx| {
            tx.execute(
                "INSERT INTO projects (id, tenant_id, name, description, tick, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    project.id,
                    project.tenant_id,
                    project.name,
                    project.description,
                    project.tick,
                    project.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_project(&self, tenant: &str, id: &str) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, tenant_id, name, description, tick, created_at
                 FROM projects WHERE id = ?1 AND tenant_id = ?2",
                rusqlite::params![id, tenant],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    fn earliest_project(&self, tenant: &str) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, tenant_id, name, description, tick, created_at
                 FROM projects WHERE tenant_id = ?1
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [tenant],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    fn list_projects(&self, tenant: &str) -> Result<Vec<ProjectSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.description, p.tick, p.created_at,
                    (SELECT COUNT(*) FROM records r WHERE r.project_id = p.id) AS record_count,
                    (SELECT COUNT(*) FROM records r WHERE r.project_id = p.id AND r.state = 'open') AS open_records,
                    (SELECT COUNT(*) FROM sessions s WHERE s.project_id = p.id AND s.status = 'active') AS active_sessions
             FROM projects p
             WHERE p.tenant_id = ?1
             ORDER BY p.created_at ASC",
        )?;

        let rows = stmt.query_map([tenant], |row| {
            Ok(ProjectSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                tick: row.get(3)?,
                created_at: row.get(4)?,
                record_count: row.get(5)?,
                open_records: row.get(6)?,
                active_sessions: row.get(7)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

// ==================
// Record operations
// ==================

impl SqliteStorage {
    fn load_related(&self, record_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT to_record_id FROM record_relations WHERE from_record_id = ?1 ORDER BY to_record_id",
        )?;
        let ids = stmt
            .query_map([record_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn record_exists(tx: &Transaction, tenant: &str, id: &str) -> Result<bool> {
        let exists = tx
            .prepare("SELECT 1 FROM records WHERE id = ?1 AND tenant_id = ?2")?
            .exists(rusqlite::params![id, tenant])?;
        Ok(exists)
    }
}

impl RecordStore for SqliteStorage {
    fn create_record(
        &mut self,
        record: &Record,
        related: &[String],
        session_id: Option<&str>,
    ) -> Result<Record> {
        let mut rec = record.clone();
        let related = dedup_related(related);

        self.mutate("create_record", |tx, ctx| {
            let tick = increment_tick(tx, &rec.tenant_id, &rec.project_id)?;
            rec.tick = tick;

            tx.execute(
                &format!("INSERT INTO records ({RECORD_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
                rusqlite::params![
                    rec.id,
                    rec.tenant_id,
                    rec.project_id,
                    rec.record_type,
                    rec.title,
                    rec.summary,
                    rec.body,
                    rec.state.as_str(),
                    rec.parent_id,
                    rec.resolved_by,
                    rec.created_at,
                    rec.modified_at,
                    tick,
                ],
            )?;

            replace_relations(tx, &rec.tenant_id, &rec.project_id, &rec.id, &related)?;

            // A created record is implicitly activated in its creating session
            if let Some(sid) = session_id {
                upsert_activation(tx, sid, &rec.id, tick)?;
            }

            let mut entry = ActivityEntry::new(
                &rec.tenant_id,
                &rec.project_id,
                ActivityKind::RecordCreated,
                &format!("created {} \"{}\"", rec.record_type, rec.title),
            )
            .with_record(&rec.id)
            .at_tick(tick);
            if let Some(sid) = session_id {
                entry = entry.with_session(sid);
            }
            ctx.record(entry);

            Ok(())
        })?;

        rec.related = related;
        Ok(rec)
    }

    fn get_record(&self, tenant: &str, id: &str) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLS} FROM records WHERE id = ?1 AND tenant_id = ?2"),
                rusqlite::params![id, tenant],
                record_from_row,
            )
            .optional()?;

        match record {
            Some(mut rec) => {
                rec.related = self.load_related(&rec.id)?;
                Ok(Some(rec))
            }
            None => Ok(None),
        }
    }

    fn get_record_ref(&self, tenant: &str, id: &str) -> Result<Option<RecordRef>> {
        let rec = self
            .conn
            .query_row(
                &format!("{REF_SELECT} WHERE r.id = ?1 AND r.tenant_id = ?2"),
                rusqlite::params![id, tenant],
                record_ref_from_row,
            )
            .optional()?;
        Ok(rec)
    }

    fn list_records(&self, tenant: &str, filter: &RecordFilter) -> Result<Vec<RecordRef>> {
        let mut sql = format!("{REF_SELECT} WHERE r.tenant_id = ? AND r.project_id = ?");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(tenant.to_string()),
            Box::new(filter.project_id.clone()),
        ];

        match &filter.parent {
            Some(Some(parent_id)) => {
                sql.push_str(" AND r.parent_id = ?");
                params.push(Box::new(parent_id.clone()));
            }
            Some(None) => sql.push_str(" AND r.parent_id IS NULL"),
            None => {}
        }

        if !filter.states.is_empty() {
            let placeholders = vec!["?"; filter.states.len()].join(", ");
            sql.push_str(&format!(" AND r.state IN ({placeholders})"));
            for state in &filter.states {
                params.push(Box::new(state.as_str().to_string()));
            }
        }

        if !filter.types.is_empty() {
            let placeholders = vec!["?"; filter.types.len()].join(", ");
            sql.push_str(&format!(" AND r.record_type IN ({placeholders})"));
            for t in &filter.types {
                params.push(Box::new(t.clone()));
            }
        }

        sql.push_str(" ORDER BY r.created_at DESC LIMIT ? OFFSET ?");
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(std::convert::AsRef::as_ref).collect();

        let rows = stmt.query_map(params_refs.as_slice(), record_ref_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn children_of(&self, tenant: &str, parent_id: &str) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLS} FROM records
             WHERE parent_id = ?1 AND tenant_id = ?2
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(rusqlite::params![parent_id, tenant], record_from_row)?;
        let mut records = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        for rec in &mut records {
            rec.related = self.load_related(&rec.id)?;
        }
        Ok(records)
    }

    fn update_record_cas(
        &mut self,
        record: &Record,
        old_tick: i64,
        session_id: &str,
        related: Option<&[String]>,
    ) -> Result<Record> {
        let mut rec = record.clone();
        let related = related.map(dedup_related);

        self.mutate("update_record", |tx, ctx| {
            let tick = increment_tick(tx, &rec.tenant_id, &rec.project_id)?;
            rec.tick = tick;

            // Conditional write keyed on the previous tick: a racing
            // writer that committed after our read makes this a no-op.
            let rows = tx.execute(
                "UPDATE records
                 SET title = ?1, summary = ?2, body = ?3, modified_at = ?4, tick = ?5
                 WHERE id = ?6 AND tenant_id = ?7 AND tick = ?8",
                rusqlite::params![
                    rec.title,
                    rec.summary,
                    rec.body,
                    rec.modified_at,
                    tick,
                    rec.id,
                    rec.tenant_id,
                    old_tick,
                ],
            )?;

            if rows == 0 {
                return Err(if Self::record_exists(tx, &rec.tenant_id, &rec.id)? {
                    Error::Conflict { id: rec.id.clone() }
                } else {
                    Error::RecordNotFound { id: rec.id.clone() }
                });
            }

            if let Some(rel) = &related {
                replace_relations(tx, &rec.tenant_id, &rec.project_id, &rec.id, rel)?;
            }

            // Refresh the writer's activation edge so its next update
            // does not conflict with this write.
            upsert_activation(tx, session_id, &rec.id, tick)?;

            ctx.record(
                ActivityEntry::new(
                    &rec.tenant_id,
                    &rec.project_id,
                    ActivityKind::RecordUpdated,
                    &format!("updated \"{}\"", rec.title),
                )
                .with_record(&rec.id)
                .with_session(session_id)
                .at_tick(tick),
            );

            Ok(())
        })?;

        if let Some(rel) = related {
            rec.related = rel;
        }
        Ok(rec)
    }

    fn transition_record_cas(
        &mut self,
        record: &Record,
        old_tick: i64,
        from: RecordState,
        reason: Option<&str>,
        session_id: &str,
    ) -> Result<Record> {
        let mut rec = record.clone();

        self.mutate("transition_record", |tx, ctx| {
            let tick = increment_tick(tx, &rec.tenant_id, &rec.project_id)?;
            rec.tick = tick;

            let rows = tx.execute(
                "UPDATE records
                 SET state = ?1, resolved_by = ?2, modified_at = ?3, tick = ?4
                 WHERE id = ?5 AND tenant_id = ?6 AND tick = ?7",
                rusqlite::params![
                    rec.state.as_str(),
                    rec.resolved_by,
                    rec.modified_at,
                    tick,
                    rec.id,
                    rec.tenant_id,
                    old_tick,
                ],
            )?;

            if rows == 0 {
                return Err(if Self::record_exists(tx, &rec.tenant_id, &rec.id)? {
                    Error::Conflict { id: rec.id.clone() }
                } else {
                    Error::RecordNotFound { id: rec.id.clone() }
                });
            }

            upsert_activation(tx, session_id, &rec.id, tick)?;

            let details = serde_json::json!({
                "from": from.api_str(),
                "to": rec.state.api_str(),
                "reason": reason,
                "resolved_by": rec.resolved_by,
            });
            ctx.record(
                ActivityEntry::new(
                    &rec.tenant_id,
                    &rec.project_id,
                    ActivityKind::StateTransition,
                    &format!("{} -> {}", from.api_str(), rec.state.api_str()),
                )
                .with_record(&rec.id)
                .with_session(session_id)
                .with_details(&details.to_string())
                .at_tick(tick),
            );

            Ok(())
        })?;

        Ok(rec)
    }

    fn delete_record(&mut self, tenant: &str, id: &str) -> Result<()> {
        let tenant = tenant.to_string();
        let id = id.to_string();

        self.mutate("delete_record", |tx, _ctx| {
            if !Self::record_exists(tx, &tenant, &id)? {
                return Err(Error::RecordNotFound { id: id.clone() });
            }

            // Children are promoted to roots; relation and activation
            // edges cascade via foreign keys.
            tx.execute(
                "UPDATE records SET parent_id = NULL WHERE parent_id = ?1 AND tenant_id = ?2",
                rusqlite::params![id, tenant],
            )?;
            tx.execute(
                "DELETE FROM records WHERE id = ?1 AND tenant_id = ?2",
                rusqlite::params![id, tenant],
            )?;
            Ok(())
        })
    }
}

// ==================
// Session operations
// ==================

impl SessionStore for SqliteStorage {
    fn persist_activation(
        &mut self,
        session: &Session,
        record_id: &str,
        tick: i64,
        is_new_session: bool,
    ) -> Result<()> {
        let session = session.clone();
        let record_id = record_id.to_string();

        self.mutate("activate", |tx, ctx| {
            if is_new_session {
                insert_session_row(tx, &session)?;
            } else {
                tx.execute(
                    "UPDATE sessions
                     SET status = ?1, focus_record = ?2, last_sync_tick = ?3, last_activity = ?4
                     WHERE id = ?5 AND tenant_id = ?6",
                    rusqlite::params![
                        session.status.as_str(),
                        session.focus_record,
                        session.last_sync_tick,
                        session.last_activity,
                        session.id,
                        session.tenant_id,
                    ],
                )?;
            }

            upsert_activation(tx, &session.id, &record_id, tick)?;

            if is_new_session {
                ctx.record(
                    ActivityEntry::new(
                        &session.tenant_id,
                        &session.project_id,
                        ActivityKind::SessionStarted,
                        "session started",
                    )
                    .with_session(&session.id)
                    .at_tick(tick),
                );
            }
            ctx.record(
                ActivityEntry::new(
                    &session.tenant_id,
                    &session.project_id,
                    ActivityKind::RecordActivated,
                    "record activated",
                )
                .with_session(&session.id)
                .with_record(&record_id)
                .at_tick(tick),
            );

            Ok(())
        })
    }

    fn create_session(&mut self, session: &Session) -> Result<()> {
        let session = session.clone();
        self.mutate("create_session", |tx, ctx| {
            insert_session_row(tx, &session)?;
            ctx.record(
                ActivityEntry::new(
                    &session.tenant_id,
                    &session.project_id,
                    ActivityKind::SessionStarted,
                    "session started",
                )
                .with_session(&session.id)
                .at_tick(session.last_sync_tick),
            );
            Ok(())
        })
    }

    fn get_session(&self, tenant: &str, id: &str) -> Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1 AND tenant_id = ?2"),
                rusqlite::params![id, tenant],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn save_session_state(
        &mut self,
        session: &Session,
        entry: Option<ActivityEntry>,
    ) -> Result<()> {
        let session = session.clone();

        self.mutate("save_session_state", |tx, ctx| {
            let rows = tx.execute(
                "UPDATE sessions
                 SET status = ?1, focus_record = ?2, last_sync_tick = ?3, last_activity = ?4, closed_at = ?5
                 WHERE id = ?6 AND tenant_id = ?7",
                rusqlite::params![
                    session.status.as_str(),
                    session.focus_record,
                    session.last_sync_tick,
                    session.last_activity,
                    session.closed_at,
                    session.id,
                    session.tenant_id,
                ],
            )?;

            if rows == 0 {
                return Err(Error::SessionNotFound {
                    id: session.id.clone(),
                });
            }

            if let Some(entry) = entry {
                ctx.record(entry);
            }
            Ok(())
        })
    }

    fn branch_session(
        &mut self,
        source: &Session,
        branch: &Session,
        focus_record: Option<&str>,
        tick: i64,
    ) -> Result<()> {
        let source = source.clone();
        let branch = branch.clone();
        let focus_record = focus_record.map(ToString::to_string);

        self.mutate("branch_session", |tx, ctx| {
            insert_session_row(tx, &branch)?;

            // Branches start lean: only the focus record is activated.
            if let Some(focus) = &focus_record {
                upsert_activation(tx, &branch.id, focus, tick)?;
            }

            // The branched-from session is superseded.
            tx.execute(
                "UPDATE sessions SET status = 'stale' WHERE id = ?1 AND tenant_id = ?2 AND status = 'active'",
                rusqlite::params![source.id, source.tenant_id],
            )?;

            ctx.record(
                ActivityEntry::new(
                    &branch.tenant_id,
                    &branch.project_id,
                    ActivityKind::SessionBranched,
                    &format!("branched from session {}", source.id),
                )
                .with_session(&branch.id)
                .at_tick(tick),
            );

            Ok(())
        })
    }

    fn get_activation(&self, session_id: &str, record_id: &str) -> Result<Option<Activation>> {
        let edge = self
            .conn
            .query_row(
                "SELECT session_id, record_id, activation_tick, activated_at
                 FROM session_activations WHERE session_id = ?1 AND record_id = ?2",
                rusqlite::params![session_id, record_id],
                |row| {
                    Ok(Activation {
                        session_id: row.get(0)?,
                        record_id: row.get(1)?,
                        activation_tick: row.get(2)?,
                        activated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(edge)
    }

    fn sessions_for_record(&self, tenant: &str, record_id: &str) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLS} FROM sessions s
             JOIN session_activations sa ON sa.session_id = s.id
             WHERE sa.record_id = ?1 AND s.tenant_id = ?2 AND s.status IN ('active', 'stale')
             ORDER BY s.last_activity DESC"
        ))?;

        let rows = stmt.query_map(rusqlite::params![record_id, tenant], session_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_active_sessions(&self, tenant: &str, project_id: &str) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLS} FROM sessions
             WHERE tenant_id = ?1 AND project_id = ?2 AND status = 'active'
             ORDER BY last_activity DESC"
        ))?;

        let rows = stmt.query_map(rusqlite::params![tenant, project_id], session_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

// ==================
// Activity operations
// ==================

impl ActivityStore for SqliteStorage {
    fn log_activity(&mut self, entry: &ActivityEntry) -> Result<i64> {
        let entry = entry.clone();
        self.mutate("log_activity", |tx, _ctx| insert_activity(tx, &entry))
    }

    fn list_activity(&self, tenant: &str, filter: &ActivityFilter) -> Result<Vec<ActivityEntry>> {
        let mut sql = String::from(
            "SELECT id, tenant_id, project_id, session_id, record_id, activity_type, summary, details, created_at, tick
             FROM activity_log WHERE tenant_id = ?",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant.to_string())];

        if let Some(project_id) = &filter.project_id {
            sql.push_str(" AND project_id = ?");
            params.push(Box::new(project_id.clone()));
        }
        if let Some(record_id) = &filter.record_id {
            sql.push_str(" AND record_id = ?");
            params.push(Box::new(record_id.clone()));
        }
        if let Some(session_id) = &filter.session_id {
            sql.push_str(" AND session_id = ?");
            params.push(Box::new(session_id.clone()));
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND activity_type = ?");
            params.push(Box::new(kind.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(std::convert::AsRef::as_ref).collect();

        let rows = stmt.query_map(params_refs.as_slice(), |row| {
            let kind: String = row.get(5)?;
            Ok(ActivityEntry {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                project_id: row.get(2)?,
                session_id: row.get(3)?,
                record_id: row.get(4)?,
                kind: ActivityKind::parse(&kind).unwrap_or(ActivityKind::RecordUpdated),
                summary: row.get(6)?,
                details: row.get(7)?,
                created_at: row.get(8)?,
                tick: row.get(9)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

// ==================
// Search operations
// ==================

impl SearchStore for SqliteStorage {
    fn search_records(
        &self,
        tenant: &str,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        crate::storage::search::search_records(&self.conn, tenant, query, filter)
    }
}

// ==================
// API key operations
// ==================

impl ApiKeyStore for SqliteStorage {
    fn tenant_for_key_hash(&self, key_hash: &str) -> Result<Option<String>> {
        let tenant = self
            .conn
            .query_row(
                "SELECT tenant_id FROM api_keys WHERE key_hash = ?1",
                [key_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tenant)
    }

    fn insert_api_key(&mut self, key_hash: &str, tenant: &str, label: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO api_keys (key_hash, tenant_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![key_hash, tenant, label, now_ms()],
        )?;
        Ok(())
    }

    fn list_api_keys(&self) -> Result<Vec<ApiKeyInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id, label, created_at FROM api_keys ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ApiKeyInfo {
                tenant_id: row.get(0)?,
                label: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
