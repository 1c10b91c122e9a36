//! Full-text query building over the `records_fts` index.
//!
//! The index itself is maintained by triggers (see [`super::schema`]),
//! so a committed record write is visible to the next search with no
//! separate indexing step. Queries here only ever read.

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::model::{RecordRef, RecordState, SearchHit};
use crate::storage::SearchFilter;

/// Turn free-form user input into a safe FTS5 MATCH expression.
///
/// Each whitespace-separated token is quoted (stripping embedded
/// quotes) so FTS5 operator syntax in user input cannot break the
/// query; tokens combine with implicit AND. Returns `None` when
/// nothing searchable remains.
fn build_match_query(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Run a tenant+project-scoped full-text query.
///
/// Results are ordered by relevance (bm25), ties broken by
/// `created_at` DESC. The exposed `rank` is negated bm25 so larger
/// means more relevant.
pub fn search_records(
    conn: &Connection,
    tenant: &str,
    query: &str,
    filter: &SearchFilter,
) -> Result<Vec<SearchHit>> {
    let Some(match_expr) = build_match_query(query) else {
        return Ok(Vec::new());
    };

    let mut sql = String::from(
        "SELECT r.id, r.project_id, r.record_type, r.title, r.summary, r.state, r.parent_id,
                r.created_at, r.modified_at, r.tick,
                (SELECT COUNT(*) FROM records c WHERE c.parent_id = r.id) AS children_count,
                (SELECT COUNT(*) FROM records c WHERE c.parent_id = r.id AND c.state = 'open') AS open_children_count,
                -records_fts.rank AS score,
                snippet(records_fts, -1, '[', ']', '…', 12) AS snip
         FROM records_fts
         JOIN records r ON r.rowid = records_fts.rowid
         WHERE records_fts MATCH ? AND r.tenant_id = ? AND r.project_id = ?",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(match_expr),
        Box::new(tenant.to_string()),
        Box::new(filter.project_id.clone()),
    ];

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

    sql.push_str(" ORDER BY records_fts.rank ASC, r.created_at DESC LIMIT ? OFFSET ?");
    params.push(Box::new(filter.limit));
    params.push(Box::new(filter.offset));

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::ToSql> =
        params.iter().map(std::convert::AsRef::as_ref).collect();

    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        let state: String = row.get(5)?;
        Ok(SearchHit {
            record: RecordRef {
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
            },
            rank: row.get(12)?,
            snippet: row.get(13)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Project, Record};
    use crate::storage::{ProjectStore, RecordStore, SqliteStorage};

    #[test]
    fn test_build_match_query_quotes_terms() {
        assert_eq!(
            build_match_query("cache strategy").as_deref(),
            Some("\"cache\" \"strategy\"")
        );
        assert_eq!(
            build_match_query("a \"quoted\" term").as_deref(),
            Some("\"a\" \"quoted\" \"term\"")
        );
        assert_eq!(build_match_query("   "), None);
        assert_eq!(build_match_query("\"\""), None);
    }

    fn seed(store: &mut SqliteStorage, tenant: &str) -> Project {
        let project = Project::new(tenant, "P", None, None);
        store.insert_project(&project).unwrap();
        project
    }

    fn record(project: &Project, title: &str, summary: &str, body: &str) -> Record {
        Record::new(
            &project.tenant_id,
            &project.id,
            "note",
            title,
            summary,
            body,
            RecordState::Open,
            None,
        )
    }

    #[test]
    fn test_search_scoped_by_tenant_and_project() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let p1 = seed(&mut store, "t1");
        let p2 = seed(&mut store, "t2");

        store
            .create_record(&record(&p1, "Sharding plan", "S", "B"), &[], None)
            .unwrap();
        store
            .create_record(&record(&p2, "Sharding plan", "S", "B"), &[], None)
            .unwrap();

        let filter = SearchFilter {
            project_id: p1.id.clone(),
            limit: 10,
            ..Default::default()
        };
        let hits = search_records(store.conn(), "t1", "sharding", &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.project_id, p1.id);

        // Other tenant sees nothing through the same project filter
        let hits = search_records(store.conn(), "t2", "sharding", &filter).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_matches_body_and_returns_snippet() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let p = seed(&mut store, "t1");

        store
            .create_record(
                &record(&p, "Title", "Summary", "the quorum protocol needs three acks"),
                &[],
                None,
            )
            .unwrap();

        let filter = SearchFilter {
            project_id: p.id.clone(),
            limit: 10,
            ..Default::default()
        };
        let hits = search_records(store.conn(), "t1", "quorum", &filter).unwrap();
        assert_eq!(hits.len(), 1);
        let snippet = hits[0].snippet.as_deref().unwrap();
        assert!(snippet.contains("[quorum]"), "snippet was: {snippet}");
    }

    #[test]
    fn test_search_state_filter() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let p = seed(&mut store, "t1");

        let mut resolved = record(&p, "Resolved topic", "S", "B");
        resolved.state = RecordState::Resolved;
        store.create_record(&resolved, &[], None).unwrap();

        let filter = SearchFilter {
            project_id: p.id.clone(),
            states: vec![RecordState::Open],
            limit: 10,
            ..Default::default()
        };
        let hits = search_records(store.conn(), "t1", "topic", &filter).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_observes_updates_immediately() {
        let mut store = SqliteStorage::open_memory().unwrap();
        let p = seed(&mut store, "t1");
        let rec = store
            .create_record(&record(&p, "Old title", "S", "B"), &[], None)
            .unwrap();

        let session = crate::model::Session::new("t1", &p.id, None, None, 1);
        crate::storage::SessionStore::persist_activation(&mut store, &session, &rec.id, 1, true)
            .unwrap();

        let mut updated = rec.clone();
        updated.title = "Fresh heading".to_string();
        store
            .update_record_cas(&updated, rec.tick, &session.id, None)
            .unwrap();

        let filter = SearchFilter {
            project_id: p.id.clone(),
            limit: 10,
            ..Default::default()
        };
        assert!(search_records(store.conn(), "t1", "old", &filter).unwrap().is_empty());
        assert_eq!(
            search_records(store.conn(), "t1", "fresh", &filter).unwrap().len(),
            1
        );
    }
}
