//! Activity service.
//!
//! Thin query layer over the append-only log. The log is the source of
//! truth for the record-history view exposed to agents.

use crate::error::{Error, Result};
use crate::model::ActivityEntry;
use crate::storage::{ActivityFilter, ActivityStore, RecordStore};

/// List activity entries under a filter, newest first.
pub fn list<S: ActivityStore>(
    store: &S,
    tenant: &str,
    filter: &ActivityFilter,
) -> Result<Vec<ActivityEntry>> {
    let mut filter = filter.clone();
    filter.limit = super::effective_limit(filter.limit);
    store.list_activity(tenant, &filter)
}

/// The history of one record: its activity entries, newest first.
///
/// The record must exist; history of an unknown id is an error rather
/// than an empty list.
pub fn record_history<S: ActivityStore + RecordStore>(
    store: &S,
    tenant: &str,
    record_id: &str,
    limit: u32,
) -> Result<Vec<ActivityEntry>> {
    if store.get_record_ref(tenant, record_id)?.is_none() {
        return Err(Error::RecordNotFound {
            id: record_id.to_string(),
        });
    }

    list(
        store,
        tenant,
        &ActivityFilter {
            record_id: Some(record_id.to_string()),
            limit,
            ..Default::default()
        },
    )
}
