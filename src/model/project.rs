//! Project model for Arbor.
//!
//! Projects are the tick domain: every record mutation inside a project
//! advances that project's logical clock by exactly one.

use serde::{Deserialize, Serialize};

use super::{new_id, now_ms};

/// A project in Arbor.
///
/// Projects provide:
/// - Tenant-scoped grouping of records and sessions
/// - The per-project monotonic tick (lamport-like version counter)
/// - A lazily-created default for tenants that never manage projects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier (UUID format, `proj_` prefixed)
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Display name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Logical clock; increments by 1 on every committed record mutation
    pub tick: i64,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl Project {
    /// Create a new project with tick 0.
    ///
    /// A caller-supplied id is honored; otherwise a fresh one is minted.
    #[must_use]
    pub fn new(tenant_id: &str, name: &str, description: Option<&str>, id: Option<&str>) -> Self {
        Self {
            id: id.map_or_else(|| new_id("proj"), ToString::to_string),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            description: description.map(ToString::to_string),
            tick: 0,
            created_at: now_ms(),
        }
    }
}

/// Project listing row augmented with counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tick: i64,
    pub created_at: i64,
    /// Total records in the project
    pub record_count: i64,
    /// Records currently in the OPEN state
    pub open_records: i64,
    /// Sessions with status `active`
    pub active_sessions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_project() {
        let project = Project::new("tenant-a", "My Project", Some("notes"), None);

        assert!(project.id.starts_with("proj_"));
        assert_eq!(project.tenant_id, "tenant-a");
        assert_eq!(project.tick, 0);
        assert_eq!(project.description.as_deref(), Some("notes"));
    }

    #[test]
    fn test_supplied_id_is_honored() {
        let project = Project::new("tenant-a", "P", None, Some("proj_custom"));
        assert_eq!(project.id, "proj_custom");
    }
}
