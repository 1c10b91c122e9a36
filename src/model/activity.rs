//! Activity log entries.
//!
//! The activity log is append-only and doubles as the record-history
//! surface exposed to agents. Entries written by a record mutation carry
//! the tick that mutation was assigned, so history order matches the
//! project's write order.

use serde::{Deserialize, Serialize};

use super::now_ms;

/// Activity entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    // Record events
    RecordCreated,
    RecordUpdated,
    StateTransition,

    // Session events
    SessionStarted,
    SessionSynced,
    SessionSaved,
    SessionClosed,
    SessionBranched,
    RecordActivated,
}

impl ActivityKind {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCreated => "record_created",
            Self::RecordUpdated => "record_updated",
            Self::StateTransition => "state_transition",
            Self::SessionStarted => "session_started",
            Self::SessionSynced => "session_synced",
            Self::SessionSaved => "session_saved",
            Self::SessionClosed => "session_closed",
            Self::SessionBranched => "session_branched",
            Self::RecordActivated => "record_activated",
        }
    }

    /// Parse from the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "record_created" => Some(Self::RecordCreated),
            "record_updated" => Some(Self::RecordUpdated),
            "state_transition" => Some(Self::StateTransition),
            "session_started" => Some(Self::SessionStarted),
            "session_synced" => Some(Self::SessionSynced),
            "session_saved" => Some(Self::SessionSaved),
            "session_closed" => Some(Self::SessionClosed),
            "session_branched" => Some(Self::SessionBranched),
            "record_activated" => Some(Self::RecordActivated),
            _ => None,
        }
    }
}

/// An activity log entry. Never mutated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Store-assigned row id (0 until inserted)
    pub id: i64,
    pub tenant_id: String,
    pub project_id: String,
    pub session_id: Option<String>,
    pub record_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// One-line human summary
    pub summary: String,
    /// Optional structured details (JSON text)
    pub details: Option<String>,
    pub created_at: i64,
    /// Project tick at the time of the write (0 for non-mutating events)
    pub tick: i64,
}

impl ActivityEntry {
    /// Create a new entry (id assigned by the store, tick by the caller).
    #[must_use]
    pub fn new(tenant_id: &str, project_id: &str, kind: ActivityKind, summary: &str) -> Self {
        Self {
            id: 0,
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
            session_id: None,
            record_id: None,
            kind,
            summary: summary.to_string(),
            details: None,
            created_at: now_ms(),
            tick: 0,
        }
    }

    /// Attach the session that performed the operation.
    #[must_use]
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Attach the record the operation touched.
    #[must_use]
    pub fn with_record(mut self, record_id: &str) -> Self {
        self.record_id = Some(record_id.to_string());
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    /// Set the tick assigned by the mutation this entry describes.
    #[must_use]
    pub fn at_tick(mut self, tick: i64) -> Self {
        self.tick = tick;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ActivityKind::RecordCreated,
            ActivityKind::RecordUpdated,
            ActivityKind::StateTransition,
            ActivityKind::SessionStarted,
            ActivityKind::SessionSynced,
            ActivityKind::SessionSaved,
            ActivityKind::SessionClosed,
            ActivityKind::SessionBranched,
            ActivityKind::RecordActivated,
        ] {
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityKind::parse("unknown"), None);
    }

    #[test]
    fn test_builder_chain() {
        let entry = ActivityEntry::new("t", "proj_1", ActivityKind::RecordCreated, "created")
            .with_session("sess_1")
            .with_record("rec_1")
            .at_tick(7);
        assert_eq!(entry.session_id.as_deref(), Some("sess_1"));
        assert_eq!(entry.record_id.as_deref(), Some("rec_1"));
        assert_eq!(entry.tick, 7);
    }
}
