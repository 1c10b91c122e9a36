//! Record model and state machine.
//!
//! Records form a DAG per project via `parent_id` (acyclic by
//! construction: creation can only reference existing records). Each
//! record carries the project tick of its most recent write, which is
//! what the optimistic-concurrency check compares against a session's
//! activation tick.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{new_id, now_ms};

/// Record lifecycle states.
///
/// Serialized uppercase at the API boundary, stored lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordState {
    Open,
    Later,
    Resolved,
    Discarded,
}

impl RecordState {
    /// Storage string (lowercase).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Later => "later",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// API string (uppercase), used in messages and payloads.
    #[must_use]
    pub const fn api_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Later => "LATER",
            Self::Resolved => "RESOLVED",
            Self::Discarded => "DISCARDED",
        }
    }

    /// Parse from either the storage or API form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "later" => Some(Self::Later),
            "resolved" => Some(Self::Resolved),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }

    /// Whether the state machine permits `self -> to`.
    ///
    /// Self-transitions are not permitted; re-opening is always allowed.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::Later | Self::Resolved | Self::Discarded)
                | (Self::Later, Self::Open | Self::Discarded)
                | (Self::Resolved | Self::Discarded, Self::Open)
        )
    }
}

impl Default for RecordState {
    fn default() -> Self {
        Self::Open
    }
}

/// Fields a transition requires beyond the target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRequirement {
    None,
    Reason,
    ResolvedBy,
}

/// Validate a transition and report what it requires.
///
/// # Errors
///
/// `INVALID_TRANSITION` when the state machine denies the move.
pub fn transition_requirement(
    from: RecordState,
    to: RecordState,
) -> Result<TransitionRequirement> {
    if !from.can_transition(to) {
        return Err(Error::InvalidTransition {
            from: from.api_str().to_string(),
            to: to.api_str().to_string(),
        });
    }
    Ok(match to {
        RecordState::Later | RecordState::Discarded => TransitionRequirement::Reason,
        RecordState::Resolved => TransitionRequirement::ResolvedBy,
        RecordState::Open => TransitionRequirement::None,
    })
}

/// A full record, including body and relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (UUID format, `rec_` prefixed)
    pub id: String,

    /// Owning tenant; always equals the owning project's tenant
    pub tenant_id: String,

    /// Owning project
    pub project_id: String,

    /// Record type (free-form taxonomy: decision, question, note, ...)
    #[serde(rename = "type")]
    pub record_type: String,

    /// One-line title
    pub title: String,

    /// Short summary shown in refs and search results
    pub summary: String,

    /// Full body (markdown)
    pub body: String,

    /// Lifecycle state
    pub state: RecordState,

    /// Parent record in the same project, if any
    pub parent_id: Option<String>,

    /// What resolved this record (set on transition to RESOLVED)
    pub resolved_by: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last write timestamp (Unix milliseconds)
    pub modified_at: i64,

    /// Project tick at the most recent write to this record
    pub tick: i64,

    /// Related record ids in the same project (deduplicated)
    #[serde(default)]
    pub related: Vec<String>,
}

impl Record {
    /// Create a new record at tick 0; the storage layer assigns the
    /// real tick when it commits the insert.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: &str,
        project_id: &str,
        record_type: &str,
        title: &str,
        summary: &str,
        body: &str,
        state: RecordState,
        parent_id: Option<&str>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: new_id("rec"),
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
            record_type: record_type.to_string(),
            title: title.to_string(),
            summary: summary.to_string(),
            body: body.to_string(),
            state,
            parent_id: parent_id.map(ToString::to_string),
            resolved_by: None,
            created_at: now,
            modified_at: now,
            tick: 0,
            related: Vec::new(),
        }
    }

    /// Light projection of this record.
    #[must_use]
    pub fn to_ref(&self, children_count: i64, open_children_count: i64) -> RecordRef {
        RecordRef {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            record_type: self.record_type.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            state: self.state,
            parent_id: self.parent_id.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            tick: self.tick,
            children_count,
            open_children_count,
        }
    }
}

/// Lightweight record projection for cheap tree navigation.
///
/// Omits `body` and `related`, and adds child counts so agents can
/// decide where to descend without activating anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub title: String,
    pub summary: String,
    pub state: RecordState,
    pub parent_id: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
    pub tick: i64,
    pub children_count: i64,
    pub open_children_count: i64,
}

/// A full-text search result: light projection plus relevance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: RecordRef,
    /// Relevance score from the index (lower bm25 is better; negated
    /// so larger means more relevant)
    pub rank: f64,
    /// Highlighted fragment from the matched column, if available
    pub snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            RecordState::Open,
            RecordState::Later,
            RecordState::Resolved,
            RecordState::Discarded,
        ] {
            assert_eq!(RecordState::parse(state.as_str()), Some(state));
            assert_eq!(RecordState::parse(state.api_str()), Some(state));
        }
        assert_eq!(RecordState::parse("bogus"), None);
    }

    #[test]
    fn test_transition_table_exhaustive() {
        use RecordState::{Discarded, Later, Open, Resolved};

        let allowed = [
            (Open, Later),
            (Open, Resolved),
            (Open, Discarded),
            (Later, Open),
            (Later, Discarded),
            (Resolved, Open),
            (Discarded, Open),
        ];

        for from in [Open, Later, Resolved, Discarded] {
            for to in [Open, Later, Resolved, Discarded] {
                let expect = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition(to),
                    expect,
                    "{} -> {}",
                    from.api_str(),
                    to.api_str()
                );
            }
        }
    }

    #[test]
    fn test_transition_requirements() {
        assert_eq!(
            transition_requirement(RecordState::Open, RecordState::Later).unwrap(),
            TransitionRequirement::Reason
        );
        assert_eq!(
            transition_requirement(RecordState::Open, RecordState::Resolved).unwrap(),
            TransitionRequirement::ResolvedBy
        );
        assert_eq!(
            transition_requirement(RecordState::Later, RecordState::Open).unwrap(),
            TransitionRequirement::None
        );
        assert!(matches!(
            transition_requirement(RecordState::Resolved, RecordState::Later),
            Err(crate::error::Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_serde_uppercase() {
        let json = serde_json::to_string(&RecordState::Open).unwrap();
        assert_eq!(json, "\"OPEN\"");
        let back: RecordState = serde_json::from_str("\"RESOLVED\"").unwrap();
        assert_eq!(back, RecordState::Resolved);
    }

    #[test]
    fn test_record_to_ref_drops_body() {
        let rec = Record::new(
            "t", "proj_1", "decision", "Title", "Summary", "Body text",
            RecordState::Open, None,
        );
        let r = rec.to_ref(3, 1);
        assert_eq!(r.children_count, 3);
        assert_eq!(r.open_children_count, 1);
        assert_eq!(r.title, "Title");
    }
}
