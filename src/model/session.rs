//! Session model, activation edges, and the context bundle.
//!
//! A session is an agent's working context inside one project. Records
//! must be *activated* into a session before they can be written; the
//! activation edge remembers the project tick observed at activation,
//! which is what update conflict detection compares against.

use serde::{Deserialize, Serialize};

use super::{new_id, now_ms, Record, RecordRef};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stale,
    Closed,
}

impl SessionStatus {
    /// Storage string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Closed => "closed",
        }
    }

    /// Parse from the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "stale" => Some(Self::Stale),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// A session in Arbor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier (`sess_` prefixed unless pre-minted by a transport)
    pub id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// The single project this session works in; sessions never migrate
    pub project_id: String,

    /// Lifecycle status
    pub status: SessionStatus,

    /// The record this session is centred on, if any
    pub focus_record: Option<String>,

    /// Session this one was branched from, if any
    pub parent_session: Option<String>,

    /// Project tick at the last sync; always <= the project's tick
    pub last_sync_tick: i64,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last touch timestamp (Unix milliseconds)
    pub last_activity: i64,

    /// Close timestamp, set when status becomes `closed`
    pub closed_at: Option<i64>,
}

impl Session {
    /// Create a new active session at the given sync tick.
    ///
    /// A caller-supplied id is honored (transports may pre-mint ids);
    /// otherwise a fresh one is minted.
    #[must_use]
    pub fn new(
        tenant_id: &str,
        project_id: &str,
        id: Option<&str>,
        focus_record: Option<&str>,
        last_sync_tick: i64,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.map_or_else(|| new_id("sess"), ToString::to_string),
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
            status: SessionStatus::Active,
            focus_record: focus_record.map(ToString::to_string),
            parent_session: None,
            last_sync_tick,
            created_at: now,
            last_activity: now,
            closed_at: None,
        }
    }
}

/// An activation edge: a session's declared intent to reason about a
/// record, carrying the project tick observed at activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub session_id: String,
    pub record_id: String,
    pub activation_tick: i64,
    pub activated_at: i64,
}

/// The scoped view returned on activation.
///
/// Target and parent are full records, OPEN children are full, other
/// neighbors are light refs. Lists are ordered by `created_at` ASC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub target: Record,
    pub parent: Option<Record>,
    pub open_children: Vec<Record>,
    pub other_children: Vec<RecordRef>,
    pub grandchildren: Vec<RecordRef>,
}
