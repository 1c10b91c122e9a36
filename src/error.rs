//! Error types for the Arbor store.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Retryability flags for agent self-correction
//! - Context-aware recovery hints
//! - Structured JSON output for the RPC boundary
//!
//! Services return [`Error`] values; the dispatcher is the single point
//! that translates them into API error payloads. A detected update
//! conflict is NOT an error: it is a first-class result carried in the
//! `update_record` response so agents can reconcile.

use thiserror::Error;

/// Result type alias for Arbor operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes exposed at the API boundary.
///
/// Each code maps to a SCREAMING_SNAKE string. Agents match on the
/// string; the codes are a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Not Found
    RecordNotFound,
    ProjectNotFound,
    SessionNotFound,

    // Activation discipline
    NotActivated,
    ParentNotActivated,

    // State machine
    InvalidTransition,
    MissingReason,
    MissingResolvedBy,

    // Concurrency
    Conflict,

    // Validation
    InvalidInput,

    // Auth
    Unauthorized,

    // Infrastructure
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::NotActivated => "NOT_ACTIVATED",
            Self::ParentNotActivated => "PARENT_NOT_ACTIVATED",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::MissingReason => "MISSING_REASON",
            Self::MissingResolvedBy => "MISSING_RESOLVED_BY",
            Self::Conflict => "CONFLICT",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether an agent should retry with corrected input.
    ///
    /// True for validation and transition errors (supply the missing
    /// field, pick an allowed transition) and for lost CAS races (sync
    /// then retry). False for not-found and infrastructure errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotActivated
                | Self::ParentNotActivated
                | Self::InvalidTransition
                | Self::MissingReason
                | Self::MissingResolvedBy
                | Self::Conflict
                | Self::InvalidInput
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in Arbor operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Record {id} is not activated in session {session_id}")]
    NotActivated { session_id: String, id: String },

    #[error("Parent record {parent_id} is not in the session's activation set")]
    ParentNotActivated { parent_id: String },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Transition to {to} requires a reason")]
    MissingReason { to: String },

    #[error("Transition to RESOLVED requires resolved_by")]
    MissingResolvedBy,

    #[error("Write conflict on record {id}: another writer committed first")]
    Conflict { id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::ProjectNotFound { .. } => ErrorCode::ProjectNotFound,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::NotActivated { .. } => ErrorCode::NotActivated,
            Self::ParentNotActivated { .. } => ErrorCode::ParentNotActivated,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::MissingReason { .. } => ErrorCode::MissingReason,
            Self::MissingResolvedBy => ErrorCode::MissingResolvedBy,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Context-aware recovery hint for agents.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::RecordNotFound { id } => Some(format!(
                "No record with id '{id}' in this tenant. Check the id spelling or use list_records."
            )),

            Self::ProjectNotFound { id } => Some(format!(
                "No project with id '{id}'. Use list_projects, or omit the id for the default project."
            )),

            Self::SessionNotFound { .. } => {
                Some("Unknown session id. Call activate to start a new session.".to_string())
            }

            Self::NotActivated { id, .. } => Some(format!(
                "Call activate {{id: \"{id}\"}} before writing to this record."
            )),

            Self::ParentNotActivated { parent_id } => Some(format!(
                "Activate the parent first: activate {{id: \"{parent_id}\"}}."
            )),

            Self::InvalidTransition { from, .. } => Some(format!(
                "Allowed from {from}: {}",
                allowed_transitions_hint(from)
            )),

            Self::MissingReason { to } => {
                Some(format!("Supply a reason when transitioning to {to}."))
            }

            Self::MissingResolvedBy => Some(
                "Supply resolved_by naming what resolved this record.".to_string(),
            ),

            Self::Conflict { .. } => Some(
                "Another writer committed first. Call sync_session, re-read the record, then retry."
                    .to_string(),
            ),

            Self::Unauthorized(_) => {
                Some("Provide a valid bearer token in the Authorization header.".to_string())
            }

            Self::InvalidInput(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, and optional
    /// recovery hint. Agents parse this instead of free text.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "code": code.as_str(),
            "message": self.to_string(),
            "retryable": code.is_retryable(),
        });

        if let Some(hint) = self.hint() {
            obj["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

/// Human summary of allowed transitions from a given state.
fn allowed_transitions_hint(from: &str) -> &'static str {
    match from {
        "OPEN" => "LATER (reason), RESOLVED (resolved_by), DISCARDED (reason)",
        "LATER" => "OPEN, DISCARDED (reason)",
        "RESOLVED" | "DISCARDED" => "OPEN",
        _ => "none",
    }
}
