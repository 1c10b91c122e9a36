//! Data models for Arbor.
//!
//! This module contains all domain models:
//! - Project
//! - Record (with `RecordRef` light projection and the state machine)
//! - Session (with activation edges and the context bundle)
//! - Activity entries
//! - Search hits

pub mod activity;
pub mod project;
pub mod record;
pub mod session;

pub use activity::{ActivityEntry, ActivityKind};
pub use project::{Project, ProjectSummary};
pub use record::{
    transition_requirement, Record, RecordRef, RecordState, SearchHit, TransitionRequirement,
};
pub use session::{Activation, ContextBundle, Session, SessionStatus};

/// Current time as Unix milliseconds, the storage timestamp unit.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Mint a prefixed short UUID id, e.g. `rec_1a2b3c4d5e6f`.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id("rec");
        assert!(id.starts_with("rec_"));
        assert_eq!(id.len(), 4 + 12);
    }

    #[test]
    fn test_new_id_unique() {
        assert_ne!(new_id("sess"), new_id("sess"));
    }
}
