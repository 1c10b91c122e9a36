//! The tool-protocol boundary.
//!
//! [`rpc`] defines the JSON-RPC envelopes, [`tools`] the static
//! tool-name dispatch table, [`auth`] the token→tenant resolution, and
//! [`stdio`]/[`http`] the two transports. All shared state is the
//! store handle: requests run as independent tasks and coordinate
//! through it only.

pub mod auth;
pub mod http;
pub mod rpc;
pub mod stdio;
pub mod tools;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::storage::SqliteStorage;

/// Shared state for all transports and request tasks.
#[derive(Clone)]
pub struct AppState {
    /// The single authoritative store. Operations are short
    /// transactions; the async mutex serializes access to the
    /// connection, not to any long-running work.
    pub store: Arc<Mutex<SqliteStorage>>,
    /// Tenant used when no bearer token is in play (stdio mode).
    pub default_tenant: String,
}

impl AppState {
    /// Wrap a storage handle for serving.
    #[must_use]
    pub fn new(store: SqliteStorage, default_tenant: impl Into<String>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            default_tenant: default_tenant.into(),
        }
    }
}
