//! Configuration management.
//!
//! Arbor keeps one global database per machine so every transport and
//! operator command sees the same data. Serve-time settings (transport
//! mode, bind address, default tenant, drain grace) come from the CLI.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport selection for `arbor serve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    /// Line-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// JSON-RPC over HTTP with bearer-token auth.
    Http,
}

/// Settings for one serve invocation.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub mode: TransportMode,
    pub bind: SocketAddr,
    /// Tenant used by the stdio transport (no bearer tokens locally).
    pub default_tenant: String,
    /// How long in-flight requests may drain after a shutdown signal.
    pub grace: Duration,
}

/// Get the global Arbor directory location (`~/.arbor`).
#[must_use]
pub fn global_arbor_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".arbor"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. Explicit path from the CLI flag
/// 2. `ARBOR_DB` environment variable
/// 3. Global location: `~/.arbor/data/arbor.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("ARBOR_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_arbor_dir().map(|dir| dir.join("data").join("arbor.db"))
}

/// Ensure the parent directory of a database path exists.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_resolve_db_path_falls_back_to_global() {
        // Explicit flag absent: lands in a global location ending with
        // the canonical file name (ARBOR_DB may override in some
        // environments, which still yields Some).
        let result = resolve_db_path(None);
        assert!(result.is_some());
    }

    #[test]
    fn test_global_dir_is_under_home() {
        let dir = global_arbor_dir().unwrap();
        assert!(dir.ends_with(".arbor"));
    }
}
