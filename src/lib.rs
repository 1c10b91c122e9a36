//! Arbor - a multi-tenant reasoning store for AI agents.
//!
//! Design knowledge is organized as Projects → Records → Sessions and
//! exposed over a JSON-RPC tool protocol. Agents navigate the record
//! tree with lightweight refs, *activate* records to enter writing
//! mode, mutate them under optimistic concurrency, and track staleness
//! through a per-project logical clock (the tick).
//!
//! # Architecture
//!
//! - [`model`] - Domain types (Project, Record, Session, activity entries)
//! - [`storage`] - SQLite layer: schema, FTS5 index, narrow store traits
//! - [`service`] - Domain rules: validation, state machine, conflicts,
//!   activation discipline, context bundles
//! - [`server`] - JSON-RPC dispatch, auth boundary, stdio/HTTP transports
//! - [`config`] - Database path and serve configuration
//! - [`error`] - Error taxonomy with stable API codes and hints

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod model;
pub mod server;
pub mod service;
pub mod storage;

pub use error::{Error, Result};
