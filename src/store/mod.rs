//! Persistence layer — libSQL-backed storage for emails, analyses and actions.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ActionRecord, ActionStatus, AnalysisStore, StoredAnalysis, StoredEmail};
