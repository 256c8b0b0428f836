//! Inbox analysis — runs synced emails through AI analyzers and stores the
//! structured result.

pub mod analyzers;
pub mod config;
pub mod costs;
pub mod error;
pub mod pipeline;
pub mod store;

pub use analyzers::{Analyzer, AnalyzerKind, AnalyzerOutcome, AnalyzerSet};
pub use config::{BatchOptions, ProcessOptions, ProcessorConfig};
pub use error::{AnalyzerError, ConfigError, DatabaseError};
pub use pipeline::{BatchProcessor, EmailProcessor};
pub use store::{AnalysisStore, LibSqlBackend};
