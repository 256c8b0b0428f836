//! Email analysis pipeline.
//!
//! Every synced email flows through:
//! 1. `EmailProcessor::process()` — core analyzers concurrently, then the
//!    event detector when the category calls for it
//! 2. Aggregation into one `AggregatedAnalysis` plus per-analyzer outcomes
//! 3. Best-effort persistence via `AnalysisStore`
//!
//! `BatchProcessor` paces many emails through steps 1-3 in chunks, and
//! `spawn_analysis_worker` runs that on a timer against the store.
//!
//! **A failing analyzer never fails the email.** Only losing every core
//! analyzer does.

pub mod batch_processor;
pub mod email_processor;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use batch_processor::BatchProcessor;
pub use email_processor::{EmailProcessor, triggers_event_detection};
pub use types::{
    AggregatedAnalysis, BatchError, BatchEvent, BatchResult, EmailItem, ErrorSource, ItemError,
    PersistStep, PersistenceReport, ProcessingResult, UserContext,
};
pub use worker::{analyze_pending, spawn_analysis_worker};
