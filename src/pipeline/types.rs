//! Shared types for the analysis pipeline.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::analyzers::{
    ActionExtraction, AnalyzerKind, AnalyzerRun, Categorization, ClientMatch, EventDetection,
};

/// Version tag stamped on every aggregated analysis.
pub const ANALYZER_VERSION: &str = "1.0";

// ── Input ───────────────────────────────────────────────────────────

/// A synced email awaiting analysis. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailItem {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Provider labels as synced (e.g. "INBOX", "CATEGORY_PROMOTIONS").
    #[serde(default)]
    pub labels: Vec<String>,
    pub received_at: DateTime<Utc>,
    /// Set once an analysis has been persisted for this email.
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl EmailItem {
    /// Minimal email for callers that only have a sender and subject.
    pub fn new(id: impl Into<String>, sender_email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: None,
            snippet: None,
            body: None,
            sender_email: sender_email.into(),
            sender_name: None,
            labels: Vec::new(),
            received_at: Utc::now(),
            analyzed_at: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed_at.is_some()
    }
}

/// A client the user is actively working with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRef {
    pub id: String,
    pub name: String,
    /// Email domains that identify this client (e.g. "acme.com").
    #[serde(default)]
    pub domains: Vec<String>,
}

/// Per-user analyzer switches. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerToggles {
    pub categorizer: bool,
    pub action_extractor: bool,
    pub client_tagger: bool,
    pub event_detector: bool,
}

impl Default for AnalyzerToggles {
    fn default() -> Self {
        Self {
            categorizer: true,
            action_extractor: true,
            client_tagger: true,
            event_detector: true,
        }
    }
}

impl AnalyzerToggles {
    pub fn is_enabled(&self, kind: AnalyzerKind) -> bool {
        match kind {
            AnalyzerKind::Categorizer => self.categorizer,
            AnalyzerKind::ActionExtractor => self.action_extractor,
            AnalyzerKind::ClientTagger => self.client_tagger,
            AnalyzerKind::EventDetector => self.event_detector,
        }
    }
}

/// Read-only user configuration supplied once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub vip_contacts: Vec<String>,
    #[serde(default)]
    pub active_clients: Vec<ClientRef>,
    #[serde(default)]
    pub active_projects: Vec<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub analyzers: AnalyzerToggles,
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
            vip_contacts: Vec::new(),
            active_clients: Vec::new(),
            active_projects: Vec::new(),
            locale: default_locale(),
            timezone: default_timezone(),
            analyzers: AnalyzerToggles::default(),
        }
    }
}

// ── Per-email output ────────────────────────────────────────────────

/// Union of the successful analyzer payloads for one email.
///
/// A field is `None` when its analyzer did not run or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorization: Option<Categorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionExtraction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventDetection>,
    pub total_tokens_used: u64,
    pub total_processing_time_ms: u64,
    pub analyzer_version: String,
}

impl Default for AggregatedAnalysis {
    fn default() -> Self {
        Self {
            categorization: None,
            action: None,
            client: None,
            event: None,
            total_tokens_used: 0,
            total_processing_time_ms: 0,
            analyzer_version: ANALYZER_VERSION.to_string(),
        }
    }
}

impl AggregatedAnalysis {
    /// Whether any core analyzer contributed data.
    pub fn has_core_data(&self) -> bool {
        self.categorization.is_some() || self.action.is_some() || self.client.is_some()
    }
}

/// Persistence write that can fail independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStep {
    SaveAnalysis,
    CreateAction,
    UpdateCategory,
    LinkClient,
}

impl PersistStep {
    pub fn name(&self) -> &'static str {
        match self {
            PersistStep::SaveAnalysis => "save_analysis",
            PersistStep::CreateAction => "create_action",
            PersistStep::UpdateCategory => "update_category",
            PersistStep::LinkClient => "link_client",
        }
    }
}

/// Where an item-level error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ErrorSource {
    Analyzer(AnalyzerKind),
    Persistence(PersistStep),
    /// The item or batch ran out of time.
    Deadline,
    /// The caller stopped listening before the item was scheduled.
    Cancelled,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Analyzer(kind) => f.write_str(kind.name()),
            ErrorSource::Persistence(step) => f.write_str(step.name()),
            ErrorSource::Deadline => f.write_str("deadline"),
            ErrorSource::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One error surfaced while processing an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub source: ErrorSource,
    pub message: String,
}

impl ItemError {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

/// Which persistence writes landed for an email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceReport {
    pub analysis_saved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<uuid::Uuid>,
    pub category_updated: bool,
    pub client_linked: bool,
}

/// Result of running one email through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub email_id: String,
    /// True iff at least one core analyzer succeeded (or the email was skipped).
    pub success: bool,
    /// True when the skip short-circuit fired and no analyzer ran.
    pub skipped: bool,
    pub analysis: AggregatedAnalysis,
    pub outcomes: BTreeMap<AnalyzerKind, AnalyzerRun>,
    pub errors: Vec<ItemError>,
    pub persistence: PersistenceReport,
}

impl ProcessingResult {
    /// Zero-cost result for an email that was already analyzed.
    pub fn skipped(email_id: impl Into<String>) -> Self {
        Self {
            email_id: email_id.into(),
            success: true,
            skipped: true,
            analysis: AggregatedAnalysis::default(),
            outcomes: BTreeMap::new(),
            errors: Vec::new(),
            persistence: PersistenceReport::default(),
        }
    }

    /// Failed result for an email that never produced analyzer outcomes.
    pub fn aborted(email_id: impl Into<String>, error: ItemError) -> Self {
        Self {
            email_id: email_id.into(),
            success: false,
            skipped: false,
            analysis: AggregatedAnalysis::default(),
            outcomes: BTreeMap::new(),
            errors: vec![error],
            persistence: PersistenceReport::default(),
        }
    }

    pub fn tokens_used(&self) -> u64 {
        self.analysis.total_tokens_used
    }

    pub fn outcome(&self, kind: AnalyzerKind) -> Option<&AnalyzerRun> {
        self.outcomes.get(&kind)
    }
}

// ── Batch output ────────────────────────────────────────────────────

/// An item error, attributed to its email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub email_id: String,
    pub source: ErrorSource,
    pub message: String,
}

/// Rollup for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub total_emails: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub chunk_count: usize,
    pub total_time_ms: u64,
    pub avg_time_per_email_ms: u64,
    pub total_tokens_used: u64,
    pub estimated_cost: Decimal,
    pub results: HashMap<String, ProcessingResult>,
    pub errors: Vec<BatchError>,
}

impl BatchResult {
    pub fn empty() -> Self {
        Self {
            total_emails: 0,
            success_count: 0,
            failure_count: 0,
            skipped_count: 0,
            chunk_count: 0,
            total_time_ms: 0,
            avg_time_per_email_ms: 0,
            total_tokens_used: 0,
            estimated_cost: Decimal::ZERO,
            results: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

/// Live events emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Sent once per finished chunk.
    Progress { completed: usize, total: usize },
    /// Sent once per item error.
    ItemError(BatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_result_is_free_success() {
        let result = ProcessingResult::skipped("email-1");
        assert!(result.success);
        assert!(result.skipped);
        assert_eq!(result.tokens_used(), 0);
        assert!(result.outcomes.is_empty());
        assert_eq!(result.analysis.analyzer_version, ANALYZER_VERSION);
    }

    #[test]
    fn user_context_defaults_from_json() {
        let ctx: UserContext = serde_json::from_str(r#"{"user_id": "u1"}"#).unwrap();
        assert_eq!(ctx.locale, "en-US");
        assert_eq!(ctx.timezone, "UTC");
        assert!(ctx.analyzers.is_enabled(AnalyzerKind::EventDetector));
    }

    #[test]
    fn error_source_serialization() {
        let source = ErrorSource::Analyzer(AnalyzerKind::ClientTagger);
        let json = serde_json::to_value(source).unwrap();
        assert_eq!(json["kind"], "analyzer");
        assert_eq!(json["name"], "client_tagger");
        assert_eq!(source.to_string(), "client_tagger");

        let json = serde_json::to_value(ErrorSource::Deadline).unwrap();
        assert_eq!(json["kind"], "deadline");
    }

    #[test]
    fn batch_event_serialization() {
        let event = BatchEvent::Progress {
            completed: 4,
            total: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["completed"], 4);
    }
}
