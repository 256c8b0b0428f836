//! Analyzer contract.
//!
//! Every analyzer is an external capability behind one async trait. The
//! pipeline only ever sees [`AnalyzerOutcome`]s: analyzers report failure as
//! data, never as `Err` or a panic (the processor still guards against both).
//!
//! The analyzer set is closed: three core analyzers that run for every email
//! and one secondary analyzer that runs only when the categorizer asks for it.

pub mod outcome;
pub mod types;

pub use outcome::{AnalyzerOutcome, AnalyzerRun};
pub use types::{
    ActionExtraction, ActionType, Categorization, ClientMatch, EmailCategory, EventDetection,
};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::types::{EmailItem, UserContext};

/// Whether an analyzer always runs or is triggered by a core result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerRole {
    Core,
    Secondary,
}

/// The four analyzers the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Categorizer,
    ActionExtractor,
    ClientTagger,
    EventDetector,
}

impl AnalyzerKind {
    /// Core analyzers decide an email's success; secondary ones never do.
    pub fn role(&self) -> AnalyzerRole {
        match self {
            AnalyzerKind::Categorizer
            | AnalyzerKind::ActionExtractor
            | AnalyzerKind::ClientTagger => AnalyzerRole::Core,
            AnalyzerKind::EventDetector => AnalyzerRole::Secondary,
        }
    }

    /// Stable name used in logs, error lists and persisted records.
    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::Categorizer => "categorizer",
            AnalyzerKind::ActionExtractor => "action_extractor",
            AnalyzerKind::ClientTagger => "client_tagger",
            AnalyzerKind::EventDetector => "event_detector",
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single AI-backed analysis capability.
///
/// Implementations must capture every failure (network, malformed model
/// output, disabled by config) in the returned outcome. Calling `analyze` on a
/// disabled analyzer should return [`AnalyzerOutcome::disabled`].
#[async_trait]
pub trait Analyzer: Send + Sync {
    type Output: Send;

    /// Implementation name, for logs (e.g. "claude-categorizer-v2").
    fn name(&self) -> &str;

    /// Whether configuration has this analyzer switched on.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn analyze(
        &self,
        email: &EmailItem,
        context: &UserContext,
    ) -> AnalyzerOutcome<Self::Output>;
}

/// One analyzer per kind, shared across concurrent email runs.
#[derive(Clone)]
pub struct AnalyzerSet {
    pub categorizer: Arc<dyn Analyzer<Output = Categorization>>,
    pub action_extractor: Arc<dyn Analyzer<Output = ActionExtraction>>,
    pub client_tagger: Arc<dyn Analyzer<Output = ClientMatch>>,
    pub event_detector: Arc<dyn Analyzer<Output = EventDetection>>,
}

impl AnalyzerSet {
    pub fn new(
        categorizer: Arc<dyn Analyzer<Output = Categorization>>,
        action_extractor: Arc<dyn Analyzer<Output = ActionExtraction>>,
        client_tagger: Arc<dyn Analyzer<Output = ClientMatch>>,
        event_detector: Arc<dyn Analyzer<Output = EventDetection>>,
    ) -> Self {
        Self {
            categorizer,
            action_extractor,
            client_tagger,
            event_detector,
        }
    }

    /// Whether `kind` should be invoked for this user: the analyzer must be
    /// enabled in its own configuration and in the user's toggles.
    pub fn is_active(&self, kind: AnalyzerKind, context: &UserContext) -> bool {
        let configured = match kind {
            AnalyzerKind::Categorizer => self.categorizer.is_enabled(),
            AnalyzerKind::ActionExtractor => self.action_extractor.is_enabled(),
            AnalyzerKind::ClientTagger => self.client_tagger.is_enabled(),
            AnalyzerKind::EventDetector => self.event_detector.is_enabled(),
        };
        configured && context.analyzers.is_enabled(kind)
    }
}

impl fmt::Debug for AnalyzerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzerSet")
            .field("categorizer", &self.categorizer.name())
            .field("action_extractor", &self.action_extractor.name())
            .field("client_tagger", &self.client_tagger.name())
            .field("event_detector", &self.event_detector.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_fixed_per_kind() {
        for kind in [
            AnalyzerKind::Categorizer,
            AnalyzerKind::ActionExtractor,
            AnalyzerKind::ClientTagger,
        ] {
            assert_eq!(kind.role(), AnalyzerRole::Core);
        }
        assert_eq!(AnalyzerKind::EventDetector.role(), AnalyzerRole::Secondary);
    }

    #[test]
    fn kind_names_match_serde() {
        for kind in [
            AnalyzerKind::Categorizer,
            AnalyzerKind::ActionExtractor,
            AnalyzerKind::ClientTagger,
            AnalyzerKind::EventDetector,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str(), Some(kind.name()));
        }
    }
}
