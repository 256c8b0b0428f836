//! The uniform result envelope returned by every analyzer call.

use serde::{Deserialize, Serialize};

use super::AnalyzerKind;
use super::types::{ActionExtraction, Categorization, ClientMatch, EventDetection};
use crate::error::AnalyzerError;

/// Result of one analyzer call.
///
/// `data` is only reachable through [`AnalyzerOutcome::data`], which returns
/// `None` for failed outcomes. Token and time figures are kept on failures too,
/// since a failed call may still have been billed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOutcome<T> {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    pub confidence: f32,
    pub tokens_used: u64,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> AnalyzerOutcome<T> {
    /// A successful call carrying `data`.
    pub fn success(data: T, confidence: f32, tokens_used: u64, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            confidence: confidence.clamp(0.0, 1.0),
            tokens_used,
            processing_time_ms,
            error: None,
        }
    }

    /// A failed call. Any tokens already spent are still reported.
    pub fn failure(error: impl Into<String>, tokens_used: u64, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            confidence: 0.0,
            tokens_used,
            processing_time_ms,
            error: Some(error.into()),
        }
    }

    /// Failed outcome built from a typed analyzer error.
    pub fn from_error(err: &AnalyzerError, tokens_used: u64, processing_time_ms: u64) -> Self {
        Self::failure(err.to_string(), tokens_used, processing_time_ms)
    }

    /// Empty outcome for an analyzer that is switched off. Costs nothing.
    pub fn disabled(kind: AnalyzerKind) -> Self {
        Self::from_error(
            &AnalyzerError::Disabled {
                analyzer: kind.name().to_string(),
            },
            0,
            0,
        )
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The payload, only if the call succeeded.
    pub fn data(&self) -> Option<&T> {
        if self.success { self.data.as_ref() } else { None }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// An outcome tagged with the analyzer that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analyzer", rename_all = "snake_case")]
pub enum AnalyzerRun {
    Categorizer(AnalyzerOutcome<Categorization>),
    ActionExtractor(AnalyzerOutcome<ActionExtraction>),
    ClientTagger(AnalyzerOutcome<ClientMatch>),
    EventDetector(AnalyzerOutcome<EventDetection>),
}

/// Dispatch a field access across every variant.
macro_rules! each_outcome {
    ($run:expr, $o:ident => $body:expr) => {
        match $run {
            AnalyzerRun::Categorizer($o) => $body,
            AnalyzerRun::ActionExtractor($o) => $body,
            AnalyzerRun::ClientTagger($o) => $body,
            AnalyzerRun::EventDetector($o) => $body,
        }
    };
}

impl AnalyzerRun {
    pub fn kind(&self) -> AnalyzerKind {
        match self {
            AnalyzerRun::Categorizer(_) => AnalyzerKind::Categorizer,
            AnalyzerRun::ActionExtractor(_) => AnalyzerKind::ActionExtractor,
            AnalyzerRun::ClientTagger(_) => AnalyzerKind::ClientTagger,
            AnalyzerRun::EventDetector(_) => AnalyzerKind::EventDetector,
        }
    }

    pub fn is_success(&self) -> bool {
        each_outcome!(self, o => o.is_success())
    }

    pub fn tokens_used(&self) -> u64 {
        each_outcome!(self, o => o.tokens_used)
    }

    pub fn processing_time_ms(&self) -> u64 {
        each_outcome!(self, o => o.processing_time_ms)
    }

    pub fn error(&self) -> Option<&str> {
        each_outcome!(self, o => o.error())
    }
}
