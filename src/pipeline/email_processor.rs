//! Email processor — runs one email through every analyzer and persists the
//! aggregated result.
//!
//! Flow:
//! 1. Skip short-circuit for already-analyzed emails (no analyzer cost)
//! 2. Core phase: categorizer, action extractor and client tagger concurrently
//! 3. Secondary phase: event detector, only when the categorizer asks for it
//! 4. Aggregate successful payloads and total the cost of every call
//! 5. Persist the analysis, then each side effect independently
//!
//! An optional deadline covers steps 2 and 3 only.
//!
//! **The processor never fails.** Analyzer failures, panics and timeouts are
//! folded into per-analyzer outcomes; persistence failures into `errors`.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analyzers::{
    ActionExtraction, Analyzer, AnalyzerKind, AnalyzerOutcome, AnalyzerRole, AnalyzerRun,
    AnalyzerSet, Categorization, ClientMatch, EmailCategory, EventDetection,
};
use crate::config::{ProcessOptions, ProcessorConfig};
use crate::error::AnalyzerError;
use crate::pipeline::types::{
    AggregatedAnalysis, EmailItem, ErrorSource, ItemError, PersistStep, PersistenceReport,
    ProcessingResult, UserContext,
};
use crate::store::{ActionRecord, AnalysisStore};

/// Runs the analyzer set over single emails.
pub struct EmailProcessor {
    analyzers: AnalyzerSet,
    store: Arc<dyn AnalysisStore>,
    config: ProcessorConfig,
}

struct Runs {
    categorization: AnalyzerOutcome<Categorization>,
    action: AnalyzerOutcome<ActionExtraction>,
    client: AnalyzerOutcome<ClientMatch>,
    event: Option<AnalyzerOutcome<EventDetection>>,
}

impl EmailProcessor {
    pub fn new(
        analyzers: AnalyzerSet,
        store: Arc<dyn AnalysisStore>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            analyzers,
            store,
            config,
        }
    }

    /// Analyze one email and persist the result.
    pub async fn process(
        &self,
        email: &EmailItem,
        context: &UserContext,
        options: &ProcessOptions,
    ) -> ProcessingResult {
        self.process_until(email, context, options, None).await
    }

    /// Like [`process`](Self::process), but abandons the analyzer phases at
    /// `deadline`. Persistence is not bounded: once the analysis is in hand
    /// its writes run to completion, so a stored analysis always gets its
    /// side effects.
    pub async fn process_until(
        &self,
        email: &EmailItem,
        context: &UserContext,
        options: &ProcessOptions,
        deadline: Option<Instant>,
    ) -> ProcessingResult {
        if options.skip_analyzed && email.is_analyzed() {
            debug!(email_id = %email.id, "Already analyzed — skipping");
            return ProcessingResult::skipped(&email.id);
        }

        debug!(email_id = %email.id, sender = %email.sender_email, "Analyzing email");

        let analyze = self.analyze(email, context);
        let runs = match deadline {
            None => analyze.await,
            Some(at) => match tokio::time::timeout_at(at, analyze).await {
                Ok(runs) => runs,
                Err(_) => {
                    warn!(email_id = %email.id, "Email analysis ran out of time");
                    return ProcessingResult::aborted(
                        &email.id,
                        ItemError::new(ErrorSource::Deadline, "email analysis ran out of time"),
                    );
                }
            },
        };
        let Runs {
            categorization,
            action,
            client,
            event,
        } = runs;

        let analysis = AggregatedAnalysis {
            categorization: categorization.data().cloned(),
            action: action.data().cloned(),
            client: client.data().cloned(),
            event: event.as_ref().and_then(|e| e.data().cloned()),
            ..Default::default()
        };

        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            AnalyzerKind::Categorizer,
            AnalyzerRun::Categorizer(categorization),
        );
        outcomes.insert(
            AnalyzerKind::ActionExtractor,
            AnalyzerRun::ActionExtractor(action),
        );
        outcomes.insert(AnalyzerKind::ClientTagger, AnalyzerRun::ClientTagger(client));
        if let Some(event) = event {
            outcomes.insert(AnalyzerKind::EventDetector, AnalyzerRun::EventDetector(event));
        }

        // A secondary failure never fails the email
        let success = outcomes
            .iter()
            .any(|(kind, run)| kind.role() == AnalyzerRole::Core && run.is_success());

        // Cost is counted for every call made, failed or not
        let analysis = AggregatedAnalysis {
            total_tokens_used: outcomes.values().map(AnalyzerRun::tokens_used).sum(),
            total_processing_time_ms: outcomes.values().map(AnalyzerRun::processing_time_ms).sum(),
            ..analysis
        };

        let mut errors: Vec<ItemError> = outcomes
            .values()
            .filter(|run| !run.is_success() && self.analyzers.is_active(run.kind(), context))
            .map(|run| {
                ItemError::new(
                    ErrorSource::Analyzer(run.kind()),
                    run.error().unwrap_or("analyzer failed without a message"),
                )
            })
            .collect();

        let persistence = if options.save_to_database && success {
            self.persist(email, context, &analysis, options, &mut errors)
                .await
        } else {
            if !success {
                warn!(email_id = %email.id, "Every core analyzer failed — nothing persisted");
            }
            PersistenceReport::default()
        };

        info!(
            email_id = %email.id,
            success,
            tokens = analysis.total_tokens_used,
            errors = errors.len(),
            "Email analyzed"
        );

        ProcessingResult {
            email_id: email.id.clone(),
            success,
            skipped: false,
            analysis,
            outcomes,
            errors,
            persistence,
        }
    }

    /// Core phase concurrently, then the event detector if the categorizer
    /// asks for it.
    async fn analyze(&self, email: &EmailItem, context: &UserContext) -> Runs {
        let (categorization, action, client) = tokio::join!(
            self.run(AnalyzerKind::Categorizer, &self.analyzers.categorizer, email, context),
            self.run(
                AnalyzerKind::ActionExtractor,
                &self.analyzers.action_extractor,
                email,
                context
            ),
            self.run(AnalyzerKind::ClientTagger, &self.analyzers.client_tagger, email, context),
        );

        let event = if triggers_event_detection(&categorization, self.config.event_trigger)
            && self.analyzers.is_active(AnalyzerKind::EventDetector, context)
        {
            Some(
                self.run(
                    AnalyzerKind::EventDetector,
                    &self.analyzers.event_detector,
                    email,
                    context,
                )
                .await,
            )
        } else {
            None
        };

        Runs {
            categorization,
            action,
            client,
            event,
        }
    }

    /// Invoke one analyzer, converting panics and timeouts into failed
    /// outcomes. Inactive analyzers are not called.
    async fn run<T: Send>(
        &self,
        kind: AnalyzerKind,
        analyzer: &Arc<dyn Analyzer<Output = T>>,
        email: &EmailItem,
        context: &UserContext,
    ) -> AnalyzerOutcome<T> {
        if !self.analyzers.is_active(kind, context) {
            debug!(email_id = %email.id, analyzer = kind.name(), "Analyzer disabled");
            return AnalyzerOutcome::disabled(kind);
        }

        let started = Instant::now();
        let call = AssertUnwindSafe(analyzer.analyze(email, context)).catch_unwind();
        let err = match tokio::time::timeout(self.config.analyzer_timeout, call).await {
            Ok(Ok(outcome)) => {
                debug!(
                    email_id = %email.id,
                    analyzer = kind.name(),
                    implementation = analyzer.name(),
                    success = outcome.is_success(),
                    tokens = outcome.tokens_used,
                    "Analyzer finished"
                );
                return outcome;
            }
            Ok(Err(panic)) => AnalyzerError::Panicked {
                analyzer: kind.name().to_string(),
                message: panic_message(&*panic),
            },
            Err(_) => AnalyzerError::Timeout {
                analyzer: kind.name().to_string(),
                timeout: self.config.analyzer_timeout,
            },
        };

        warn!(email_id = %email.id, analyzer = kind.name(), error = %err, "Analyzer call aborted");
        AnalyzerOutcome::from_error(&err, 0, started.elapsed().as_millis() as u64)
    }

    /// Write the analysis, then each derived side effect independently.
    ///
    /// Side effects are only attempted once the analysis itself is stored.
    async fn persist(
        &self,
        email: &EmailItem,
        context: &UserContext,
        analysis: &AggregatedAnalysis,
        options: &ProcessOptions,
        errors: &mut Vec<ItemError>,
    ) -> PersistenceReport {
        let mut report = PersistenceReport::default();

        if let Err(e) = self.store.upsert_analysis(&email.id, analysis).await {
            warn!(email_id = %email.id, error = %e, "Failed to save analysis");
            errors.push(ItemError::new(
                ErrorSource::Persistence(PersistStep::SaveAnalysis),
                e.to_string(),
            ));
            return report;
        }
        report.analysis_saved = true;

        let create_action = async {
            match &analysis.action {
                Some(extraction) if options.create_actions && extraction.is_actionable() => {
                    let record =
                        ActionRecord::from_extraction(&email.id, &context.user_id, extraction);
                    self.store.insert_action(&record).await.map(Some)
                }
                _ => Ok(None),
            }
        };
        let update_category = async {
            match &analysis.categorization {
                Some(c) => self
                    .store
                    .update_email_category(&email.id, c.category)
                    .await
                    .map(|()| true),
                None => Ok(false),
            }
        };
        let link_client = async {
            match analysis.client.as_ref().and_then(|c| c.client_id.as_deref()) {
                Some(client_id) => self
                    .store
                    .link_email_client(&email.id, client_id)
                    .await
                    .map(|()| true),
                None => Ok(false),
            }
        };

        let (action, category, client) = tokio::join!(create_action, update_category, link_client);

        match action {
            Ok(id) => report.action_id = id,
            Err(e) => record_side_effect_failure(email, PersistStep::CreateAction, &e, errors),
        }
        match category {
            Ok(updated) => report.category_updated = updated,
            Err(e) => record_side_effect_failure(email, PersistStep::UpdateCategory, &e, errors),
        }
        match client {
            Ok(linked) => report.client_linked = linked,
            Err(e) => record_side_effect_failure(email, PersistStep::LinkClient, &e, errors),
        }

        report
    }
}

/// Whether the categorizer result calls for the event detector.
pub fn triggers_event_detection(
    categorization: &AnalyzerOutcome<Categorization>,
    trigger: EmailCategory,
) -> bool {
    categorization
        .data()
        .is_some_and(|c| c.category == trigger)
}

fn record_side_effect_failure(
    email: &EmailItem,
    step: PersistStep,
    error: &crate::error::DatabaseError,
    errors: &mut Vec<ItemError>,
) {
    warn!(email_id = %email.id, step = step.name(), error = %error, "Side effect failed");
    errors.push(ItemError::new(ErrorSource::Persistence(step), error.to_string()));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
