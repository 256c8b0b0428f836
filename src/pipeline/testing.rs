//! Test doubles shared by the pipeline unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::analyzers::{
    ActionExtraction, ActionType, Analyzer, AnalyzerOutcome, AnalyzerSet, Categorization,
    ClientMatch, EmailCategory, EventDetection,
};
use crate::error::DatabaseError;
use crate::pipeline::types::{AggregatedAnalysis, EmailItem, PersistStep, UserContext};
use crate::store::{ActionRecord, AnalysisStore, LibSqlBackend, StoredAnalysis, StoredEmail};

type Script<T> = Box<dyn Fn(&EmailItem) -> AnalyzerOutcome<T> + Send + Sync>;

/// What a mock analyzer does when called.
pub(crate) enum Behavior<T> {
    Respond(Script<T>),
    Panic,
    Hang,
    Delay(Duration, Script<T>),
}

pub(crate) struct MockAnalyzer<T> {
    behavior: Behavior<T>,
    enabled: bool,
    calls: AtomicUsize,
}

impl<T: Clone + Send + Sync + 'static> MockAnalyzer<T> {
    pub fn new(behavior: Behavior<T>) -> Self {
        Self {
            behavior,
            enabled: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeed(data: T, tokens: u64) -> Self {
        Self::new(Behavior::Respond(Box::new(move |_| {
            AnalyzerOutcome::success(data.clone(), 0.9, tokens, 5)
        })))
    }

    pub fn fail(error: &str, tokens: u64) -> Self {
        let error = error.to_string();
        Self::new(Behavior::Respond(Box::new(move |_| {
            AnalyzerOutcome::failure(error.clone(), tokens, 5)
        })))
    }

    pub fn scripted(
        script: impl Fn(&EmailItem) -> AnalyzerOutcome<T> + Send + Sync + 'static,
    ) -> Self {
        Self::new(Behavior::Respond(Box::new(script)))
    }

    pub fn delayed(delay: Duration, data: T, tokens: u64) -> Self {
        Self::new(Behavior::Delay(
            delay,
            Box::new(move |_| AnalyzerOutcome::success(data.clone(), 0.9, tokens, 5)),
        ))
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Analyzer for MockAnalyzer<T> {
    type Output = T;

    fn name(&self) -> &str {
        "mock"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn analyze(&self, email: &EmailItem, _context: &UserContext) -> AnalyzerOutcome<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Respond(script) => script(email),
            Behavior::Panic => panic!("analyzer exploded"),
            Behavior::Hang => std::future::pending().await,
            Behavior::Delay(delay, script) => {
                tokio::time::sleep(*delay).await;
                script(email)
            }
        }
    }
}

pub(crate) fn categorized(category: EmailCategory) -> Categorization {
    Categorization {
        category,
        reasoning: "test".into(),
        topics: Vec::new(),
    }
}

pub(crate) fn respond_action() -> ActionExtraction {
    ActionExtraction {
        has_action: true,
        action_type: ActionType::Respond,
        title: "Reply to Alice".into(),
        urgency_score: 6,
        ..Default::default()
    }
}

pub(crate) fn acme_match() -> ClientMatch {
    ClientMatch {
        client_id: Some("client-acme".into()),
        client_name: Some("Acme".into()),
        relationship_signal: None,
    }
}

pub(crate) fn meetup_event() -> EventDetection {
    EventDetection {
        has_event: true,
        title: "Rust meetup".into(),
        ..Default::default()
    }
}

/// Four mocks, kept around so tests can count calls.
pub(crate) struct MockSet {
    pub categorizer: Arc<MockAnalyzer<Categorization>>,
    pub action_extractor: Arc<MockAnalyzer<ActionExtraction>>,
    pub client_tagger: Arc<MockAnalyzer<ClientMatch>>,
    pub event_detector: Arc<MockAnalyzer<EventDetection>>,
}

impl MockSet {
    /// Every analyzer succeeds; categorizer says "action required".
    pub fn healthy() -> Self {
        Self {
            categorizer: Arc::new(MockAnalyzer::succeed(
                categorized(EmailCategory::ActionRequired),
                100,
            )),
            action_extractor: Arc::new(MockAnalyzer::succeed(respond_action(), 150)),
            client_tagger: Arc::new(MockAnalyzer::succeed(acme_match(), 50)),
            event_detector: Arc::new(MockAnalyzer::succeed(meetup_event(), 80)),
        }
    }

    pub fn analyzers(&self) -> AnalyzerSet {
        AnalyzerSet::new(
            self.categorizer.clone(),
            self.action_extractor.clone(),
            self.client_tagger.clone(),
            self.event_detector.clone(),
        )
    }

    pub fn core_calls(&self) -> usize {
        self.categorizer.calls() + self.action_extractor.calls() + self.client_tagger.calls()
    }
}

/// In-memory store that fails the configured write steps, and can stall the
/// side-effect writes that follow the analysis upsert.
pub(crate) struct FlakyStore {
    inner: LibSqlBackend,
    failing: HashSet<PersistStep>,
    side_effect_delay: Duration,
}

impl FlakyStore {
    pub async fn new(failing: &[PersistStep]) -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            failing: failing.iter().copied().collect(),
            side_effect_delay: Duration::ZERO,
        }
    }

    pub fn slow_side_effects(mut self, delay: Duration) -> Self {
        self.side_effect_delay = delay;
        self
    }

    async fn check(&self, step: PersistStep) -> Result<(), DatabaseError> {
        if step != PersistStep::SaveAnalysis && !self.side_effect_delay.is_zero() {
            tokio::time::sleep(self.side_effect_delay).await;
        }
        if self.failing.contains(&step) {
            Err(DatabaseError::Query(format!("{}: disk on fire", step.name())))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AnalysisStore for FlakyStore {
    async fn insert_email(&self, email: &EmailItem) -> Result<(), DatabaseError> {
        self.inner.insert_email(email).await
    }

    async fn get_email(&self, id: &str) -> Result<Option<StoredEmail>, DatabaseError> {
        self.inner.get_email(id).await
    }

    async fn get_unanalyzed_emails(&self, limit: usize) -> Result<Vec<EmailItem>, DatabaseError> {
        self.inner.get_unanalyzed_emails(limit).await
    }

    async fn update_email_category(
        &self,
        email_id: &str,
        category: EmailCategory,
    ) -> Result<(), DatabaseError> {
        self.check(PersistStep::UpdateCategory).await?;
        self.inner.update_email_category(email_id, category).await
    }

    async fn link_email_client(
        &self,
        email_id: &str,
        client_id: &str,
    ) -> Result<(), DatabaseError> {
        self.check(PersistStep::LinkClient).await?;
        self.inner.link_email_client(email_id, client_id).await
    }

    async fn upsert_analysis(
        &self,
        email_id: &str,
        analysis: &AggregatedAnalysis,
    ) -> Result<(), DatabaseError> {
        self.check(PersistStep::SaveAnalysis).await?;
        self.inner.upsert_analysis(email_id, analysis).await
    }

    async fn get_analysis(&self, email_id: &str) -> Result<Option<StoredAnalysis>, DatabaseError> {
        self.inner.get_analysis(email_id).await
    }

    async fn insert_action(&self, action: &ActionRecord) -> Result<Uuid, DatabaseError> {
        self.check(PersistStep::CreateAction).await?;
        self.inner.insert_action(action).await
    }

    async fn list_actions_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<ActionRecord>, DatabaseError> {
        self.inner.list_actions_for_email(email_id).await
    }
}
