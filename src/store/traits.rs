//! `AnalysisStore` trait — the persistence surface the pipeline writes to.
//!
//! The four write operations the processor needs (`upsert_analysis`,
//! `insert_action`, `update_email_category`, `link_email_client`) are
//! independent calls; a failure in one says nothing about the others. Each
//! is keyed by email id, so re-running an email replaces its rows instead of
//! adding to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzers::{ActionExtraction, ActionType, EmailCategory};
use crate::error::DatabaseError;
use crate::pipeline::types::{AggregatedAnalysis, EmailItem};

/// Lifecycle of a derived action record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Dismissed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::InProgress => "in_progress",
            ActionStatus::Completed => "completed",
            ActionStatus::Dismissed => "dismissed",
        }
    }

    /// Parse a status string from the DB. Unknown values read as pending.
    pub fn from_db(s: &str) -> Self {
        match s {
            "in_progress" => ActionStatus::InProgress,
            "completed" => ActionStatus::Completed,
            "dismissed" => ActionStatus::Dismissed,
            _ => ActionStatus::Pending,
        }
    }
}

/// A to-do derived from an email by the action extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub email_id: String,
    pub user_id: String,
    pub action_type: ActionType,
    pub title: String,
    pub description: Option<String>,
    pub urgency_score: u8,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_minutes: Option<u32>,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
}

impl ActionRecord {
    /// New pending action for `email_id`.
    pub fn from_extraction(email_id: &str, user_id: &str, extraction: &ActionExtraction) -> Self {
        let title = if extraction.title.trim().is_empty() {
            format!("{} email", extraction.action_type.as_str())
        } else {
            extraction.title.clone()
        };

        Self {
            id: Uuid::new_v4(),
            email_id: email_id.to_string(),
            user_id: user_id.to_string(),
            action_type: extraction.action_type,
            title,
            description: extraction.description.clone(),
            urgency_score: extraction.urgency_score.min(10),
            deadline: extraction.deadline,
            estimated_minutes: extraction.estimated_minutes,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// An email row plus the fields the pipeline derives onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmail {
    pub email: EmailItem,
    pub category: Option<EmailCategory>,
    pub client_id: Option<String>,
}

/// A persisted aggregated analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub email_id: String,
    pub analysis: AggregatedAnalysis,
    pub analyzed_at: DateTime<Utc>,
}

/// Backend-agnostic store for emails, analyses and actions.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    // ── Emails ──────────────────────────────────────────────────────

    /// Insert a synced email, replacing the synced fields if it exists.
    async fn insert_email(&self, email: &EmailItem) -> Result<(), DatabaseError>;

    async fn get_email(&self, id: &str) -> Result<Option<StoredEmail>, DatabaseError>;

    /// Emails without an analysis, oldest first, up to `limit`.
    async fn get_unanalyzed_emails(&self, limit: usize) -> Result<Vec<EmailItem>, DatabaseError>;

    /// Set the email's category field.
    async fn update_email_category(
        &self,
        email_id: &str,
        category: EmailCategory,
    ) -> Result<(), DatabaseError>;

    /// Link the email to a client.
    async fn link_email_client(&self, email_id: &str, client_id: &str)
    -> Result<(), DatabaseError>;

    // ── Analyses ────────────────────────────────────────────────────

    /// Write the analysis for `email_id`, replacing any previous one, and
    /// stamp the email's `analyzed_at`. Both writes happen atomically.
    async fn upsert_analysis(
        &self,
        email_id: &str,
        analysis: &AggregatedAnalysis,
    ) -> Result<(), DatabaseError>;

    async fn get_analysis(&self, email_id: &str) -> Result<Option<StoredAnalysis>, DatabaseError>;

    // ── Actions ─────────────────────────────────────────────────────

    /// Store the action for `action.email_id`. An email holds at most one
    /// action: a second insert refreshes the extracted fields of the existing
    /// record and keeps its id, status and creation time. Returns the id of
    /// the stored record.
    async fn insert_action(&self, action: &ActionRecord) -> Result<Uuid, DatabaseError>;

    async fn list_actions_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<ActionRecord>, DatabaseError>;
}
