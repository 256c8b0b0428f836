//! libSQL backend — async `AnalysisStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analyzers::{ActionType, EmailCategory};
use crate::error::DatabaseError;
use crate::pipeline::types::{AggregatedAnalysis, EmailItem};
use crate::store::migrations;
use crate::store::traits::{
    ActionRecord, ActionStatus, AnalysisStore, StoredAnalysis, StoredEmail,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_integer(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a StoredEmail.
///
/// Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<StoredEmail, DatabaseError> {
    let labels_str: String = row.get(6).unwrap_or_else(|_| "[]".into());
    let received_str: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
    let analyzed_str: Option<String> = row.get(8).ok();
    let category_str: Option<String> = row.get(9).ok();

    let labels: Vec<String> = serde_json::from_str(&labels_str)
        .map_err(|e| DatabaseError::Serialization(format!("email labels: {e}")))?;

    let email = EmailItem {
        id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
        subject: row.get(1).ok(),
        snippet: row.get(2).ok(),
        body: row.get(3).ok(),
        sender_email: row
            .get(4)
            .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
        sender_name: row.get(5).ok(),
        labels,
        received_at: parse_datetime(&received_str),
        analyzed_at: parse_optional_datetime(&analyzed_str),
    };

    Ok(StoredEmail {
        email,
        category: category_str.and_then(|s| s.parse().ok()),
        client_id: row.get(10).ok(),
    })
}

/// Map a libsql Row to an ActionRecord.
///
/// Column order matches ACTION_COLUMNS.
fn row_to_action(row: &libsql::Row) -> Result<ActionRecord, DatabaseError> {
    let get_text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("action row parse: {e}")))
    };

    let id_str = get_text(0)?;
    let action_type_str = get_text(3)?;
    let deadline_str: Option<String> = row.get(7).ok();
    let status_str = get_text(9)?;
    let created_str = get_text(10)?;

    Ok(ActionRecord {
        id: id_str
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("action id '{id_str}': {e}")))?,
        email_id: get_text(1)?,
        user_id: get_text(2)?,
        action_type: action_type_str
            .parse::<ActionType>()
            .map_err(DatabaseError::Serialization)?,
        title: get_text(4)?,
        description: row.get(5).ok(),
        urgency_score: row.get::<i64>(6).unwrap_or(0).clamp(0, 10) as u8,
        deadline: parse_optional_datetime(&deadline_str),
        estimated_minutes: row.get::<i64>(8).ok().map(|m| m.max(0) as u32),
        status: ActionStatus::from_db(&status_str),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const EMAIL_COLUMNS: &str = "id, subject, snippet, body, sender_email, sender_name, labels, received_at, analyzed_at, category, client_id";

const ACTION_COLUMNS: &str = "id, email_id, user_id, action_type, title, description, urgency_score, deadline, estimated_minutes, status, created_at";

#[async_trait]
impl AnalysisStore for LibSqlBackend {
    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: &EmailItem) -> Result<(), DatabaseError> {
        let labels = serde_json::to_string(&email.labels)
            .map_err(|e| DatabaseError::Serialization(format!("email labels: {e}")))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO emails (id, subject, snippet, body, sender_email, sender_name,
                    labels, received_at, analyzed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT (id) DO UPDATE SET
                    subject = ?2, snippet = ?3, body = ?4, sender_email = ?5,
                    sender_name = ?6, labels = ?7, received_at = ?8, updated_at = ?10",
                params![
                    email.id.clone(),
                    opt_text(email.subject.as_deref()),
                    opt_text(email.snippet.as_deref()),
                    opt_text(email.body.as_deref()),
                    email.sender_email.clone(),
                    opt_text(email.sender_name.as_deref()),
                    labels,
                    email.received_at.to_rfc3339(),
                    opt_text(email.analyzed_at.map(|t| t.to_rfc3339()).as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_email: {e}")))?;

        debug!(email_id = %email.id, "Email stored");
        Ok(())
    }

    async fn get_email(&self, id: &str) -> Result<Option<StoredEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_email(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn get_unanalyzed_emails(&self, limit: usize) -> Result<Vec<EmailItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails WHERE analyzed_at IS NULL
                     ORDER BY received_at ASC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_unanalyzed_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(stored) => emails.push(stored.email),
                Err(e) => {
                    tracing::warn!("Skipping email row: {e}");
                }
            }
        }
        Ok(emails)
    }

    async fn update_email_category(
        &self,
        email_id: &str,
        category: EmailCategory,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE emails SET category = ?1, updated_at = ?2 WHERE id = ?3",
                params![category.as_str(), Utc::now().to_rfc3339(), email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_email_category: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".into(),
                id: email_id.to_string(),
            });
        }
        debug!(email_id, category = %category, "Email category updated");
        Ok(())
    }

    async fn link_email_client(
        &self,
        email_id: &str,
        client_id: &str,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE emails SET client_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![client_id, Utc::now().to_rfc3339(), email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("link_email_client: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".into(),
                id: email_id.to_string(),
            });
        }
        debug!(email_id, client_id, "Email linked to client");
        Ok(())
    }

    // ── Analyses ────────────────────────────────────────────────────

    async fn upsert_analysis(
        &self,
        email_id: &str,
        analysis: &AggregatedAnalysis,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(analysis)
            .map_err(|e| DatabaseError::Serialization(format!("analysis: {e}")))?;
        let category = analysis
            .categorization
            .as_ref()
            .map(|c| c.category.as_str());
        // The V4 triggers stamp `emails.analyzed_at` inside this statement,
        // so the row and the stamp land together or not at all.
        self.conn()
            .execute(
                "INSERT INTO email_analyses (email_id, analysis, category, total_tokens_used,
                    total_processing_time_ms, analyzer_version, analyzed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (email_id) DO UPDATE SET
                    analysis = ?2, category = ?3, total_tokens_used = ?4,
                    total_processing_time_ms = ?5, analyzer_version = ?6, analyzed_at = ?7",
                params![
                    email_id,
                    json,
                    opt_text(category),
                    analysis.total_tokens_used as i64,
                    analysis.total_processing_time_ms as i64,
                    analysis.analyzer_version.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_analysis: {e}")))?;

        debug!(
            email_id,
            tokens = analysis.total_tokens_used,
            "Analysis upserted"
        );
        Ok(())
    }

    async fn get_analysis(&self, email_id: &str) -> Result<Option<StoredAnalysis>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT email_id, analysis, analyzed_at FROM email_analyses WHERE email_id = ?1",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_analysis: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_analysis: {e}"))),
        };

        let json: String = row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("get_analysis row: {e}")))?;
        let analyzed_str: String = row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("get_analysis row: {e}")))?;
        let analysis: AggregatedAnalysis = serde_json::from_str(&json)
            .map_err(|e| DatabaseError::Serialization(format!("analysis: {e}")))?;

        Ok(Some(StoredAnalysis {
            email_id: row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("get_analysis row: {e}")))?,
            analysis,
            analyzed_at: parse_datetime(&analyzed_str),
        }))
    }

    // ── Actions ─────────────────────────────────────────────────────

    async fn insert_action(&self, action: &ActionRecord) -> Result<Uuid, DatabaseError> {
        let created = action.created_at.to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO actions (id, email_id, user_id, action_type, title, description,
                    urgency_score, deadline, estimated_minutes, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT (email_id) DO UPDATE SET
                    user_id = ?3, action_type = ?4, title = ?5, description = ?6,
                    urgency_score = ?7, deadline = ?8, estimated_minutes = ?9, updated_at = ?11
                 RETURNING id",
                params![
                    action.id.to_string(),
                    action.email_id.clone(),
                    action.user_id.clone(),
                    action.action_type.as_str(),
                    action.title.clone(),
                    opt_text(action.description.as_deref()),
                    action.urgency_score as i64,
                    opt_text(action.deadline.map(|d| d.to_rfc3339()).as_deref()),
                    opt_integer(action.estimated_minutes.map(i64::from)),
                    action.status.as_str(),
                    created,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_action: {e}")))?;

        let id_str: String = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("insert_action row: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "insert_action: no id returned".to_string(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("insert_action: {e}"))),
        };
        let id: Uuid = id_str
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("action id '{id_str}': {e}")))?;

        debug!(
            action_id = %id,
            email_id = %action.email_id,
            action_type = action.action_type.as_str(),
            replaced = id != action.id,
            "Action stored"
        );
        Ok(id)
    }

    async fn list_actions_for_email(
        &self,
        email_id: &str,
    ) -> Result<Vec<ActionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM actions WHERE email_id = ?1 ORDER BY created_at ASC"
                ),
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_actions_for_email: {e}")))?;

        let mut actions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_action(&row) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    tracing::warn!("Skipping action row: {e}");
                }
            }
        }
        Ok(actions)
    }
}
