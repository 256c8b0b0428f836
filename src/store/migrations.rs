//! Schema migrations for the libSQL backend.
//!
//! Steps are numbered and recorded in `_migrations`. Each step runs in its
//! own transaction together with its bookkeeping row, so a failed step leaves
//! the database at the previous version.

use libsql::Connection;
use tracing::{debug, info};

use crate::error::DatabaseError;

struct Step {
    version: i64,
    name: &'static str,
    ddl: &'static str,
}

/// Append only. Never edit a step that has shipped.
const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "emails_and_analyses",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY,
                subject TEXT,
                snippet TEXT,
                body TEXT,
                sender_email TEXT NOT NULL,
                sender_name TEXT,
                labels TEXT NOT NULL DEFAULT '[]',
                received_at TEXT NOT NULL,
                analyzed_at TEXT,
                category TEXT,
                client_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_emails_analyzed_at ON emails(analyzed_at);
            CREATE INDEX IF NOT EXISTS idx_emails_received_at ON emails(received_at);

            CREATE TABLE IF NOT EXISTS email_analyses (
                email_id TEXT PRIMARY KEY,
                analysis TEXT NOT NULL,
                category TEXT,
                total_tokens_used INTEGER NOT NULL DEFAULT 0,
                total_processing_time_ms INTEGER NOT NULL DEFAULT 0,
                analyzer_version TEXT NOT NULL,
                analyzed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_analyses_category ON email_analyses(category);
        "#,
    },
    Step {
        version: 2,
        name: "actions",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                email_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                urgency_score INTEGER NOT NULL DEFAULT 0,
                deadline TEXT,
                estimated_minutes INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actions_email ON actions(email_id);
            CREATE INDEX IF NOT EXISTS idx_actions_user_status ON actions(user_id, status);
        "#,
    },
    Step {
        version: 3,
        name: "one_action_per_email",
        ddl: r#"
            DELETE FROM actions
             WHERE rowid NOT IN (SELECT MIN(rowid) FROM actions GROUP BY email_id);
            DROP INDEX IF EXISTS idx_actions_email;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_email_unique ON actions(email_id);
        "#,
    },
    Step {
        version: 4,
        name: "analysis_stamps_email",
        ddl: r#"
            CREATE TRIGGER IF NOT EXISTS trg_email_analyses_insert_stamp
            AFTER INSERT ON email_analyses
            BEGIN
                UPDATE emails SET analyzed_at = NEW.analyzed_at, updated_at = NEW.analyzed_at
                 WHERE id = NEW.email_id;
            END;

            CREATE TRIGGER IF NOT EXISTS trg_email_analyses_update_stamp
            AFTER UPDATE OF analyzed_at ON email_analyses
            BEGIN
                UPDATE emails SET analyzed_at = NEW.analyzed_at, updated_at = NEW.analyzed_at
                 WHERE id = NEW.email_id;
            END;
        "#,
    },
];

/// Newest schema version this build knows about.
pub fn latest_version() -> i64 {
    STEPS.last().map_or(0, |s| s.version)
}

/// Bring the schema up to [`latest_version`].
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let from = schema_version(conn).await?;
    let pending: Vec<&Step> = STEPS.iter().filter(|s| s.version > from).collect();
    if pending.is_empty() {
        debug!(version = from, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        info!(version = step.version, name = step.name, "Applying migration");
        apply(conn, step).await?;
    }

    info!(from, to = latest_version(), "Database migrations complete");
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema_version: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema_version: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("schema_version: {e}"))),
        None => Ok(0),
    }
}

async fn apply(conn: &Connection, step: &Step) -> Result<(), DatabaseError> {
    let failed = |e: libsql::Error| {
        DatabaseError::Migration(format!("V{} ({}): {e}", step.version, step.name))
    };

    let tx = conn.transaction().await.map_err(failed)?;
    tx.execute_batch(step.ddl).await.map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        libsql::params![step.version, step.name, chrono::Utc::now().to_rfc3339()],
    )
    .await
    .map_err(failed)?;
    tx.commit().await.map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, table: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                libsql::params![table],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get::<i64>(0).unwrap() == 1
    }

    #[tokio::test]
    async fn fresh_database_reaches_latest() {
        let conn = fresh().await;
        run_migrations(&conn).await.unwrap();

        assert_eq!(schema_version(&conn).await.unwrap(), latest_version());
        for table in ["emails", "email_analyses", "actions", "_migrations"] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let conn = fresh().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM _migrations", ())
            .await
            .unwrap();
        let applied: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(applied, STEPS.len() as i64);
    }

    #[tokio::test]
    async fn only_newer_steps_are_applied() {
        let conn = fresh().await;
        run_migrations(&conn).await.unwrap();
        conn.execute("DROP TABLE actions", ()).await.unwrap();
        conn.execute("DELETE FROM _migrations WHERE version >= 2", ())
            .await
            .unwrap();
        assert_eq!(schema_version(&conn).await.unwrap(), 1);

        run_migrations(&conn).await.unwrap();

        assert!(table_exists(&conn, "actions").await);
        let mut rows = conn
            .query("SELECT name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        assert_eq!(
            names,
            vec![
                "emails_and_analyses",
                "actions",
                "one_action_per_email",
                "analysis_stamps_email"
            ]
        );
    }

    #[tokio::test]
    async fn unique_action_step_collapses_existing_duplicates() {
        let conn = fresh().await;
        run_migrations(&conn).await.unwrap();
        conn.execute("DROP INDEX idx_actions_email_unique", ())
            .await
            .unwrap();
        conn.execute("DELETE FROM _migrations WHERE version >= 3", ())
            .await
            .unwrap();
        for id in ["a1", "a2", "a3"] {
            conn.execute(
                "INSERT INTO actions (id, email_id, user_id, action_type, title, created_at, updated_at)
                 VALUES (?1, 'e1', 'u1', 'respond', 'Reply', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                libsql::params![id],
            )
            .await
            .unwrap();
        }

        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT id FROM actions WHERE email_id = 'e1'", ())
            .await
            .unwrap();
        let kept: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(kept, "a1");
        assert!(rows.next().await.unwrap().is_none());

        let duplicate = conn
            .execute(
                "INSERT INTO actions (id, email_id, user_id, action_type, title, created_at, updated_at)
                 VALUES ('a4', 'e1', 'u1', 'respond', 'Reply', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                (),
            )
            .await;
        assert!(duplicate.is_err());
    }
}
