use crate::error::StoreError;
use crate::index::SemanticIndex;
use crate::mail::{Action, ActionStatus, ActionType, Email, RecipientPreference, Summary};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS emails (
        mail_id     TEXT PRIMARY KEY,
        external_id TEXT,
        thread_id   TEXT NOT NULL,
        from_name   TEXT,
        from_email  TEXT NOT NULL,
        \"to\"      TEXT NOT NULL,
        \"cc\"      TEXT NOT NULL,
        subject     TEXT,
        body        TEXT NOT NULL,
        received_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_emails_thread ON emails(thread_id, received_at);

    CREATE TABLE IF NOT EXISTS actions (
        action_id TEXT PRIMARY KEY,
        mail_id   TEXT,
        type      TEXT NOT NULL CHECK (type IN ('send_email','create_event')),
        status    TEXT NOT NULL CHECK (status IN ('pending','confirmed','rejected','modified','executed','failed')),
        payload   TEXT NOT NULL,
        result    TEXT,
        FOREIGN KEY (mail_id) REFERENCES emails(mail_id)
    );

    CREATE TABLE IF NOT EXISTS action_preferences (
        preference_id    TEXT PRIMARY KEY,
        recipient_email  TEXT NOT NULL,
        preference_key   TEXT NOT NULL,
        preference_value TEXT NOT NULL,
        source_action_id TEXT,
        UNIQUE(recipient_email, preference_key),
        FOREIGN KEY (source_action_id) REFERENCES actions(action_id)
    );

    CREATE TABLE IF NOT EXISTS general_preferences (
        preference_key   TEXT PRIMARY KEY,
        preference_value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS summaries (
        summary_id TEXT PRIMARY KEY,
        thread_id  TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
";

/// SQLite-backed store for emails, actions, preferences, and summaries.
///
/// Writes are serialized by the connection pool; every field update carries a
/// full intended value, so last-write-wins is acceptable for racing updates
/// to the same record. When an index is attached, email insertion keeps it in
/// sync best-effort: an index failure is logged and swallowed, never allowed
/// to block the primary storage path.
pub struct MailStore {
    pool: SqlitePool,
    index: Option<Arc<SemanticIndex>>,
}

impl MailStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool, index: None })
    }

    /// Attach the semantic index kept in sync with inserted emails.
    #[must_use]
    pub fn with_index(mut self, index: Arc<SemanticIndex>) -> Self {
        self.index = Some(index);
        self
    }

    // ── Emails ───────────────────────────────────────────────────

    /// Insert an email. A duplicate identifier is an integrity error.
    pub async fn insert_email(&self, email: &Email) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO emails (mail_id, external_id, thread_id, from_name, from_email, \"to\", \"cc\", subject, body, received_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&email.mail_id)
        .bind(&email.external_id)
        .bind(&email.thread_id)
        .bind(&email.from_name)
        .bind(&email.from_email)
        .bind(serde_json::to_string(&email.to)?)
        .bind(serde_json::to_string(&email.cc)?)
        .bind(&email.subject)
        .bind(&email.body)
        .bind(email.received_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                return Err(StoreError::DuplicateEmail {
                    mail_id: email.mail_id.clone(),
                });
            }
            Err(error) => return Err(error.into()),
        }

        self.notify_index(email).await;
        Ok(())
    }

    async fn notify_index(&self, email: &Email) {
        let Some(index) = &self.index else { return };
        if let Err(error) = index.add(std::slice::from_ref(email)).await {
            tracing::warn!(mail_id = %email.mail_id, %error, "semantic index update failed");
        }
    }

    pub async fn fetch_email(&self, mail_id: &str) -> Result<Option<Email>, StoreError> {
        let row = sqlx::query("SELECT * FROM emails WHERE mail_id = ?")
            .bind(mail_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_email).transpose()
    }

    pub async fn fetch_emails_for_thread(&self, thread_id: &str) -> Result<Vec<Email>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM emails WHERE thread_id = ? ORDER BY received_at ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_email).collect()
    }

    /// The full thread containing the given email, or empty when unknown.
    pub async fn fetch_thread_by_mail_id(&self, mail_id: &str) -> Result<Vec<Email>, StoreError> {
        match self.fetch_email(mail_id).await? {
            Some(email) => self.fetch_emails_for_thread(&email.thread_id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn fetch_all_emails(&self) -> Result<Vec<Email>, StoreError> {
        let rows = sqlx::query("SELECT * FROM emails ORDER BY received_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_email).collect()
    }

    // ── Actions ──────────────────────────────────────────────────

    pub async fn insert_action(&self, action: &Action) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO actions (action_id, mail_id, type, status, payload, result)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&action.action_id)
        .bind(&action.mail_id)
        .bind(action.kind.as_str())
        .bind(action.status.as_str())
        .bind(serde_json::to_string(&action.payload)?)
        .bind(
            action
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update any subset of status/payload/result. Passing nothing is a
    /// no-op.
    pub async fn update_action(
        &self,
        action_id: &str,
        status: Option<ActionStatus>,
        payload: Option<&serde_json::Value>,
        result: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut assignments: Vec<&str> = Vec::new();
        if status.is_some() {
            assignments.push("status = ?");
        }
        if payload.is_some() {
            assignments.push("payload = ?");
        }
        if result.is_some() {
            assignments.push("result = ?");
        }
        if assignments.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE actions SET {} WHERE action_id = ?",
            assignments.join(", ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(payload) = payload {
            query = query.bind(serde_json::to_string(payload)?);
        }
        if let Some(result) = result {
            query = query.bind(serde_json::to_string(result)?);
        }
        query.bind(action_id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn fetch_action(&self, action_id: &str) -> Result<Option<Action>, StoreError> {
        let row = sqlx::query("SELECT * FROM actions WHERE action_id = ?")
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_action).transpose()
    }

    /// All actions proposed for one source email.
    pub async fn fetch_actions_for_mail(&self, mail_id: &str) -> Result<Vec<Action>, StoreError> {
        let rows = sqlx::query("SELECT * FROM actions WHERE mail_id = ? ORDER BY rowid")
            .bind(mail_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_action).collect()
    }

    // ── Preferences ──────────────────────────────────────────────

    /// Upsert a recipient-scoped preference; the recipient key is
    /// case-insensitive. Re-inserting overwrites both value and provenance.
    pub async fn upsert_action_preference(
        &self,
        recipient_email: &str,
        preference_key: &str,
        preference_value: &str,
        source_action_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO action_preferences (
                preference_id, recipient_email, preference_key, preference_value, source_action_id
             )
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(recipient_email, preference_key) DO UPDATE SET
                preference_value = excluded.preference_value,
                source_action_id = excluded.source_action_id",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(recipient_email.to_lowercase())
        .bind(preference_key)
        .bind(preference_value)
        .bind(source_action_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_preferences_for_recipient(
        &self,
        recipient_email: &str,
    ) -> Result<Vec<RecipientPreference>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM action_preferences WHERE recipient_email = ? ORDER BY preference_key",
        )
        .bind(recipient_email.to_lowercase())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RecipientPreference {
                    preference_id: row.try_get("preference_id")?,
                    recipient_email: row.try_get("recipient_email")?,
                    preference_key: row.try_get("preference_key")?,
                    preference_value: row.try_get("preference_value")?,
                    source_action_id: row.try_get("source_action_id")?,
                })
            })
            .collect()
    }

    pub async fn upsert_general_preference(
        &self,
        preference_key: &str,
        preference_value: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO general_preferences (preference_key, preference_value)
             VALUES (?, ?)
             ON CONFLICT(preference_key) DO UPDATE SET
                preference_value = excluded.preference_value",
        )
        .bind(preference_key)
        .bind(preference_value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_general_preferences(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT preference_key, preference_value FROM general_preferences")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("preference_key")?,
                    row.try_get("preference_value")?,
                ))
            })
            .collect()
    }

    // ── Summaries ────────────────────────────────────────────────

    /// Insert a summary. The thread must already have at least one stored
    /// email; anything else is an integrity error and nothing is written.
    pub async fn insert_summary(&self, summary: &Summary) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM emails WHERE thread_id = ? LIMIT 1")
            .bind(&summary.thread_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::UnknownThread {
                thread_id: summary.thread_id.clone(),
            });
        }

        sqlx::query(
            "INSERT INTO summaries (summary_id, thread_id, text, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&summary.summary_id)
        .bind(&summary.thread_id)
        .bind(&summary.text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_summary(&self, summary_id: &str) -> Result<Option<Summary>, StoreError> {
        let row = sqlx::query("SELECT * FROM summaries WHERE summary_id = ?")
            .bind(summary_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Summary {
                summary_id: row.try_get("summary_id")?,
                thread_id: row.try_get("thread_id")?,
                text: row.try_get("text")?,
            })
        })
        .transpose()
    }

    pub async fn fetch_summaries_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<Summary>, StoreError> {
        let rows = sqlx::query("SELECT * FROM summaries WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Summary {
                    summary_id: row.try_get("summary_id")?,
                    thread_id: row.try_get("thread_id")?,
                    text: row.try_get("text")?,
                })
            })
            .collect()
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_error| db_error.is_unique_violation())
}

fn row_to_email(row: &SqliteRow) -> Result<Email, StoreError> {
    let to_raw: String = row.try_get("to")?;
    let cc_raw: String = row.try_get("cc")?;
    let received_raw: String = row.try_get("received_at")?;
    let received_at = DateTime::parse_from_rfc3339(&received_raw)
        .map_err(|e| StoreError::Decode(format!("received_at {received_raw:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(Email {
        mail_id: row.try_get("mail_id")?,
        external_id: row.try_get("external_id")?,
        thread_id: row.try_get("thread_id")?,
        from_name: row.try_get("from_name")?,
        from_email: row.try_get("from_email")?,
        to: serde_json::from_str(&to_raw)?,
        cc: serde_json::from_str(&cc_raw)?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        received_at,
    })
}

fn row_to_action(row: &SqliteRow) -> Result<Action, StoreError> {
    let kind_raw: String = row.try_get("type")?;
    let status_raw: String = row.try_get("status")?;
    let payload_raw: String = row.try_get("payload")?;
    let result_raw: Option<String> = row.try_get("result")?;

    Ok(Action {
        action_id: row.try_get("action_id")?,
        mail_id: row.try_get("mail_id")?,
        kind: ActionType::from_str(&kind_raw).map_err(|e| StoreError::Decode(e.to_string()))?,
        status: ActionStatus::from_str(&status_raw)
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        payload: serde_json::from_str(&payload_raw)?,
        result: result_raw.as_deref().map(serde_json::from_str).transpose()?,
    })
}
