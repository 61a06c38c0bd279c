use std::path::PathBuf;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `mailsift`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum MailsiftError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Semantic index ──────────────────────────────────────────────────
    #[error("index: {0}")]
    Index(#[from] IndexError),

    // ── Triage ──────────────────────────────────────────────────────────
    #[error("triage: {0}")]
    Triage(#[from] TriageError),

    // ── Conversational front end ────────────────────────────────────────
    #[error("chat: {0}")]
    Chat(#[from] ChatError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Storage errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    /// Duplicate email identifiers are an integrity error, never a no-op.
    #[error("email {mail_id} already exists")]
    DuplicateEmail { mail_id: String },

    /// A summary may only be attached to a thread that has stored emails.
    #[error("thread {thread_id} has no stored emails")]
    UnknownThread { thread_id: String },

    #[error("action {action_id} not found")]
    ActionNotFound { action_id: String },

    /// Action payloads are JSON objects; anything else is rejected on modify.
    #[error("action payload must be a JSON object")]
    MalformedPayload,

    #[error("stored row could not be decoded: {0}")]
    Decode(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlx: {0}")]
    Sqlx(#[from] sqlx::Error),
}

// ─── Semantic index errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IndexError {
    /// A saved index is two artifacts; a missing one is an error, not an
    /// empty index.
    #[error("missing index artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("index artifacts are inconsistent: {0}")]
    Corrupt(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

// ─── Triage errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("decision threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("classification probability out of range: {name} = {value}")]
    InvalidProbability { name: &'static str, value: f64 },
}

// ─── Conversational front-end errors ────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("at least one non-empty message is required")]
    EmptyTranscript,
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MailsiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_mail_id() {
        let err = MailsiftError::Store(StoreError::DuplicateEmail {
            mail_id: "m-1".into(),
        });
        assert!(err.to_string().contains("m-1"));
    }

    #[test]
    fn triage_threshold_displays_value() {
        let err = MailsiftError::Triage(TriageError::InvalidThreshold(1.5));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: MailsiftError = anyhow_err.into();
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn index_missing_artifact_displays_path() {
        let err = MailsiftError::Index(IndexError::MissingArtifact(PathBuf::from(
            "/tmp/idx/meta.json",
        )));
        assert!(err.to_string().contains("meta.json"));
    }

    #[test]
    fn store_error_downcasts_through_anyhow() {
        let err = anyhow::Error::from(StoreError::MalformedPayload);
        assert!(err.downcast_ref::<StoreError>().is_some());
    }
}
