use crate::error::TriageError;
use serde::{Deserialize, Serialize};

/// Per-thread triage probabilities, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreadClassification {
    pub needs_summary: f64,
    pub needs_draft: f64,
    pub needs_schedule: f64,
}

impl ThreadClassification {
    pub fn validate(&self) -> Result<(), TriageError> {
        for (name, value) in [
            ("needs_summary", self.needs_summary),
            ("needs_draft", self.needs_draft),
            ("needs_schedule", self.needs_schedule),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TriageError::InvalidProbability { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub summary: String,
}

/// A suggested reply, the payload of a `send_email` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyDraft {
    /// Comma-separated recipients, including the sender being replied to
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// A suggested calendar entry, the payload of a `create_event` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedEvent {
    pub title: String,
    /// ISO-8601 timestamp for the suggested time
    pub proposed_time: String,
    #[serde(default)]
    pub notes: String,
}

/// Sparse writing preferences inferred from a user's edit of a draft.
/// Only fields with a clearly inferable preference are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceExtraction {
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub length: Option<String>,
    #[serde(default)]
    pub extra_field: Option<String>,
}

impl PreferenceExtraction {
    /// The populated fields as (key, value) pairs in declaration order.
    #[must_use]
    pub fn into_pairs(self) -> Vec<(String, String)> {
        [
            ("tone", self.tone),
            ("greeting", self.greeting),
            ("signature", self.signature),
            ("length", self.length),
            ("extra_field", self.extra_field),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tone.is_none()
            && self.greeting.is_none()
            && self.signature.is_none()
            && self.length.is_none()
            && self.extra_field.is_none()
    }
}
