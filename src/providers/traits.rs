use super::response::{
    PreferenceExtraction, ProposedEvent, ReplyDraft, ThreadClassification, ThreadSummary,
};
use crate::mail::{DraftingPreferences, Email};
use async_trait::async_trait;

/// Render one email the way every capability prompt sees it.
pub fn format_email(email: &Email) -> String {
    let to_addresses = if email.to.is_empty() {
        "(not provided)".to_string()
    } else {
        email.to.join(", ")
    };
    let cc_addresses = if email.cc.is_empty() {
        "(none)".to_string()
    } else {
        email.cc.join(", ")
    };
    let subject = email.subject.as_deref().unwrap_or("(no subject)");
    let sender = match &email.from_name {
        Some(name) => format!("{name} <{}>", email.from_email),
        None => email.from_email.clone(),
    };
    format!(
        "From: {sender}\n\
         To: {to_addresses}\n\
         Cc: {cc_addresses}\n\
         Subject: {subject}\n\
         Received: {received}\n\
         Body:\n{body}\n",
        received = email.received_at.to_rfc3339(),
        body = email.body,
    )
}

/// Render a whole thread, oldest first, flagging the final message of a
/// multi-message thread as the one that needs attention. An empty thread
/// renders a fixed "no information available" line so capabilities never
/// receive an empty prompt.
pub fn format_thread(emails: &[Email]) -> String {
    if emails.is_empty() {
        return "No emails were provided in this thread.\n".to_string();
    }

    let total = emails.len();
    let parts: Vec<String> = emails
        .iter()
        .enumerate()
        .map(|(index, email)| {
            let label = if total > 1 && index + 1 == total {
                "Latest message".to_string()
            } else {
                format!("Message {}", index + 1)
            };
            format!("--- {label} ---\n{}", format_email(email))
        })
        .collect();

    parts.join("\n\n")
}

/// The generation capabilities consumed by the dispatcher, review surface,
/// and conversational front end. Each method is a pure function from a
/// thread snapshot (plus optional hints) to a typed result; test doubles
/// substitute deterministic fixtures.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Estimate how the thread should be triaged.
    async fn classify(&self, thread: &[Email]) -> anyhow::Result<ThreadClassification>;

    /// Recap the thread for its owner.
    async fn summarize(&self, thread: &[Email]) -> anyhow::Result<ThreadSummary>;

    /// Suggest a reply to the latest message, honoring preferences when given.
    async fn draft(
        &self,
        thread: &[Email],
        preferences: Option<&DraftingPreferences>,
    ) -> anyhow::Result<ReplyDraft>;

    /// Propose a calendar event triggered by the thread.
    async fn propose_event(&self, thread: &[Email]) -> anyhow::Result<ProposedEvent>;

    /// Derive reusable writing preferences from an original/edited payload
    /// pair.
    async fn extract_preferences(
        &self,
        original_payload: &serde_json::Value,
        updated_payload: &serde_json::Value,
    ) -> anyhow::Result<PreferenceExtraction>;
}
