use crate::chat::transcript::format_transcript;
use crate::index::SemanticIndex;
use crate::providers::{GenerationProvider, ProposedEvent, ReplyDraft};
use crate::store::MailStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub mod transcript;

pub use transcript::ChatMessage;

/// One email surfaced by semantic search, with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSource {
    pub mail_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub snippet: String,
    pub score: f32,
}

/// A draft produced for one resolved thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDraft {
    pub mail_id: String,
    pub thread_id: String,
    pub draft: ReplyDraft,
}

/// An event proposal produced for one resolved thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub mail_id: String,
    pub thread_id: String,
    pub event: ProposedEvent,
}

/// What one conversational turn returns to the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationReply {
    pub answer: String,
    #[serde(default)]
    pub references: Vec<ConversationSource>,
    #[serde(default)]
    pub draft: Option<ReplyDraft>,
    #[serde(default)]
    pub event: Option<ProposedEvent>,
}

/// The tool surface a conversational turn may invoke, zero or more times.
/// An ambiguous reference is resolved via `search_emails` before drafting or
/// scheduling.
#[async_trait]
pub trait MailTools: Send + Sync {
    /// Retrieve candidate messages by meaning, so the caller can answer a
    /// query or pin down the right mail id.
    async fn search_emails(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationSource>>;

    /// Draft a reply for the thread containing `mail_id`. `None` when the
    /// mail id is unknown.
    async fn draft_reply(&self, mail_id: &str) -> anyhow::Result<Option<ThreadDraft>>;

    /// Propose a calendar event for the thread containing `mail_id`. `None`
    /// when the mail id is unknown.
    async fn schedule_event(&self, mail_id: &str) -> anyhow::Result<Option<ThreadEvent>>;
}

/// The opaque capability that turns a formatted transcript plus the tool
/// surface into a reply. Its internal reasoning is not modeled here; test
/// doubles script it.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn reply(
        &self,
        transcript: &str,
        tools: &dyn MailTools,
    ) -> anyhow::Result<ConversationReply>;
}

/// Turn-taking conversational front end over the stored mail corpus.
pub struct Responder {
    store: Arc<MailStore>,
    index: Arc<SemanticIndex>,
    provider: Arc<dyn GenerationProvider>,
    backend: Arc<dyn ChatBackend>,
}

impl Responder {
    pub fn new(
        store: Arc<MailStore>,
        index: Arc<SemanticIndex>,
        provider: Arc<dyn GenerationProvider>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            backend,
        }
    }

    /// Validate and format the transcript, then hand the turn to the
    /// backend. An all-empty transcript fails fast before any capability
    /// call.
    pub async fn respond(&self, messages: &[ChatMessage]) -> anyhow::Result<ConversationReply> {
        let prompt = format_transcript(messages)?;
        info!(messages = messages.len(), "conversational turn started");
        self.backend.reply(&prompt, self).await
    }
}

#[async_trait]
impl MailTools for Responder {
    async fn search_emails(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConversationSource>> {
        let hits = self.index.search(query, limit).await?;
        info!(query, sources = hits.len(), "search_emails tool invoked");
        Ok(hits
            .into_iter()
            .map(|hit| ConversationSource {
                mail_id: hit.record.mail_id,
                thread_id: hit.record.thread_id,
                subject: hit.record.subject,
                snippet: hit.record.snippet,
                score: hit.score,
            })
            .collect())
    }

    async fn draft_reply(&self, mail_id: &str) -> anyhow::Result<Option<ThreadDraft>> {
        let thread = self.store.fetch_thread_by_mail_id(mail_id).await?;
        let Some(latest) = thread.last() else {
            warn!(mail_id, "draft_reply could not find a thread");
            return Ok(None);
        };
        let thread_id = latest.thread_id.clone();

        let draft = self.provider.draft(&thread, None).await?;
        info!(mail_id, thread_id = %thread_id, "draft ready");
        Ok(Some(ThreadDraft {
            mail_id: mail_id.to_string(),
            thread_id,
            draft,
        }))
    }

    async fn schedule_event(&self, mail_id: &str) -> anyhow::Result<Option<ThreadEvent>> {
        let thread = self.store.fetch_thread_by_mail_id(mail_id).await?;
        let Some(latest) = thread.last() else {
            warn!(mail_id, "schedule_event could not find a thread");
            return Ok(None);
        };
        let thread_id = latest.thread_id.clone();

        let event = self.provider.propose_event(&thread).await?;
        info!(mail_id, thread_id = %thread_id, "proposed event ready");
        Ok(Some(ThreadEvent {
            mail_id: mail_id.to_string(),
            thread_id,
            event,
        }))
    }
}
