use super::response::{
    PreferenceExtraction, ProposedEvent, ReplyDraft, ThreadClassification, ThreadSummary,
};
use super::traits::{GenerationProvider, format_thread};
use crate::config::{IdentityConfig, ProviderConfig};
use crate::mail::{DraftingPreferences, Email};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const CLASSIFIER_INSTRUCTIONS: &str = r#"You estimate how an email should be triaged.
Reply with JSON containing these keys only:
{
  "needs_summary": number 0-1,
  "needs_draft": number 0-1,
  "needs_schedule": number 0-1
}
Each value is the probability the action is useful.
Use these guidelines:
- needs_summary: likelihood the email thread benefits from a concise recap.
- needs_draft: likelihood the recipient must answer soon and would appreciate a suggested reply.
- needs_schedule: likelihood there is a meeting or time-sensitive event to add to the calendar.
Consider subject, body, sender, recipients, and timing for your reasoning."#;

const SUMMARIZER_INSTRUCTIONS: &str = r#"You're an email summarizer. You'll receive an email or thread of emails.
Summarize the information to the email receiver.
Address the user as if you were reading the summary of their email inbox to them.
Reply with JSON containing only these keys:
{
  "summary": summary of the email/thread
}"#;

const DRAFTER_INSTRUCTIONS: &str = r#"You write helpful reply drafts for incoming emails. Do not add placeholders or extra comments, your draft will be sent directly.
Assume the last message in the thread is the one that needs a response.
If a "User writing preferences" section is provided, incorporate every preference faithfully.
Reply with JSON containing only these keys:
{
  "to": string of comma-separated recipients (this should include the sender of the email you're responding to),
  "subject": subject line for the reply,
  "body": body text of the reply email
}
Keep the tone polite and concise unless instructed otherwise by the preferences."#;

const SCHEDULER_INSTRUCTIONS: &str = r#"You help schedule follow-up meetings or tasks triggered by incoming emails.
Reply with JSON using only these keys:
{
  "title": string describing the event,
  "proposed_time": ISO-8601 timestamp for the suggested time,
  "notes": optional string with additional context or next steps
}
If timing is unclear, suggest a reasonable default and explain in notes."#;

const PREFERENCE_INSTRUCTIONS: &str = r#"You analyse how a user modified an email draft suggested by another agent.
Return structured JSON with any inferred preferences for future drafts to the
same recipient. Only include a field when you can clearly infer a preference.
Fields:
- tone: overall tone preference (e.g. formal, casual)
- greeting: preferred opening (e.g. "Hi team", "Dear Alex")
- signature: preferred closing signature (e.g. "Best", "Thanks, Priya")
- length: short description of desired length (e.g. "concise", "detailed")
- extra_field: free-form notes for other reusable patterns"#;

/// OpenAI-compatible chat-completions client implementing every generation
/// capability by prompting with per-capability instructions and parsing a
/// strict-JSON reply.
pub struct OpenAiProvider {
    base_url: String,
    /// Pre-computed `"Bearer <key>"` header value (avoids `format!` per request).
    cached_auth_header: Option<String>,
    client: Client,
    model: String,
    temperature: f64,
    identity: IdentityConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(provider: &ProviderConfig, identity: IdentityConfig) -> Self {
        Self {
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            cached_auth_header: provider.api_key.as_deref().map(|k| format!("Bearer {k}")),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(std::time::Duration::from_secs(90))
                .build()
                .unwrap_or_else(|_| Client::new()),
            model: provider.model.clone(),
            temperature: provider.temperature,
            identity,
        }
    }

    async fn complete(&self, instructions: &str, input: &str) -> anyhow::Result<String> {
        let auth_header = self.cached_auth_header.as_ref().ok_or_else(|| {
            anyhow::anyhow!("provider API key not set; set provider.api_key in config.toml")
        })?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: instructions.to_string(),
                },
                Message {
                    role: "user",
                    content: input.to_string(),
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", auth_header)
            .json(&request)
            .send()
            .await
            .context("chat completion request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("chat completion API error {status}");
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("chat completion response JSON decode failed")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("empty chat completion response"))
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        instructions: &str,
        input: &str,
    ) -> anyhow::Result<T> {
        let text = self.complete(instructions, input).await?;
        parse_json_reply(&text)
    }

    fn draft_input(thread: &[Email], preferences: Option<&DraftingPreferences>) -> String {
        let thread_block = format_thread(thread);
        let Some(preferences) = preferences.filter(|p| !p.is_empty()) else {
            return thread_block;
        };

        let preference_block: Vec<String> = preferences
            .to_prompt_lines()
            .into_iter()
            .map(|line| format!("- {line}"))
            .collect();
        format!(
            "{thread_block}\n\nUser writing preferences:\n{}",
            preference_block.join("\n")
        )
    }

    fn summarize_input(&self, thread: &[Email]) -> String {
        format!(
            "{}\n\nUser's data:\nName: {}\nEmail: {}",
            format_thread(thread),
            self.identity.name,
            self.identity.email
        )
    }
}

/// Parse a model reply that should be a single JSON object, tolerating
/// surrounding prose and Markdown code fences.
fn parse_json_reply<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    let trimmed = text.trim();
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Ok(parsed);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end)
        && start < end
    {
        return serde_json::from_str(&trimmed[start..=end])
            .context("model reply contained malformed JSON");
    }
    anyhow::bail!("model reply contained no JSON object")
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn classify(&self, thread: &[Email]) -> anyhow::Result<ThreadClassification> {
        let classification: ThreadClassification = self
            .complete_json(CLASSIFIER_INSTRUCTIONS, &format_thread(thread))
            .await?;
        classification.validate()?;
        Ok(classification)
    }

    async fn summarize(&self, thread: &[Email]) -> anyhow::Result<ThreadSummary> {
        self.complete_json(SUMMARIZER_INSTRUCTIONS, &self.summarize_input(thread))
            .await
    }

    async fn draft(
        &self,
        thread: &[Email],
        preferences: Option<&DraftingPreferences>,
    ) -> anyhow::Result<ReplyDraft> {
        self.complete_json(DRAFTER_INSTRUCTIONS, &Self::draft_input(thread, preferences))
            .await
    }

    async fn propose_event(&self, thread: &[Email]) -> anyhow::Result<ProposedEvent> {
        self.complete_json(SCHEDULER_INSTRUCTIONS, &format_thread(thread))
            .await
    }

    async fn extract_preferences(
        &self,
        original_payload: &serde_json::Value,
        updated_payload: &serde_json::Value,
    ) -> anyhow::Result<PreferenceExtraction> {
        let input = format!(
            "The model draft was modified by the user.\n\
             Original model draft (JSON):\n{}\n\n\
             User-modified draft (JSON):\n{}\n\n\
             Identify reusable preferences gleaned from the user's edits.",
            serde_json::to_string_pretty(original_payload)?,
            serde_json::to_string_pretty(updated_payload)?,
        );
        self.complete_json(PREFERENCE_INSTRUCTIONS, &input).await
    }
}
