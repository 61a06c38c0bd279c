use crate::error::ChatError;
use serde::{Deserialize, Serialize};

/// One role-tagged turn of a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Render a transcript as `role: content` lines, skipping empty turns. At
/// least one non-empty message is required.
pub fn format_transcript(messages: &[ChatMessage]) -> Result<String, ChatError> {
    let lines: Vec<String> = messages
        .iter()
        .filter_map(|message| {
            let content = message.content.trim();
            if content.is_empty() {
                return None;
            }
            let role = message.role.trim().to_lowercase();
            let role = if role.is_empty() { "user".to_string() } else { role };
            Some(format!("{role}: {content}"))
        })
        .collect();

    if lines.is_empty() {
        return Err(ChatError::EmptyTranscript);
    }
    Ok(lines.join("\n"))
}
