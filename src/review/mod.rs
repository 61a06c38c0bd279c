use crate::config::IdentityConfig;
use crate::error::StoreError;
use crate::mail::{Action, ActionStatus, ActionType, Email};
use crate::providers::GenerationProvider;
use crate::store::MailStore;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Where preferences extracted from a modification should be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceScope {
    General,
    Recipient,
}

/// The approve/reject/modify surface over a single action identifier.
///
/// The sender identity used when a reviewed draft becomes an outbound email
/// is explicit configuration, never ambient environment state.
pub struct ActionReview {
    store: Arc<MailStore>,
    provider: Arc<dyn GenerationProvider>,
    identity: IdentityConfig,
}

impl ActionReview {
    pub fn new(
        store: Arc<MailStore>,
        provider: Arc<dyn GenerationProvider>,
        identity: IdentityConfig,
    ) -> Self {
        Self {
            store,
            provider,
            identity,
        }
    }

    /// Approve: mark executed and, for send-type actions, materialize the
    /// outbound email into the same thread.
    pub async fn approve(&self, action_id: &str) -> anyhow::Result<Action> {
        let mut action = self.fetch_required(action_id).await?;
        self.store
            .update_action(action_id, Some(ActionStatus::Executed), None, None)
            .await?;
        action.status = ActionStatus::Executed;
        let payload = action.payload.clone();
        self.store_sent_email(&action, &payload).await;
        Ok(action)
    }

    pub async fn reject(&self, action_id: &str) -> anyhow::Result<Action> {
        let mut action = self.fetch_required(action_id).await?;
        self.store
            .update_action(action_id, Some(ActionStatus::Rejected), None, None)
            .await?;
        action.status = ActionStatus::Rejected;
        Ok(action)
    }

    /// Modify-with-resend: store the edited payload, execute, materialize the
    /// outbound email from the *edited* payload, then derive and store
    /// preferences from the original/edited diff per the caller's scope.
    pub async fn modify(
        &self,
        action_id: &str,
        updated_payload: Value,
        scope: PreferenceScope,
    ) -> anyhow::Result<Action> {
        if !updated_payload.is_object() {
            return Err(StoreError::MalformedPayload.into());
        }

        let mut action = self.fetch_required(action_id).await?;
        let original_payload = action.payload.clone();

        self.store
            .update_action(
                action_id,
                Some(ActionStatus::Executed),
                Some(&updated_payload),
                None,
            )
            .await?;
        action.payload = updated_payload.clone();
        action.status = ActionStatus::Executed;

        self.store_sent_email(&action, &updated_payload).await;
        self.record_preferences(&action, &original_payload, &updated_payload, scope)
            .await?;
        Ok(action)
    }

    async fn fetch_required(&self, action_id: &str) -> anyhow::Result<Action> {
        self.store
            .fetch_action(action_id)
            .await?
            .ok_or_else(|| {
                StoreError::ActionNotFound {
                    action_id: action_id.to_string(),
                }
                .into()
            })
    }

    /// Best-effort: the status change has already committed, so failures
    /// here are logged and swallowed.
    async fn store_sent_email(&self, action: &Action, payload: &Value) {
        if action.kind != ActionType::SendEmail {
            return;
        }
        let Some(original_mail_id) = &action.mail_id else {
            return;
        };

        let payload = match payload.as_object() {
            Some(object) => object.clone(),
            None => {
                warn!(action_id = %action.action_id, "ignoring non-object payload");
                serde_json::Map::new()
            }
        };

        let original_email = match self.store.fetch_email(original_mail_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                warn!(
                    action_id = %action.action_id,
                    mail_id = %original_mail_id,
                    "unable to store sent email: source mail not found"
                );
                return;
            }
            Err(error) => {
                warn!(action_id = %action.action_id, %error, "unable to load source mail");
                return;
            }
        };

        let sent_email = Email {
            mail_id: Uuid::new_v4().to_string(),
            external_id: None,
            thread_id: original_email.thread_id,
            from_name: Some(self.identity.name.clone()),
            from_email: self.identity.email.clone(),
            to: normalize_recipients(payload.get("to")),
            cc: normalize_recipients(payload.get("cc")),
            subject: payload
                .get("subject")
                .and_then(Value::as_str)
                .map(str::to_string),
            body: payload
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            received_at: Utc::now(),
        };

        if let Err(error) = self.store.insert_email(&sent_email).await {
            warn!(action_id = %action.action_id, %error, "failed to store sent email");
        }
    }

    async fn record_preferences(
        &self,
        action: &Action,
        original_payload: &Value,
        updated_payload: &Value,
        scope: PreferenceScope,
    ) -> anyhow::Result<()> {
        if action.kind != ActionType::SendEmail {
            return Ok(());
        }

        let extraction = self
            .provider
            .extract_preferences(original_payload, updated_payload)
            .await?;
        if extraction.is_empty() {
            return Ok(());
        }
        let pairs = extraction.into_pairs();

        match scope {
            PreferenceScope::General => {
                for (key, value) in &pairs {
                    self.store.upsert_general_preference(key, value).await?;
                }
            }
            PreferenceScope::Recipient => {
                let recipients = extract_recipient_emails(updated_payload.get("to"));
                if recipients.is_empty() {
                    return Ok(());
                }
                for recipient in &recipients {
                    for (key, value) in &pairs {
                        self.store
                            .upsert_action_preference(recipient, key, value, Some(&action.action_id))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Recipients from a payload field: a JSON list of strings or one
/// comma-separated string.
fn normalize_recipients(raw: Option<&Value>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let candidates: Vec<String> = match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(joined) => joined.split(',').map(str::to_string).collect(),
        _ => return Vec::new(),
    };

    candidates
        .iter()
        .map(|candidate| candidate.trim())
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string)
        .collect()
}

fn extract_recipient_emails(raw: Option<&Value>) -> Vec<String> {
    normalize_recipients(raw)
        .into_iter()
        .map(|address| address.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_from_comma_separated_string() {
        let raw = serde_json::json!("sam@example.com, casey@example.com ,");
        assert_eq!(
            normalize_recipients(Some(&raw)),
            vec!["sam@example.com", "casey@example.com"]
        );
    }

    #[test]
    fn recipients_from_list() {
        let raw = serde_json::json!(["sam@example.com", " casey@example.com "]);
        assert_eq!(
            normalize_recipients(Some(&raw)),
            vec!["sam@example.com", "casey@example.com"]
        );
    }

    #[test]
    fn recipients_from_missing_or_odd_values() {
        assert!(normalize_recipients(None).is_empty());
        assert!(normalize_recipients(Some(&serde_json::json!(42))).is_empty());
        assert!(normalize_recipients(Some(&serde_json::json!(""))).is_empty());
    }

    #[test]
    fn extracted_recipients_are_lowercased() {
        let raw = serde_json::json!("Sam@Example.COM");
        assert_eq!(extract_recipient_emails(Some(&raw)), vec!["sam@example.com"]);
    }
}
