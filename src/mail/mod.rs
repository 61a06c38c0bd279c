use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single stored email. Immutable once persisted; thread membership is by
/// shared `thread_id`, ordering within a thread by `received_at` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub mail_id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub thread_id: String,
    #[serde(default)]
    pub from_name: Option<String>,
    pub from_email: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    CreateEvent,
}

impl ActionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::CreateEvent => "create_event",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "send_email" => Ok(Self::SendEmail),
            "create_event" => Ok(Self::CreateEvent),
            other => anyhow::bail!("invalid action type: {other}"),
        }
    }
}

/// Review lifecycle of a proposed action.
///
/// Created `Pending` by the dispatcher; `Executed` on approval or
/// modification-with-resend, `Rejected` on rejection. `Confirmed` and
/// `Failed` are reserved for external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Rejected,
    Modified,
    Executed,
    Failed,
}

impl ActionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Modified => "modified",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            "modified" => Ok(Self::Modified),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("invalid action status: {other}"),
        }
    }
}

/// A proposed, reviewable side effect awaiting or past human approval.
/// The payload is the sole editable surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    #[serde(default)]
    pub mail_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub status: ActionStatus,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub summary_id: String,
    pub thread_id: String,
    pub text: String,
}

/// A recipient-scoped preference, with provenance pointing at the action
/// whose modification produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientPreference {
    pub preference_id: String,
    pub recipient_email: String,
    pub preference_key: String,
    pub preference_value: String,
    #[serde(default)]
    pub source_action_id: Option<String>,
}

const NAMED_PREFERENCE_FIELDS: [&str; 5] =
    ["tone", "greeting", "signature", "length", "extra_field"];

/// Aggregated writing preferences applied when drafting replies.
///
/// Built fresh per draft request and never persisted; only its inputs
/// (general and recipient preferences) live in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftingPreferences {
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
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl DraftingPreferences {
    pub fn apply_preference(&mut self, key: &str, value: &str) {
        match key {
            "tone" => self.tone = Some(value.to_string()),
            "greeting" => self.greeting = Some(value.to_string()),
            "signature" => self.signature = Some(value.to_string()),
            "length" => self.length = Some(value.to_string()),
            "extra_field" => self.extra_field = Some(value.to_string()),
            other => {
                self.additional.insert(other.to_string(), value.to_string());
            }
        }
    }

    pub fn apply_general_preferences(&mut self, preferences: &BTreeMap<String, String>) {
        for (key, value) in preferences {
            self.apply_preference(key, value);
        }
    }

    pub fn apply_recipient_preferences(&mut self, preferences: &[RecipientPreference]) {
        for preference in preferences {
            self.apply_preference(&preference.preference_key, &preference.preference_value);
        }
    }

    #[must_use]
    pub fn from_general_preferences(preferences: &BTreeMap<String, String>) -> Self {
        let mut instance = Self::default();
        instance.apply_general_preferences(preferences);
        instance
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.named_field_values().all(|value| value.is_none()) && self.additional.is_empty()
    }

    /// Render the aggregate for prompt construction, named fields first.
    #[must_use]
    pub fn to_prompt_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = NAMED_PREFERENCE_FIELDS
            .iter()
            .zip(self.named_field_values())
            .filter_map(|(name, value)| value.map(|v| format!("{name}: {v}")))
            .collect();
        for (key, value) in &self.additional {
            lines.push(format!("{key}: {value}"));
        }
        lines
    }

    fn named_field_values(&self) -> impl Iterator<Item = Option<&str>> {
        [
            self.tone.as_deref(),
            self.greeting.as_deref(),
            self.signature.as_deref(),
            self.length.as_deref(),
            self.extra_field.as_deref(),
        ]
        .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_round_trips_through_str() {
        assert_eq!(
            "send_email".parse::<ActionType>().unwrap(),
            ActionType::SendEmail
        );
        assert_eq!(ActionType::CreateEvent.as_str(), "create_event");
        assert!("delete_email".parse::<ActionType>().is_err());
    }

    #[test]
    fn action_status_parses_all_lifecycle_states() {
        for status in ["pending", "confirmed", "rejected", "modified", "executed", "failed"] {
            assert_eq!(status.parse::<ActionStatus>().unwrap().as_str(), status);
        }
    }

    #[test]
    fn named_keys_land_in_named_fields() {
        let mut prefs = DraftingPreferences::default();
        prefs.apply_preference("tone", "formal");
        prefs.apply_preference("emoji_usage", "never");
        assert_eq!(prefs.tone.as_deref(), Some("formal"));
        assert_eq!(prefs.additional.get("emoji_usage").map(String::as_str), Some("never"));
    }

    #[test]
    fn empty_aggregate_is_distinguishable() {
        let prefs = DraftingPreferences::default();
        assert!(prefs.is_empty());

        let mut touched = prefs.clone();
        touched.apply_preference("greeting", "Hi team");
        assert!(!touched.is_empty());

        let mut additional_only = DraftingPreferences::default();
        additional_only.apply_preference("emoji_usage", "never");
        assert!(!additional_only.is_empty());
    }

    #[test]
    fn prompt_lines_put_named_fields_first() {
        let mut prefs = DraftingPreferences::default();
        prefs.apply_preference("emoji_usage", "never");
        prefs.apply_preference("signature", "Best, Priya");
        prefs.apply_preference("tone", "casual");

        let lines = prefs.to_prompt_lines();
        assert_eq!(
            lines,
            vec![
                "tone: casual".to_string(),
                "signature: Best, Priya".to_string(),
                "emoji_usage: never".to_string(),
            ]
        );
    }

    #[test]
    fn later_values_overwrite_earlier_ones() {
        let mut prefs = DraftingPreferences::default();
        prefs.apply_preference("tone", "casual");
        prefs.apply_preference("tone", "formal");
        assert_eq!(prefs.tone.as_deref(), Some("formal"));
    }

    #[test]
    fn general_preferences_seed_the_aggregate() {
        let mut general = BTreeMap::new();
        general.insert("tone".to_string(), "casual".to_string());
        general.insert("emoji_usage".to_string(), "sparingly".to_string());

        let prefs = DraftingPreferences::from_general_preferences(&general);
        assert_eq!(prefs.tone.as_deref(), Some("casual"));
        assert_eq!(
            prefs.additional.get("emoji_usage").map(String::as_str),
            Some("sparingly")
        );
    }
}
