use crate::mail::{DraftingPreferences, Email};
use crate::store::MailStore;
use std::collections::HashSet;
use tracing::debug;

/// Merge general and recipient-scoped preferences for a reply to the given
/// thread. Returns `None` when nothing applies, so drafting can omit the
/// preferences block entirely rather than carry an empty one.
pub async fn build_drafting_preferences(
    store: &MailStore,
    thread: &[Email],
) -> anyhow::Result<Option<DraftingPreferences>> {
    let general_preferences = store.fetch_general_preferences().await?;
    let mut preferences = DraftingPreferences::from_general_preferences(&general_preferences);

    let recipient_emails = infer_reply_recipients(thread);
    debug!(?recipient_emails, "resolving recipient preferences");

    // Formal >> casual: the first formal tone seen wins, whatever the
    // last-applied-wins walk does afterwards.
    let mut formal_tone_value: Option<String> = None;
    for email_address in &recipient_emails {
        let recipient_preferences = store.fetch_preferences_for_recipient(email_address).await?;
        if recipient_preferences.is_empty() {
            continue;
        }

        debug!(recipient = %email_address, count = recipient_preferences.len(), "applying preferences");
        preferences.apply_recipient_preferences(&recipient_preferences);

        if formal_tone_value.is_none() {
            let tone = recipient_preferences
                .iter()
                .find(|p| p.preference_key == "tone");
            if let Some(tone) = tone
                && tone.preference_value.to_lowercase().contains("formal")
            {
                debug!(recipient = %email_address, "formal tone preference will be applied");
                formal_tone_value = Some(tone.preference_value.clone());
            }
        }
    }

    if let Some(tone) = formal_tone_value {
        preferences.tone = Some(tone);
    }

    Ok(if preferences.is_empty() {
        None
    } else {
        Some(preferences)
    })
}

/// Candidate reply recipients from the latest email: its sender first, then
/// `to`, then `cc`, lowercased and deduplicated preserving first-seen order.
pub fn infer_reply_recipients(thread: &[Email]) -> Vec<String> {
    let Some(latest) = thread.last() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    std::iter::once(&latest.from_email)
        .chain(latest.to.iter())
        .chain(latest.cc.iter())
        .filter(|address| !address.is_empty())
        .map(|address| address.to_lowercase())
        .filter(|address| seen.insert(address.clone()))
        .collect()
}
