pub mod preferences;

pub use preferences::{build_drafting_preferences, infer_reply_recipients};

use crate::error::TriageError;
use crate::mail::{Action, ActionStatus, ActionType, Email, Summary};
use crate::providers::{GenerationProvider, ThreadClassification};
use crate::store::MailStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Booleans derived from classification probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageDecisions {
    pub needs_summary: bool,
    pub needs_draft: bool,
    pub needs_schedule: bool,
}

/// Thresholding rule shared by all three decisions.
#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    threshold: f64,
}

impl DecisionPolicy {
    /// The threshold must lie in [0, 1].
    pub fn new(threshold: f64) -> Result<Self, TriageError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TriageError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    #[must_use]
    pub fn decide(&self, classification: &ThreadClassification) -> TriageDecisions {
        TriageDecisions {
            needs_summary: classification.needs_summary >= self.threshold,
            needs_draft: classification.needs_draft >= self.threshold,
            needs_schedule: classification.needs_schedule >= self.threshold,
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationReport {
    pub probabilities: ThreadClassification,
    pub decisions: TriageDecisions,
}

/// What one `process_new_email` call produced. Proposed actions follow the
/// fixed evaluation order (draft before schedule); the summary is returned
/// separately.
#[derive(Debug, Serialize)]
pub struct TriageOutcome {
    pub mail_id: String,
    pub summary: Option<String>,
    pub proposed_actions: Vec<Action>,
    pub classification: ClassificationReport,
}

/// Coordinates the capabilities that act on an incoming email.
pub struct Dispatcher {
    store: Arc<MailStore>,
    provider: Arc<dyn GenerationProvider>,
    policy: DecisionPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<MailStore>,
        provider: Arc<dyn GenerationProvider>,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            policy,
        }
    }

    /// Persist the email, classify the full thread, fan out the decided
    /// generation tasks concurrently, and persist their results as pending
    /// reviewable actions.
    ///
    /// The thread snapshot is fixed right after insertion, so every
    /// generation task sees identical context. Persistence happens only
    /// after every scheduled task has succeeded: if one fails, the call
    /// fails and sibling results are discarded rather than partially
    /// committed. A false decision incurs no capability call at all.
    pub async fn process_new_email(&self, email: &Email) -> anyhow::Result<TriageOutcome> {
        self.store.insert_email(email).await?;
        let thread = self.store.fetch_emails_for_thread(&email.thread_id).await?;
        debug!(thread_id = %email.thread_id, emails = thread.len(), "thread loaded");

        let classification = self.provider.classify(&thread).await?;
        classification.validate()?;
        let decisions = self.policy.decide(&classification);
        debug!(?decisions, "classification thresholded");

        let summary_task = async {
            if decisions.needs_summary {
                self.provider.summarize(&thread).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let draft_task = async {
            if decisions.needs_draft {
                let preferences = build_drafting_preferences(&self.store, &thread).await?;
                debug!(?preferences, "drafting preferences resolved");
                self.provider
                    .draft(&thread, preferences.as_ref())
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let schedule_task = async {
            if decisions.needs_schedule {
                self.provider.propose_event(&thread).await.map(Some)
            } else {
                Ok(None)
            }
        };

        let (summary, draft, event) = tokio::try_join!(summary_task, draft_task, schedule_task)?;

        let mut proposed_actions = Vec::new();
        let summary_text = match summary {
            Some(result) => {
                let record = Summary {
                    summary_id: Uuid::new_v4().to_string(),
                    thread_id: email.thread_id.clone(),
                    text: result.summary.clone(),
                };
                self.store.insert_summary(&record).await?;
                Some(result.summary)
            }
            None => None,
        };

        if let Some(draft) = draft {
            let action = Action {
                action_id: Uuid::new_v4().to_string(),
                mail_id: Some(email.mail_id.clone()),
                kind: ActionType::SendEmail,
                status: ActionStatus::Pending,
                payload: serde_json::to_value(&draft)?,
                result: None,
            };
            self.store.insert_action(&action).await?;
            proposed_actions.push(action);
        }

        if let Some(event) = event {
            let action = Action {
                action_id: Uuid::new_v4().to_string(),
                mail_id: Some(email.mail_id.clone()),
                kind: ActionType::CreateEvent,
                status: ActionStatus::Pending,
                payload: serde_json::to_value(&event)?,
                result: None,
            };
            self.store.insert_action(&action).await?;
            proposed_actions.push(action);
        }

        Ok(TriageOutcome {
            mail_id: email.mail_id.clone(),
            summary: summary_text,
            proposed_actions,
            classification: ClassificationReport {
                probabilities: classification,
                decisions,
            },
        })
    }
}
