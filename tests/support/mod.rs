#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mailsift::mail::{DraftingPreferences, Email};
use mailsift::providers::{
    GenerationProvider, PreferenceExtraction, ProposedEvent, ReplyDraft, ThreadClassification,
    ThreadSummary,
};
use mailsift::store::MailStore;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub async fn temp_store(tmp: &TempDir) -> MailStore {
    MailStore::open(&tmp.path().join("assistant.db"))
        .await
        .unwrap()
}

pub fn sample_email(mail_id: &str, thread_id: &str, from: &str, to: &[&str], minute: u32) -> Email {
    Email {
        mail_id: mail_id.into(),
        external_id: None,
        thread_id: thread_id.into(),
        from_name: None,
        from_email: from.into(),
        to: to.iter().map(|s| (*s).to_string()).collect(),
        cc: vec![],
        subject: Some("Quarterly sync".into()),
        body: format!("body of {mail_id}"),
        received_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap(),
    }
}

/// Observation of one capability call: how many emails the thread snapshot
/// held and the id of its newest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSeen {
    pub capability: &'static str,
    pub thread_len: usize,
    pub latest_mail_id: Option<String>,
}

#[derive(Default)]
pub struct CallCounts {
    pub classify: AtomicUsize,
    pub summarize: AtomicUsize,
    pub draft: AtomicUsize,
    pub propose_event: AtomicUsize,
    pub extract_preferences: AtomicUsize,
}

/// Deterministic provider double. Each capability returns a fixture, can be
/// told to fail, and records the thread snapshot it observed.
pub struct ScriptedProvider {
    pub classification: ThreadClassification,
    pub summary: ThreadSummary,
    pub draft: ReplyDraft,
    pub event: ProposedEvent,
    pub extraction: PreferenceExtraction,
    pub fail_summary: bool,
    pub fail_draft: bool,
    pub fail_schedule: bool,
    pub calls: CallCounts,
    pub snapshots: Mutex<Vec<SnapshotSeen>>,
    pub draft_preferences_seen: Mutex<Vec<Option<DraftingPreferences>>>,
}

impl ScriptedProvider {
    pub fn with_classification(summary: f64, draft: f64, schedule: f64) -> Self {
        Self {
            classification: ThreadClassification {
                needs_summary: summary,
                needs_draft: draft,
                needs_schedule: schedule,
            },
            summary: ThreadSummary {
                summary: "Scripted recap.".into(),
            },
            draft: ReplyDraft {
                to: "alex@example.com".into(),
                subject: "Re: Quarterly sync".into(),
                body: "Sounds good.".into(),
            },
            event: ProposedEvent {
                title: "Quarterly sync".into(),
                proposed_time: "2026-03-05T10:00:00Z".into(),
                notes: String::new(),
            },
            extraction: PreferenceExtraction::default(),
            fail_summary: false,
            fail_draft: false,
            fail_schedule: false,
            calls: CallCounts::default(),
            snapshots: Mutex::new(Vec::new()),
            draft_preferences_seen: Mutex::new(Vec::new()),
        }
    }

    fn observe(&self, capability: &'static str, thread: &[Email]) {
        self.snapshots.lock().unwrap().push(SnapshotSeen {
            capability,
            thread_len: thread.len(),
            latest_mail_id: thread.last().map(|e| e.mail_id.clone()),
        });
    }

    pub fn snapshots_seen(&self) -> Vec<SnapshotSeen> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn classify(&self, thread: &[Email]) -> anyhow::Result<ThreadClassification> {
        self.calls.classify.fetch_add(1, Ordering::SeqCst);
        self.observe("classify", thread);
        Ok(self.classification)
    }

    async fn summarize(&self, thread: &[Email]) -> anyhow::Result<ThreadSummary> {
        self.calls.summarize.fetch_add(1, Ordering::SeqCst);
        self.observe("summarize", thread);
        if self.fail_summary {
            anyhow::bail!("scripted summarize failure");
        }
        Ok(self.summary.clone())
    }

    async fn draft(
        &self,
        thread: &[Email],
        preferences: Option<&DraftingPreferences>,
    ) -> anyhow::Result<ReplyDraft> {
        self.calls.draft.fetch_add(1, Ordering::SeqCst);
        self.observe("draft", thread);
        self.draft_preferences_seen
            .lock()
            .unwrap()
            .push(preferences.cloned());
        if self.fail_draft {
            anyhow::bail!("scripted draft failure");
        }
        Ok(self.draft.clone())
    }

    async fn propose_event(&self, thread: &[Email]) -> anyhow::Result<ProposedEvent> {
        self.calls.propose_event.fetch_add(1, Ordering::SeqCst);
        self.observe("propose_event", thread);
        if self.fail_schedule {
            anyhow::bail!("scripted propose_event failure");
        }
        Ok(self.event.clone())
    }

    async fn extract_preferences(
        &self,
        _original_payload: &serde_json::Value,
        _updated_payload: &serde_json::Value,
    ) -> anyhow::Result<PreferenceExtraction> {
        self.calls.extract_preferences.fetch_add(1, Ordering::SeqCst);
        Ok(self.extraction.clone())
    }
}
