mod support;

use async_trait::async_trait;
use mailsift::chat::{
    ChatBackend, ChatMessage, ConversationReply, MailTools, Responder,
};
use mailsift::error::ChatError;
use mailsift::index::{HashEmbedding, SemanticIndex};
use mailsift::store::MailStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use support::{ScriptedProvider, sample_email};
use tempfile::TempDir;

/// Backend double that behaves as instructed: resolve the reference via
/// search first, then draft against the best hit.
struct SearchThenDraftBackend {
    query: String,
    replies: AtomicUsize,
}

#[async_trait]
impl ChatBackend for SearchThenDraftBackend {
    async fn reply(
        &self,
        transcript: &str,
        tools: &dyn MailTools,
    ) -> anyhow::Result<ConversationReply> {
        self.replies.fetch_add(1, Ordering::SeqCst);
        assert!(transcript.contains("user:"));

        let references = tools.search_emails(&self.query, 3).await?;
        let draft = match references.first() {
            Some(source) => tools
                .draft_reply(&source.mail_id)
                .await?
                .map(|thread_draft| thread_draft.draft),
            None => None,
        };

        Ok(ConversationReply {
            answer: "Here is what I found.".into(),
            references,
            draft,
            event: None,
        })
    }
}

async fn responder_with_corpus(
    tmp: &TempDir,
    backend: Arc<dyn ChatBackend>,
) -> (Responder, Arc<ScriptedProvider>) {
    let index = Arc::new(SemanticIndex::new(Arc::new(HashEmbedding::new(32))));
    let store = Arc::new(
        MailStore::open(&tmp.path().join("assistant.db"))
            .await
            .unwrap()
            .with_index(Arc::clone(&index)),
    );

    store
        .insert_email(&sample_email("e-1", "t-1", "alex@example.com", &["me@example.com"], 0))
        .await
        .unwrap();
    store
        .insert_email(&sample_email("e-2", "t-2", "casey@example.com", &["me@example.com"], 5))
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::with_classification(0.0, 0.0, 0.0));
    let generation: Arc<dyn mailsift::providers::GenerationProvider> = Arc::clone(&provider);
    let responder = Responder::new(store, index, generation, backend);
    (responder, provider)
}

#[tokio::test]
async fn respond_resolves_references_then_drafts() {
    let tmp = TempDir::new().unwrap();
    // The hash embedder is deterministic, not semantic: querying with the
    // exact canonical rendering of e-1 pins it to the top of the ranking.
    let backend = Arc::new(SearchThenDraftBackend {
        query: "Subject: Quarterly sync\nFrom: alex@example.com\nTo: me@example.com\n\
                Cc: (no cc)\nBody:\nbody of e-1"
            .into(),
        replies: AtomicUsize::new(0),
    });
    let backend_dyn: Arc<dyn ChatBackend> = Arc::clone(&backend);
    let (responder, provider) = responder_with_corpus(&tmp, backend_dyn).await;

    let reply = responder
        .respond(&[ChatMessage {
            role: "user".into(),
            content: "draft a reply to the quarterly sync mail".into(),
        }])
        .await
        .unwrap();

    assert_eq!(backend.replies.load(Ordering::SeqCst), 1);
    assert!(!reply.references.is_empty());
    assert_eq!(reply.references[0].mail_id, "e-1");
    assert!(reply.draft.is_some());
    assert_eq!(provider.calls.draft.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_transcript_fails_before_the_backend_runs() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(SearchThenDraftBackend {
        query: "anything".into(),
        replies: AtomicUsize::new(0),
    });
    let backend_dyn: Arc<dyn ChatBackend> = Arc::clone(&backend);
    let (responder, _) = responder_with_corpus(&tmp, backend_dyn).await;

    let err = responder
        .respond(&[ChatMessage {
            role: "user".into(),
            content: "   ".into(),
        }])
        .await
        .unwrap_err();

    assert!(
        err.downcast_ref::<ChatError>()
            .is_some_and(|e| matches!(e, ChatError::EmptyTranscript))
    );
    assert_eq!(backend.replies.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tools_return_none_for_unknown_mail_ids() {
    struct UnknownIdBackend;

    #[async_trait]
    impl ChatBackend for UnknownIdBackend {
        async fn reply(
            &self,
            _transcript: &str,
            tools: &dyn MailTools,
        ) -> anyhow::Result<ConversationReply> {
            assert!(tools.draft_reply("m-404").await?.is_none());
            assert!(tools.schedule_event("m-404").await?.is_none());
            Ok(ConversationReply::default())
        }
    }

    let tmp = TempDir::new().unwrap();
    let (responder, provider) = responder_with_corpus(&tmp, Arc::new(UnknownIdBackend)).await;

    responder
        .respond(&[ChatMessage {
            role: "user".into(),
            content: "schedule the llama meeting".into(),
        }])
        .await
        .unwrap();

    // Unknown ids never reach a generation capability.
    assert_eq!(provider.calls.draft.load(Ordering::SeqCst), 0);
    assert_eq!(provider.calls.propose_event.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn schedule_tool_scopes_to_the_resolved_thread() {
    struct ScheduleBackend;

    #[async_trait]
    impl ChatBackend for ScheduleBackend {
        async fn reply(
            &self,
            _transcript: &str,
            tools: &dyn MailTools,
        ) -> anyhow::Result<ConversationReply> {
            let event = tools.schedule_event("e-2").await?.expect("thread exists");
            assert_eq!(event.thread_id, "t-2");
            Ok(ConversationReply {
                answer: "Scheduled.".into(),
                event: Some(event.event),
                ..ConversationReply::default()
            })
        }
    }

    let tmp = TempDir::new().unwrap();
    let (responder, provider) = responder_with_corpus(&tmp, Arc::new(ScheduleBackend)).await;

    let reply = responder
        .respond(&[ChatMessage {
            role: "user".into(),
            content: "put the sync on my calendar".into(),
        }])
        .await
        .unwrap();

    assert!(reply.event.is_some());
    assert_eq!(provider.calls.propose_event.load(Ordering::SeqCst), 1);
}
