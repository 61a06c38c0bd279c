pub mod openai;
pub mod response;
pub mod traits;

pub use openai::OpenAiProvider;
pub use response::{
    PreferenceExtraction, ProposedEvent, ReplyDraft, ThreadClassification, ThreadSummary,
};
pub use traits::{GenerationProvider, format_email, format_thread};

use crate::config::{IdentityConfig, ProviderConfig};
use std::sync::Arc;

/// Factory: build the configured generation provider.
pub fn create_provider(
    provider: &ProviderConfig,
    identity: &IdentityConfig,
) -> Arc<dyn GenerationProvider> {
    Arc::new(OpenAiProvider::new(provider, identity.clone()))
}
