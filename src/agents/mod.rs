//! Generation agents.
//!
//! Each agent wraps one kind of model call and turns the raw reply into a
//! typed value:
//!
//! - **Topic stage**: [`ExplorerAgent`] proposes candidates, [`ArchivistAgent`]
//!   rejects near-duplicates, and [`GatekeeperAgent`] approves each candidate
//!   per target language.
//! - **Test stage**: [`TopicTranslator`], [`ProseWriter`], [`TitleGenerator`],
//!   [`QuestionGenerator`], [`QuestionValidator`], and [`AudioSynthesizer`].
//!
//! Agents hold an `Arc` to their provider and a small config struct. They
//! never touch the queue; sequencing lives in [`crate::pipeline`].

pub mod archivist;
pub mod audio_synthesizer;
pub mod error;
pub mod explorer;
pub mod gatekeeper;
pub mod prose_writer;
pub mod question_generator;
pub mod question_validator;
pub mod title_generator;
pub mod topic_translator;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::retry::{RetryPolicy, Transient};

pub use archivist::{build_signature, ArchivistAgent, ArchivistConfig, NoveltyVerdict};
pub use audio_synthesizer::{AudioConfig, AudioSynthesizer, AUDIO_CONTENT_TYPE, DEFAULT_VOICES};
pub use error::{AgentError, AgentResult};
pub use explorer::{ExplorerAgent, ExplorerConfig, TopicCandidate};
pub use gatekeeper::{parse_verdict, GatekeeperAgent, GatekeeperConfig, GatekeeperOutcome};
pub use prose_writer::{clean_prose, ProseRequest, ProseWriter, ProseWriterConfig};
pub use question_generator::{
    parse_question_response, QuestionDraft, QuestionGenerator, QuestionGeneratorConfig,
};
pub use question_validator::{jaccard_similarity, QuestionValidator, ValidationReport};
pub use title_generator::{clean_title, TitleGenerator, TitleGeneratorConfig, TitleRequest};
pub use topic_translator::{TopicTranslator, TranslatedTopic, TranslatorConfig};

/// Sends `request` through `retry` and returns the trimmed reply text.
///
/// Only transient provider errors are retried; a blank reply counts as one.
pub(crate) async fn complete(
    llm: &Arc<dyn LlmProvider>,
    retry: &RetryPolicy,
    operation: &str,
    request: GenerationRequest,
) -> Result<String, LlmError> {
    retry
        .run_if(operation, LlmError::is_transient, || {
            let request = request.clone();
            async move {
                let response = llm.generate(request).await?;
                response.require_content().map(str::to_string)
            }
        })
        .await
}
