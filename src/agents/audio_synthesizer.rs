//! Audio synthesizer: narrates a passage and uploads the mp3.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use uuid::Uuid;

use crate::object_store::ObjectStore;
use crate::retry::RetryPolicy;
use crate::speech::{SpeechRequest, SpeechSynthesizer, DEFAULT_TTS_MODEL};

use super::error::{AgentError, AgentResult};

/// Voices used when a language lists none.
pub const DEFAULT_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub model: String,
    pub default_voice: String,
    pub default_speed: f32,
    /// Applied to synthesis and upload together.
    pub retry: RetryPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_TTS_MODEL.to_string(),
            default_voice: DEFAULT_VOICES[0].to_string(),
            default_speed: 1.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl AudioConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub struct AudioSynthesizer {
    speech: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn ObjectStore>,
    config: AudioConfig,
}

impl std::fmt::Debug for AudioSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSynthesizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AudioSynthesizer {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "audio_synthesizer";

    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn ObjectStore>,
        config: AudioConfig,
    ) -> Self {
        Self {
            speech,
            store,
            config,
        }
    }

    /// Picks a voice at random from `voices`, or from [`DEFAULT_VOICES`]
    /// when the list is empty.
    pub fn select_voice(&self, voices: &[String]) -> String {
        let mut rng = rand::rng();
        voices
            .choose(&mut rng)
            .cloned()
            .or_else(|| DEFAULT_VOICES.choose(&mut rng).map(|v| v.to_string()))
            .unwrap_or_else(|| self.config.default_voice.clone())
    }

    /// Storage key for a test's audio file.
    pub fn audio_key(file_id: Uuid) -> String {
        format!("{}.mp3", file_id)
    }

    /// Narrates `text` and stores it under the key for `file_id`.
    ///
    /// Synthesis and upload are retried together, so a failed upload never
    /// leaves an orphaned half-step. Returns the public URL.
    pub async fn generate_and_upload(
        &self,
        text: &str,
        file_id: Uuid,
        voice: &str,
        speed: Option<f32>,
    ) -> AgentResult<String> {
        if text.trim().is_empty() {
            return Err(AgentError::GenerationFailed(
                "Cannot synthesize empty text".to_string(),
            ));
        }

        let key = Self::audio_key(file_id);
        let request = SpeechRequest::new(text, voice)
            .with_speed(speed.unwrap_or(self.config.default_speed))
            .with_model(&self.config.model);

        let url = self
            .config
            .retry
            .run(Self::AGENT_NAME, || {
                let request = request.clone();
                let key = key.as_str();
                async move {
                    let bytes = self.speech.synthesize(request).await?;
                    let url = self.store.put(key, bytes, AUDIO_CONTENT_TYPE).await?;
                    Ok::<_, AgentError>(url)
                }
            })
            .await?;

        tracing::info!(key = %key, voice = %voice, chars = text.chars().count(), "Uploaded audio");
        Ok(url)
    }

    pub async fn audio_exists(&self, file_id: Uuid) -> AgentResult<bool> {
        Ok(self.store.exists(&Self::audio_key(file_id)).await?)
    }
}
