//! Text-to-speech synthesis.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::SpeechError;
use crate::llm::api_error_message;

/// Default TTS model.
pub const DEFAULT_TTS_MODEL: &str = "tts-1";

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// One synthesis job.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub model: String,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            speed: 1.0,
            model: DEFAULT_TTS_MODEL.to_string(),
        }
    }

    /// Playback speed, clamped to the 0.25..=4.0 range TTS providers accept.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.clamp(0.25, 4.0);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// A provider that renders text to mp3 bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, SpeechError>;
}

/// Client for the OpenAI `/audio/speech` endpoint.
pub struct OpenAiSpeechClient {
    api_base: String,
    api_key: String,
    http_client: Client,
}

impl std::fmt::Debug for OpenAiSpeechClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSpeechClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl OpenAiSpeechClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechApiRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
    speed: f32,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, SpeechError> {
        let body = SpeechApiRequest {
            model: &request.model,
            voice: &request.voice,
            input: &request.text,
            response_format: "mp3",
            speed: request.speed,
        };

        let response = self
            .http_client
            .post(format!("{}/audio/speech", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = api_error_message(&text);
            if status.as_u16() == 429 {
                return Err(SpeechError::RateLimited(message));
            }
            return Err(SpeechError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::RequestFailed(e.to_string()))?;

        if audio.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }

        tracing::debug!(bytes = audio.len(), voice = %request.voice, "Synthesized audio");
        Ok(audio.to_vec())
    }
}
