//! Scripted providers shared by the agent unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, LlmError, ObjectStoreError, SpeechError};
use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use crate::object_store::ObjectStore;
use crate::speech::{SpeechRequest, SpeechSynthesizer};

/// Replies from a queue, then repeats `fallback` forever.
pub struct MockLlmProvider {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockLlmProvider {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new("");
        {
            let mut queue = mock.replies.lock().unwrap();
            queue.extend(replies.into_iter().map(|r| Ok(r.into())));
        }
        mock
    }

    pub fn push_error(&self, err: LlmError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))?;

        Ok(GenerationResponse {
            id: "mock-id".to_string(),
            model: "mock-model".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(reply),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 100,
                total_tokens: 200,
            },
        })
    }
}

/// Returns a fixed vector for every input, or fails every call.
pub struct MockEmbedder {
    pub vector: Vec<f32>,
    pub fail: bool,
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::RequestFailed("connection reset".into()));
        }
        Ok(inputs.iter().map(|_| self.vector.clone()).collect())
    }
}

/// Fails the first `failures` calls, then returns fixed bytes.
pub struct MockSpeech {
    pub failures: Mutex<u32>,
    pub calls: Mutex<Vec<SpeechRequest>>,
}

impl MockSpeech {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, SpeechError> {
        self.calls.lock().unwrap().push(request);
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(SpeechError::RateLimited("try later".into()));
        }
        Ok(b"ID3mock".to_vec())
    }
}

/// Keeps uploaded objects in memory.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<Vec<(String, Vec<u8>, String)>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), bytes, content_type.to_string()));
        Ok(self.public_url(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.objects.lock().unwrap().iter().any(|(k, _, _)| k == key))
    }

    async fn delete(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|(k, _, _)| k != key);
        Ok(objects.len() != before)
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}
