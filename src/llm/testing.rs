//! Deterministic stand-ins for the remote capabilities, used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Completion, Embedder, LlmError, Message, Result, Role};

/// Completion double that keeps the first few words of the content.
pub struct ScriptedLlm {
    pub summary_words: usize,
    pub keywords: String,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(summary_words: usize) -> Self {
        Self {
            summary_words,
            keywords: "alpha, Beta,  , alpha, gamma.".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Completion for ScriptedLlm {
    fn complete(&self, messages: &[Message]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.text().to_lowercase())
            .unwrap_or_default();
        let last = messages.last().map(|m| m.text()).unwrap_or_default();

        if system.contains("keyword") {
            return Ok(self.keywords.clone());
        }
        if messages.iter().any(|m| m.has_image()) {
            return Ok(if last.to_lowercase().contains("one sentence") {
                "A small red square.".to_string()
            } else {
                "A red square on a plain background, drawn with flat color and sharp edges."
                    .to_string()
            });
        }

        let words: Vec<&str> = last.split_whitespace().take(self.summary_words).collect();
        Ok(words.join(" "))
    }
}

/// Completion double that always fails.
pub struct DownLlm;

impl Completion for DownLlm {
    fn complete(&self, _messages: &[Message]) -> Result<String> {
        Err(LlmError::Unavailable("connection refused".to_string()))
    }
}

/// Embedding double: a fixed-length vector derived from the input bytes.
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (i, b) in input.bytes().enumerate() {
            let h = (i as u64)
                .wrapping_mul(2_654_435_761)
                .wrapping_add(b as u64 * 40_503);
            let sign = if (h >> 7) & 1 == 0 { 1.0 } else { -1.0 };
            vector[(h % self.dimensions as u64) as usize] += sign;
        }
        // Keep the empty string away from the zero vector
        vector[0] += 0.5;
        Ok(vector)
    }
}

/// Embedding double that succeeds `limit` times, then fails.
pub struct FailingEmbedder {
    inner: HashEmbedder,
    remaining: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(dimensions: usize, limit: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimensions),
            remaining: AtomicUsize::new(limit),
        }
    }
}

impl Embedder for FailingEmbedder {
    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(LlmError::Unavailable("embedding server went away".to_string()));
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        self.inner.embed(input)
    }
}
