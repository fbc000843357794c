use rxqa_core::config::Settings;
use rxqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::provider::OllamaClient;

// Labels are chunked well below this; the guard only bounds pathological input.
const MAX_INPUT_CHARS: usize = 32_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Ok(Self::new(OllamaClient::from_settings(settings)?, settings.embedding_model.clone()))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let req = EmbedRequest {
            model: &self.model,
            input: inputs.iter().map(|s| truncate_chars(s, MAX_INPUT_CHARS)).collect(),
        };
        let resp: EmbedResponse = self.client.post_json("/api/embed", &req, "AI_EMBEDDINGS_FAILED")?;
        if resp.embeddings.iter().any(|v| v.is_empty()) {
            return Err(AppError::new(
                "AI_EMBEDDINGS_FAILED",
                "Embeddings response contained an empty vector",
            )
            .with_details(format!("model={}", self.model)));
        }
        Ok(resp.embeddings)
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
