use rxqa_core::config::Settings;
use rxqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, Llm};
use crate::provider::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Ok(Self::new(OllamaClient::from_settings(settings)?, settings.chat_model.clone()))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl Llm for OllamaLlm {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let req = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };
        let resp: ChatResponse = self.client.post_json("/api/chat", &req, "AI_LLM_FAILED")?;
        if resp.message.content.trim().is_empty() {
            return Err(AppError::new("AI_LLM_FAILED", "Completion response was empty")
                .with_details(format!("model={}", self.model)));
        }
        Ok(resp.message.content)
    }
}
