use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Runtime settings for indexing and querying.
///
/// Resolution order: built-in defaults, then an optional JSON file, then
/// `RXQA_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub index_path: PathBuf,
    pub provider_base_url: String,
    pub embedding_model: String,
    pub embedding_dim: u32,
    pub chat_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_top_k: usize,
    pub confidence_threshold: f32,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("rxqa-index.sqlite"),
            provider_base_url: "http://127.0.0.1:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dim: 768,
            chat_model: "llama3.2:latest".to_string(),
            chunk_size: 1536,
            chunk_overlap: 150,
            retrieval_top_k: 6,
            confidence_threshold: 0.7,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("CONFIG_READ_FAILED", "Failed to read settings file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AppError::new("CONFIG_INVALID", "Failed to decode settings file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })
    }

    /// Apply `RXQA_*` overrides. `lookup` returns the raw value of a variable.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RXQA_INDEX_PATH") {
            self.index_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RXQA_PROVIDER_BASE_URL") {
            self.provider_base_url = v;
        }
        if let Some(v) = lookup("RXQA_EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some(v) = lookup("RXQA_CHAT_MODEL") {
            self.chat_model = v;
        }
        override_parsed(&lookup, "RXQA_EMBEDDING_DIM", &mut self.embedding_dim)?;
        override_parsed(&lookup, "RXQA_CHUNK_SIZE", &mut self.chunk_size)?;
        override_parsed(&lookup, "RXQA_CHUNK_OVERLAP", &mut self.chunk_overlap)?;
        override_parsed(&lookup, "RXQA_RETRIEVAL_TOP_K", &mut self.retrieval_top_k)?;
        override_parsed(
            &lookup,
            "RXQA_CONFIDENCE_THRESHOLD",
            &mut self.confidence_threshold,
        )?;
        override_parsed(
            &lookup,
            "RXQA_REQUEST_TIMEOUT_SECS",
            &mut self.request_timeout_secs,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str, details: String| -> Result<(), AppError> {
            Err(AppError::new("CONFIG_INVALID", msg.to_string()).with_details(details))
        };
        if self.chunk_size == 0 {
            return invalid("chunk_size must be positive", "chunk_size=0".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            return invalid(
                "chunk_overlap must be smaller than chunk_size",
                format!(
                    "chunk_size={}; chunk_overlap={}",
                    self.chunk_size, self.chunk_overlap
                ),
            );
        }
        if self.embedding_dim == 0 {
            return invalid("embedding_dim must be positive", "embedding_dim=0".to_string());
        }
        if self.retrieval_top_k == 0 {
            return invalid("retrieval_top_k must be at least 1", "retrieval_top_k=0".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(
                "confidence_threshold must be within [0, 1]",
                format!("confidence_threshold={}", self.confidence_threshold),
            );
        }
        if self.embedding_model.trim().is_empty() || self.chat_model.trim().is_empty() {
            return invalid("model names must not be empty", String::new());
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, slot: &mut T) -> Result<(), AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(());
    };
    *slot = raw.trim().parse::<T>().map_err(|e| {
        AppError::new("CONFIG_INVALID", "Malformed settings override")
            .with_details(format!("var={name}; value={raw}; err={e}"))
    })?;
    Ok(())
}
