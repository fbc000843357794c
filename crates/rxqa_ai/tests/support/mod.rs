#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rxqa_ai::chunking::Tokenizer;
use rxqa_ai::embeddings::{Embedder, EmbeddingGateway};
use rxqa_ai::index::VectorIndex;
use rxqa_ai::llm::{ChatMessage, Llm};
use rxqa_ai::pipeline::{Pipeline, PipelineConfig};
use rxqa_core::domain::{Chunk, Section};
use rxqa_core::error::AppError;

pub const DIMS: u32 = 27;

/// Replies with queued responses in order and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, AppError>>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<String, AppError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Llm for ScriptedLlm {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::new("AI_LLM_FAILED", "script exhausted")))
    }
}

/// Letter-frequency vectors with a constant bias slot so no vector is zero.
#[derive(Default)]
pub struct LetterEmbedder {
    pub calls: AtomicUsize,
}

pub fn letter_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS as usize];
    for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
        v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
    }
    v[26] = 1.0;
    v
}

impl Embedder for LetterEmbedder {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|s| letter_vector(s)).collect())
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Err(AppError::new("AI_EMBEDDINGS_FAILED", "Failed to call embeddings endpoint")
            .with_details("connection refused")
            .with_retryable(true))
    }
}

/// Whitespace tokenizer with a growing vocabulary; decode joins with spaces.
#[derive(Default)]
pub struct VocabTokenizer {
    vocab: Mutex<(HashMap<String, u32>, Vec<String>)>,
}

impl Tokenizer for VocabTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut guard = self.vocab.lock().unwrap();
        let (ids, words) = &mut *guard;
        text.split_whitespace()
            .map(|w| {
                if let Some(id) = ids.get(w) {
                    return *id;
                }
                let id = words.len() as u32;
                ids.insert(w.to_string(), id);
                words.push(w.to_string());
                id
            })
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, AppError> {
        let guard = self.vocab.lock().unwrap();
        tokens
            .iter()
            .map(|t| {
                guard
                    .1
                    .get(*t as usize)
                    .cloned()
                    .ok_or_else(|| AppError::new("TOKENIZER_DECODE_FAILED", "unknown token"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|w| w.join(" "))
    }
}

pub fn chunk(drug: &str, section: Section, section_id: &str, text: &str) -> Chunk {
    Chunk {
        drug_name: drug.to_string(),
        setid: format!("set-{}", drug.to_lowercase()),
        ndc_codes: vec!["0000-0000".to_string()],
        version: 1,
        section,
        section_id: section_id.to_string(),
        url: format!("https://dailymed.example/{}", drug.to_lowercase()),
        text: text.to_string(),
        chunk_index: 0,
    }
}

pub fn ready_index(dims: u32) -> Arc<VectorIndex> {
    let index = VectorIndex::open_in_memory(dims).expect("open");
    index.create_index(false).expect("create");
    Arc::new(index)
}

/// Index a chunk under its letter vector.
pub fn seed(index: &VectorIndex, c: &Chunk) -> String {
    index.upsert(c, &letter_vector(&c.text)).expect("upsert")
}

pub fn pipeline(llm: Arc<ScriptedLlm>, index: Arc<VectorIndex>) -> Pipeline {
    Pipeline::new(
        llm,
        EmbeddingGateway::new(Arc::new(LetterEmbedder::default())),
        index,
        PipelineConfig::default(),
    )
}
