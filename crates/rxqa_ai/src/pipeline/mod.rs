use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rxqa_core::config::Settings;
use rxqa_core::domain::{RetrievedContext, Section};
use rxqa_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeddings::ollama_embed::OllamaEmbedder;
use crate::embeddings::EmbeddingGateway;
use crate::guardrails::{self, DISCLAIMER, NO_CONTEXT_ANSWER};
use crate::index::VectorIndex;
use crate::llm::ollama_llm::OllamaLlm;
use crate::llm::{ChatMessage, Llm};

pub mod intent;
pub mod prompts;
mod state;

pub use state::{PipelineState, Stage};

pub const MAX_QUERY_CHARS: usize = 500;
pub const MAX_TOP_K: usize = 20;
pub const DEFAULT_QUERY_TOP_K: usize = 6;

type StageFn = fn(&Pipeline, PipelineState) -> Result<PipelineState, AppError>;

/// The fixed stage order. Every query runs all five, in sequence.
const STAGES: [(Stage, StageFn); 5] = [
    (Stage::RouteIntent, Pipeline::route_intent),
    (Stage::Retrieve, Pipeline::retrieve),
    (Stage::Answer, Pipeline::answer),
    (Stage::Verify, Pipeline::verify),
    (Stage::Finalize, Pipeline::finalize),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub retrieval_top_k: usize,
    pub confidence_threshold: f32,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retrieval_top_k: settings.retrieval_top_k,
            confidence_threshold: settings.confidence_threshold,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Cooperative cancellation shared between a caller and a running query.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub answer: String,
    pub confidence: f32,
    pub contexts: Vec<RetrievedContext>,
    pub drug: Option<String>,
    pub disclaimer: String,
}

/// Route, retrieve, answer, verify, finalize. Holds only shared,
/// externally synchronized collaborators; each query owns its own state.
#[derive(Clone)]
pub struct Pipeline {
    llm: Arc<dyn Llm>,
    embeddings: EmbeddingGateway,
    index: Arc<VectorIndex>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn Llm>,
        embeddings: EmbeddingGateway,
        index: Arc<VectorIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            llm,
            embeddings,
            index,
            config,
        }
    }

    /// Wire the Ollama-backed providers and the on-disk index described by
    /// `settings`. The index is created on first use; a stored dimension that
    /// disagrees with `embedding_dim` is an error.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        settings.validate()?;
        let llm = OllamaLlm::from_settings(settings)?;
        let embedder = OllamaEmbedder::from_settings(settings)?;
        let index = VectorIndex::open(&settings.index_path, settings.embedding_dim)?;
        index.create_index(false)?;
        info!(
            index = %settings.index_path.display(),
            dims = settings.embedding_dim,
            chat_model = %settings.chat_model,
            embedding_model = %settings.embedding_model,
            "pipeline configured"
        );
        Ok(Self::new(
            Arc::new(llm),
            EmbeddingGateway::new(Arc::new(embedder)),
            Arc::new(index),
            PipelineConfig::from_settings(settings),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Answer `text`, returning at most `top_k` contexts (clamped to 1..=20).
    pub fn query(&self, text: &str, drug: Option<&str>, top_k: usize) -> Result<QueryResponse, AppError> {
        self.query_with_cancel(text, drug, top_k, &CancelToken::new())
    }

    pub fn query_with_cancel(
        &self,
        text: &str,
        drug: Option<&str>,
        top_k: usize,
        cancel: &CancelToken,
    ) -> Result<QueryResponse, AppError> {
        let q = text.trim();
        if q.is_empty() {
            return Err(AppError::new("QUERY_INVALID", "Query must not be empty"));
        }
        if q.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::new("QUERY_INVALID", "Query is too long")
                .with_details(format!("max_chars={MAX_QUERY_CHARS}")));
        }
        let top_k = top_k.clamp(1, MAX_TOP_K);

        let state = PipelineState::new(q, drug.map(str::to_string));
        let mut done = self.run(state, cancel)?;
        done.contexts.truncate(top_k);

        Ok(QueryResponse {
            answer: done.answer,
            confidence: done.confidence,
            contexts: done.contexts,
            drug: done.drug,
            disclaimer: DISCLAIMER.to_string(),
        })
    }

    /// Run every stage in order. A failure or cancellation aborts the query
    /// with no partial answer.
    pub fn run(&self, state: PipelineState, cancel: &CancelToken) -> Result<PipelineState, AppError> {
        let started = Instant::now();
        let mut state = state;
        for (stage, step) in STAGES {
            if cancel.is_cancelled() {
                warn!(stage = %stage, "query cancelled");
                return Err(AppError::new("PIPELINE_CANCELLED", "Query was cancelled")
                    .with_details(format!("before_stage={stage}")));
            }
            debug!(stage = %stage, "entering stage");
            state = step(self, state).map_err(|e| {
                warn!(stage = %stage, error = %e, "stage failed");
                AppError::wrap(stage.failure_code(), format!("Pipeline stage {stage} failed"), &e)
            })?;
        }
        info!(
            confidence = state.confidence,
            contexts = state.contexts.len(),
            drug = state.drug.as_deref().unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );
        Ok(state)
    }

    fn route_intent(&self, mut state: PipelineState) -> Result<PipelineState, AppError> {
        let messages = [
            ChatMessage::system(prompts::intent_system_prompt()),
            ChatMessage::user(prompts::intent_user_prompt(&state.query)),
        ];
        let reply = self.llm.complete(&messages)?;

        let mut sections = match intent::parse_intent(&reply) {
            Ok(routed) => {
                if routed.drug.is_some() {
                    state.drug = routed.drug;
                }
                routed.sections
            }
            Err(reason) => {
                warn!(reason = %reason, "intent reply was not valid JSON; using defaults");
                state.error = Some(format!("intent routing fell back to defaults: {reason}"));
                Vec::new()
            }
        };
        if sections.is_empty() {
            sections = Section::FALLBACK.to_vec();
        }
        debug!(drug = ?state.drug, sections = sections.len(), "routed intent");
        state.target_sections = sections;
        Ok(state)
    }

    fn retrieve(&self, mut state: PipelineState) -> Result<PipelineState, AppError> {
        let query_vector = self.embeddings.embed(&state.query)?;
        let sections = if state.target_sections.is_empty() {
            None
        } else {
            Some(state.target_sections.as_slice())
        };
        state.contexts = self.index.search(
            &query_vector,
            self.config.retrieval_top_k,
            state.drug.as_deref(),
            sections,
        )?;
        Ok(state)
    }

    fn answer(&self, mut state: PipelineState) -> Result<PipelineState, AppError> {
        if state.contexts.is_empty() {
            state.draft = NO_CONTEXT_ANSWER.to_string();
            state.confidence = 0.0;
            return Ok(state);
        }
        let messages = [
            ChatMessage::system(prompts::ANSWER_SYSTEM),
            ChatMessage::user(prompts::answer_user_prompt(&state.query, &state.contexts)),
        ];
        state.draft = self.llm.complete(&messages)?;
        Ok(state)
    }

    fn verify(&self, mut state: PipelineState) -> Result<PipelineState, AppError> {
        let verdict = guardrails::verify_draft(
            &state.draft,
            !state.contexts.is_empty(),
            self.config.confidence_threshold,
        );
        if !verdict.cited && verdict.answer != state.draft {
            debug!(confidence = verdict.confidence, "ungrounded draft replaced by fallback");
        }
        state.confidence = verdict.confidence;
        state.answer = verdict.answer;
        Ok(state)
    }

    fn finalize(&self, mut state: PipelineState) -> Result<PipelineState, AppError> {
        state.answer = guardrails::with_disclaimer(std::mem::take(&mut state.answer));
        Ok(state)
    }
}
