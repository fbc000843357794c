use std::fmt;

use rxqa_core::domain::{RetrievedContext, Section};
use serde::{Deserialize, Serialize};

/// Request-scoped record threaded through the stages by value.
///
/// Ownership: `query` is set at entry; `drug`, `target_sections` and
/// `error` by routing; `contexts` by retrieval; `draft` by answering;
/// `confidence` by answering (short circuit) and verification; `answer` by
/// verification and finalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    pub query: String,
    pub drug: Option<String>,
    pub target_sections: Vec<Section>,
    pub contexts: Vec<RetrievedContext>,
    pub draft: String,
    pub confidence: f32,
    pub answer: String,
    /// Recoverable diagnostics (e.g. an unparseable routing reply).
    pub error: Option<String>,
}

impl PipelineState {
    pub fn new(query: impl Into<String>, drug: Option<String>) -> Self {
        Self {
            query: query.into(),
            drug: drug.filter(|d| !d.trim().is_empty()),
            target_sections: Vec::new(),
            contexts: Vec::new(),
            draft: String::new(),
            confidence: 0.0,
            answer: String::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RouteIntent,
    Retrieve,
    Answer,
    Verify,
    Finalize,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::RouteIntent => "route_intent",
            Stage::Retrieve => "retrieve",
            Stage::Answer => "answer",
            Stage::Verify => "verify",
            Stage::Finalize => "finalize",
        }
    }

    /// Error code for a failure raised inside this stage.
    pub fn failure_code(&self) -> String {
        format!("PIPELINE_{}_FAILED", self.name().to_ascii_uppercase())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
