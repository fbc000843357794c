pub mod chunking;
pub mod embeddings;
pub mod evals;
pub mod guardrails;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod provider;
