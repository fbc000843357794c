use rxqa_core::domain::DrugDocument;
use rxqa_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunking::{chunk_document, ChunkConfig, Tokenizer};
use crate::embeddings::EmbeddingGateway;
use crate::index::VectorIndex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub setid: String,
    pub version: i64,
    pub chunks: usize,
    pub keys: Vec<String>,
    pub purged: usize,
}

/// Chunk, embed and store one label, then drop records left behind by older
/// versions of the same set id.
///
/// All chunks are embedded in a single batch before anything is written, so
/// a provider failure leaves the index untouched.
pub fn ingest_document(
    doc: &DrugDocument,
    tokenizer: &dyn Tokenizer,
    chunking: &ChunkConfig,
    embeddings: &EmbeddingGateway,
    index: &VectorIndex,
) -> Result<IngestSummary, AppError> {
    if doc.setid.trim().is_empty() {
        return Err(AppError::new("INGEST_INVALID_DOCUMENT", "Label set id is required")
            .with_details(format!("drug={}", doc.drug_name)));
    }

    let chunks = chunk_document(tokenizer, doc, chunking.chunk_size, chunking.chunk_overlap)?;
    debug!(setid = %doc.setid, sections = doc.sections.len(), chunks = chunks.len(), "chunked label");

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embeddings
        .embed_batch(&texts)
        .map_err(|e| AppError::wrap("INGEST_EMBED_FAILED", "Failed to embed label chunks", &e))?;

    let mut keys = Vec::with_capacity(chunks.len());
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        keys.push(index.upsert(chunk, vector)?);
    }

    let purged = index.purge_superseded(&doc.setid, doc.version)?;

    info!(
        drug = %doc.drug_name,
        setid = %doc.setid,
        version = doc.version,
        chunks = chunks.len(),
        purged,
        "ingested label"
    );
    Ok(IngestSummary {
        setid: doc.setid.clone(),
        version: doc.version,
        chunks: chunks.len(),
        keys,
        purged,
    })
}
