use rxqa_core::config::Settings;
use rxqa_core::domain::{Chunk, DrugDocument, Section};
use rxqa_core::error::AppError;

mod tiktoken;

pub use tiktoken::TiktokenTokenizer;

/// Token codec the chunker windows over. `decode` must reproduce the text of
/// any contiguous window it is given; a character cut by the window edge may
/// come back as U+FFFD.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String, AppError>;
}

/// Window geometry for ingestion, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Split `text` into windows of `chunk_size` tokens, each starting
/// `chunk_size - overlap` tokens after the previous one.
///
/// Blank input yields no chunks. Input that fits in one window is returned
/// verbatim rather than re-decoded. The last window may be short.
pub fn chunk_text(
    tokenizer: &dyn Tokenizer,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, AppError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(AppError::new(
            "CHUNK_CONFIG_INVALID",
            "chunk_size must be positive and larger than overlap",
        )
        .with_details(format!("chunk_size={chunk_size}; overlap={overlap}")));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokens = tokenizer.encode(text);
    if tokens.len() <= chunk_size {
        return Ok(vec![text.to_string()]);
    }

    let stride = chunk_size - overlap;
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        out.push(tokenizer.decode(&tokens[start..end])?);
        if end >= tokens.len() {
            break;
        }
        start += stride;
    }
    Ok(out)
}

/// Derive the chunks of every section of `doc`, in section-id order.
pub fn chunk_document(
    tokenizer: &dyn Tokenizer,
    doc: &DrugDocument,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, AppError> {
    let mut chunks = Vec::new();
    for (section_id, text) in doc.sections.iter() {
        let section = Section::from_loinc_code(section_id);
        let pieces = chunk_text(tokenizer, text, chunk_size, overlap).map_err(|e| {
            AppError::wrap("CHUNK_FAILED", "Failed to chunk label section", &e)
        })?;
        for (idx, piece) in pieces.into_iter().enumerate() {
            chunks.push(Chunk {
                drug_name: doc.drug_name.clone(),
                setid: doc.setid.clone(),
                ndc_codes: doc.ndc_codes.clone(),
                version: doc.version,
                section,
                section_id: section_id.clone(),
                url: doc.url.clone(),
                text: piece,
                chunk_index: idx as u32,
            });
        }
    }
    Ok(chunks)
}
