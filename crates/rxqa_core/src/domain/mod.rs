use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod section;

pub use section::Section;

/// Parsed drug label handed over by ingestion: section-id -> normalized text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrugDocument {
    pub drug_name: String,
    pub setid: String,
    #[serde(default)]
    pub ndc_codes: Vec<String>,
    #[serde(default = "default_version")]
    pub version: i64,
    pub url: String,
    #[serde(default)]
    pub sections: BTreeMap<String, String>,
}

fn default_version() -> i64 {
    1
}

/// Immutable unit of retrievable label text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub drug_name: String,
    pub setid: String,
    #[serde(default)]
    pub ndc_codes: Vec<String>,
    pub version: i64,
    pub section: Section,
    pub section_id: String,
    pub url: String,
    pub text: String,
    pub chunk_index: u32,
}

/// A chunk as persisted in the vector index, with its storage key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    pub key: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Search hit projected for prompting and for the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedContext {
    pub text: String,
    pub section: Section,
    pub section_id: String,
    pub url: String,
    /// `1 - cosine distance`; higher is more relevant.
    pub score: f32,
}

impl RetrievedContext {
    /// `[Section: <name>] (<url>#section=<section_id>)`
    pub fn citation(&self) -> String {
        format!(
            "[Section: {}] ({}#section={})",
            self.section, self.url, self.section_id
        )
    }
}
