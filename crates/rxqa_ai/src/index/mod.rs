use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rxqa_core::clock::now_rfc3339_utc;
use rxqa_core::db;
use rxqa_core::domain::{Chunk, IndexedRecord, RetrievedContext, Section};
use rxqa_core::error::AppError;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

mod filter;
pub mod similarity;

pub use filter::{drug_key, SearchFilter};

/// Durable store of embedded label chunks with filtered nearest-neighbor
/// search. Safe to share between threads; writes to distinct keys never
/// conflict.
pub struct VectorIndex {
    conn: Mutex<Connection>,
    dims: u32,
}

/// `doc:{setid}:{section}:{version}:{sha256(text)[..8]}`
pub fn record_key(chunk: &Chunk) -> String {
    let digest = hex::encode(Sha256::digest(chunk.text.as_bytes()));
    format!(
        "doc:{}:{}:{}:{}",
        chunk.setid,
        chunk.section,
        chunk.version,
        &digest[..8]
    )
}

struct Candidate {
    key: String,
    section: String,
    section_id: String,
    url: String,
    text: String,
    distance: f32,
}

impl VectorIndex {
    pub fn open(path: &Path, dims: u32) -> Result<Self, AppError> {
        Ok(Self {
            conn: Mutex::new(db::open(path)?),
            dims,
        })
    }

    pub fn open_in_memory(dims: u32) -> Result<Self, AppError> {
        Ok(Self {
            conn: Mutex::new(db::open_in_memory()?),
            dims,
        })
    }

    pub fn dims(&self) -> u32 {
        self.dims
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::new("INDEX_LOCK_POISONED", "Vector index lock was poisoned"))
    }

    /// Provision the schema. With `drop_existing`, the previous index and
    /// all of its records are removed first (a missing index is fine).
    pub fn create_index(&self, drop_existing: bool) -> Result<(), AppError> {
        let mut conn = self.lock()?;
        if drop_existing {
            if let Err(e) = db::drop_schema(&mut conn) {
                warn!(error = %e, "dropping existing index failed; continuing");
            }
        }
        db::migrate(&mut conn)?;

        let stored = stored_dims(&conn)?;
        match stored {
            Some(d) if d != self.dims => {
                return Err(AppError::new(
                    "INDEX_DIMENSION_MISMATCH",
                    "Existing index was created with a different embedding dimension",
                )
                .with_details(format!("index_dims={d}; configured_dims={}", self.dims)));
            }
            Some(_) => {}
            None => {
                let created_at = now_rfc3339_utc()?;
                conn.execute(
                    "INSERT INTO index_meta(name, value) VALUES ('dims', ?1), ('created_at', ?2)",
                    params![self.dims.to_string(), created_at],
                )
                .map_err(|e| {
                    AppError::new("INDEX_CREATE_FAILED", "Failed to record index metadata")
                        .with_details(e.to_string())
                })?;
            }
        }
        info!(dims = self.dims, drop_existing, "vector index ready");
        Ok(())
    }

    /// Write `chunk` at its content-derived key, replacing any record there.
    pub fn upsert(&self, chunk: &Chunk, embedding: &[f32]) -> Result<String, AppError> {
        if embedding.len() != self.dims as usize {
            return Err(AppError::new(
                "INDEX_DIMENSION_MISMATCH",
                "Embedding dimension does not match the index",
            )
            .with_details(format!(
                "index_dims={}; embedding_dims={}",
                self.dims,
                embedding.len()
            )));
        }
        if chunk.text.trim().is_empty() {
            return Err(AppError::new("INDEX_WRITE_FAILED", "Chunk text must not be empty")
                .with_details(format!("setid={}; section_id={}", chunk.setid, chunk.section_id)));
        }

        let key = record_key(chunk);
        let codes = serde_json::to_string(&chunk.ndc_codes).map_err(|e| {
            AppError::new("INDEX_WRITE_FAILED", "Failed to encode product codes")
                .with_details(e.to_string())
        })?;

        let mut conn = self.lock()?;
        self.ensure_ready(&conn)?;

        let write_err = |e: rusqlite::Error| {
            AppError::new("INDEX_WRITE_FAILED", "Failed to write index record")
                .with_details(format!("key={key}; err={e}"))
        };
        let tx = conn.transaction().map_err(write_err)?;
        tx.execute(
            r#"
            INSERT INTO records(key, drug_name, drug_key, setid, ndc_codes, version, section,
                                section_id, url, text, chunk_index, embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(key) DO UPDATE SET
              drug_name = excluded.drug_name,
              drug_key = excluded.drug_key,
              setid = excluded.setid,
              ndc_codes = excluded.ndc_codes,
              version = excluded.version,
              section = excluded.section,
              section_id = excluded.section_id,
              url = excluded.url,
              text = excluded.text,
              chunk_index = excluded.chunk_index,
              embedding = excluded.embedding
            "#,
            params![
                key,
                chunk.drug_name,
                drug_key(&chunk.drug_name),
                chunk.setid,
                codes,
                chunk.version,
                chunk.section.as_str(),
                chunk.section_id,
                chunk.url,
                chunk.text,
                chunk.chunk_index as i64,
                similarity::encode_vector(embedding),
            ],
        )
        .map_err(write_err)?;
        tx.execute("DELETE FROM records_fts WHERE key = ?1", [&key])
            .map_err(write_err)?;
        tx.execute(
            "INSERT INTO records_fts(key, text) VALUES (?1, ?2)",
            params![key, chunk.text],
        )
        .map_err(write_err)?;
        tx.commit().map_err(write_err)?;

        debug!(key = %key, "upserted record");
        Ok(key)
    }

    /// Filtered k-nearest-neighbor search.
    ///
    /// The `top_k` nearest records matching the filter are taken in
    /// ascending cosine distance, then only the first hit per `section_id`
    /// is kept. The result can therefore hold fewer than `top_k` contexts
    /// even when more records match.
    pub fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        drug_filter: Option<&str>,
        section_filter: Option<&[Section]>,
    ) -> Result<Vec<RetrievedContext>, AppError> {
        if query_embedding.len() != self.dims as usize {
            return Err(AppError::new(
                "RETRIEVAL_FAILED",
                "Query embedding dims do not match index dims",
            )
            .with_details(format!(
                "index_dims={}; query_dims={}",
                self.dims,
                query_embedding.len()
            )));
        }
        let qnorm = similarity::l2_norm(query_embedding);
        if qnorm == 0.0 {
            return Err(AppError::new("RETRIEVAL_FAILED", "Query embedding norm is zero"));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let filter = SearchFilter::new(drug_filter, section_filter);
        let (clause, filter_params) = filter.to_sql();

        let conn = self
            .lock()
            .map_err(|e| AppError::wrap("RETRIEVAL_FAILED", "Vector index is unavailable", &e))?;
        self.ensure_ready(&conn)
            .map_err(|e| AppError::wrap("RETRIEVAL_FAILED", "Vector index is unavailable", &e))?;

        let search_err = |e: rusqlite::Error| {
            AppError::new("RETRIEVAL_FAILED", "Vector search query failed")
                .with_details(format!("filter={clause}; err={e}"))
        };
        let sql = format!(
            "SELECT key, section, section_id, url, text, embedding FROM records WHERE {clause}"
        );
        let mut stmt = conn.prepare(&sql).map_err(search_err)?;
        let rows = stmt
            .query_map(params_from_iter(filter_params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })
            .map_err(search_err)?;

        let mut candidates: Vec<Candidate> = Vec::new();
        for r in rows {
            let (key, section, section_id, url, text, blob) = r.map_err(search_err)?;
            let v = similarity::decode_vector(&blob)
                .filter(|v| v.len() == self.dims as usize)
                .ok_or_else(|| {
                    AppError::new("RETRIEVAL_FAILED", "Index vector is corrupt or mis-sized")
                        .with_details(format!("key={key}"))
                })?;
            candidates.push(Candidate {
                distance: similarity::cosine_distance(query_embedding, qnorm, &v),
                key,
                section,
                section_id,
                url,
                text,
            });
        }
        let matched = candidates.len();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        candidates.truncate(top_k);

        let mut seen_sections: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for c in candidates {
            if !seen_sections.insert(c.section_id.clone()) {
                continue;
            }
            out.push(RetrievedContext {
                section: Section::from_name(&c.section).unwrap_or(Section::Other),
                score: 1.0 - c.distance,
                text: c.text,
                section_id: c.section_id,
                url: c.url,
            });
        }

        debug!(
            matched,
            returned = out.len(),
            filtered = !filter.matches_all(),
            "vector search"
        );
        Ok(out)
    }

    /// Keyword search over chunk text, best bm25 match first. Any term may
    /// match; punctuation in `query` is ignored.
    pub fn search_text(&self, query: &str, limit: usize) -> Result<Vec<RetrievedContext>, AppError> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let expr = terms.join(" OR ");

        let conn = self
            .lock()
            .map_err(|e| AppError::wrap("RETRIEVAL_FAILED", "Vector index is unavailable", &e))?;
        self.ensure_ready(&conn)
            .map_err(|e| AppError::wrap("RETRIEVAL_FAILED", "Vector index is unavailable", &e))?;

        let search_err = |e: rusqlite::Error| {
            AppError::new("RETRIEVAL_FAILED", "Full-text query failed")
                .with_details(format!("match={expr}; err={e}"))
        };
        let mut stmt = conn
            .prepare(
                r#"
                SELECT r.section, r.section_id, r.url, r.text, bm25(records_fts) AS relevance
                FROM records_fts
                JOIN records r ON r.key = records_fts.key
                WHERE records_fts MATCH ?1
                ORDER BY relevance ASC, r.key ASC
                LIMIT ?2
                "#,
            )
            .map_err(search_err)?;
        let rows = stmt
            .query_map(params![expr, limit as i64], |row| {
                let section: String = row.get(0)?;
                let relevance: f64 = row.get(4)?;
                Ok(RetrievedContext {
                    section: Section::from_name(&section).unwrap_or(Section::Other),
                    section_id: row.get(1)?,
                    url: row.get(2)?,
                    text: row.get(3)?,
                    score: -relevance as f32,
                })
            })
            .map_err(search_err)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(search_err)?);
        }
        Ok(out)
    }

    pub fn get(&self, key: &str) -> Result<Option<IndexedRecord>, AppError> {
        let conn = self.lock()?;
        self.ensure_ready(&conn)?;
        let read_err = |e: rusqlite::Error| {
            AppError::new("INDEX_READ_FAILED", "Failed to read index record")
                .with_details(format!("key={key}; err={e}"))
        };
        let row = conn
            .query_row(
                r#"
                SELECT drug_name, setid, ndc_codes, version, section, section_id, url, text,
                       chunk_index, embedding
                FROM records WHERE key = ?1
                "#,
                [key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, Vec<u8>>(9)?,
                    ))
                },
            )
            .optional()
            .map_err(read_err)?;

        let Some((drug_name, setid, codes, version, section, section_id, url, text, chunk_index, blob)) =
            row
        else {
            return Ok(None);
        };
        let ndc_codes: Vec<String> = serde_json::from_str(&codes).map_err(|e| {
            AppError::new("INDEX_READ_FAILED", "Failed to decode product codes")
                .with_details(format!("key={key}; err={e}"))
        })?;
        let embedding = similarity::decode_vector(&blob).ok_or_else(|| {
            AppError::new("INDEX_READ_FAILED", "Stored embedding is corrupt")
                .with_details(format!("key={key}"))
        })?;

        Ok(Some(IndexedRecord {
            key: key.to_string(),
            chunk: Chunk {
                drug_name,
                setid,
                ndc_codes,
                version,
                section: Section::from_name(&section).unwrap_or(Section::Other),
                section_id,
                url,
                text,
                chunk_index: chunk_index.max(0) as u32,
            },
            embedding,
        }))
    }

    /// Remove records of `setid` whose version is older than
    /// `current_version`. Returns the number of records removed.
    pub fn purge_superseded(&self, setid: &str, current_version: i64) -> Result<usize, AppError> {
        let mut conn = self.lock()?;
        self.ensure_ready(&conn)?;
        let write_err = |e: rusqlite::Error| {
            AppError::new("INDEX_WRITE_FAILED", "Failed to purge superseded records")
                .with_details(format!("setid={setid}; version={current_version}; err={e}"))
        };
        let tx = conn.transaction().map_err(write_err)?;
        tx.execute(
            "DELETE FROM records_fts WHERE key IN (SELECT key FROM records WHERE setid = ?1 AND version < ?2)",
            params![setid, current_version],
        )
        .map_err(write_err)?;
        let removed = tx
            .execute(
                "DELETE FROM records WHERE setid = ?1 AND version < ?2",
                params![setid, current_version],
            )
            .map_err(write_err)?;
        tx.commit().map_err(write_err)?;
        if removed > 0 {
            info!(setid, current_version, removed, "purged superseded records");
        }
        Ok(removed)
    }

    /// Number of stored records; 0 when the index is missing or unreadable.
    pub fn count(&self) -> u64 {
        let Ok(conn) = self.lock() else {
            return 0;
        };
        conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .unwrap_or(0)
    }

    pub fn ping(&self) -> bool {
        match self.lock() {
            Ok(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            Err(_) => false,
        }
    }

    fn ensure_ready(&self, conn: &Connection) -> Result<(), AppError> {
        if !db::table_exists(conn, "index_meta")? {
            return Err(AppError::new(
                "INDEX_NOT_FOUND",
                "Vector index has not been created",
            ));
        }
        match stored_dims(conn)? {
            Some(d) if d == self.dims => Ok(()),
            Some(d) => Err(AppError::new(
                "INDEX_DIMENSION_MISMATCH",
                "Existing index was created with a different embedding dimension",
            )
            .with_details(format!("index_dims={d}; configured_dims={}", self.dims))),
            None => Err(AppError::new(
                "INDEX_NOT_FOUND",
                "Vector index metadata is missing",
            )),
        }
    }
}

fn stored_dims(conn: &Connection) -> Result<Option<u32>, AppError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE name = 'dims'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| {
            AppError::new("INDEX_READ_FAILED", "Failed to read index metadata")
                .with_details(e.to_string())
        })?;
    raw.map(|v| {
        v.parse::<u32>().map_err(|e| {
            AppError::new("INDEX_READ_FAILED", "Index metadata is corrupt")
                .with_details(format!("dims={v}; err={e}"))
        })
    })
    .transpose()
}
