//! Node store: chunks and edges in SQLite, with embedding similarity search.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::models::{Chunk, ChunkKey, Edge, EdgeType, NewChunk, SearchHit, StoreStats};
use crate::llm::{Embedder, LlmError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the store refused the write because of a schema rule.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StoreError::DimensionMismatch { .. } => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

const DROP_TABLES_SQL: &str = r#"
    DROP TABLE IF EXISTS edges;
    DROP TABLE IF EXISTS chunks;
"#;

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE chunks (
        key INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        chunk_begin INTEGER NOT NULL CHECK (chunk_begin >= 0),
        chunk_end INTEGER NOT NULL CHECK (chunk_end >= 0),
        depth INTEGER NOT NULL CHECK (depth >= 0),
        original_filename TEXT NOT NULL,
        original_begin INTEGER NOT NULL CHECK (original_begin >= 0),
        original_end INTEGER NOT NULL CHECK (original_end >= 0),
        sha256 TEXT NOT NULL CHECK (length(sha256) = 64),
        embedding BLOB NOT NULL,
        keywords TEXT NOT NULL DEFAULT '[]',
        created TEXT NOT NULL,
        accessed TEXT NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 0 CHECK (access_count >= 0),

        CHECK (chunk_end >= chunk_begin),
        CHECK (original_end >= original_begin)
    );
    CREATE INDEX idx_chunks_original ON chunks(original_filename);

    CREATE TABLE edges (
        chunk_from INTEGER NOT NULL,
        chunk_to INTEGER NOT NULL,
        type TEXT NOT NULL CHECK (length(type) <= 50),
        strength REAL NOT NULL,

        PRIMARY KEY (chunk_from, chunk_to),
        FOREIGN KEY (chunk_from) REFERENCES chunks(key) ON DELETE CASCADE,
        FOREIGN KEY (chunk_to) REFERENCES chunks(key) ON DELETE CASCADE
    );
    CREATE INDEX idx_edges_to ON edges(chunk_to);
"#;

const CHUNK_COLUMNS: &str = "key, filename, chunk_begin, chunk_end, depth, original_filename, \
     original_begin, original_end, sha256, embedding, keywords, created, accessed, access_count";

/// Persistent graph of chunks.
///
/// Similarity search is brute-force cosine over all stored embeddings,
/// which is adequate for a per-user document collection.
pub struct NodeStore {
    conn: Connection,
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
    db_path: Option<PathBuf>,
}

impl NodeStore {
    /// Open (or create) the store at the given path.
    pub fn open(
        db_path: &Path,
        dimensions: usize,
        embedder: Arc<dyn Embedder>,
        busy_timeout: Duration,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        // Workers write through separate connections
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::init(conn, dimensions, embedder, Some(db_path.to_path_buf()))
    }

    /// Private in-memory store, mostly for tests.
    pub fn open_in_memory(dimensions: usize, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, dimensions, embedder, None)
    }

    fn init(
        conn: Connection,
        dimensions: usize,
        embedder: Arc<dyn Embedder>,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn,
            embedder,
            dimensions,
            db_path,
        };
        if !store.tables_exist()? {
            log::info!("Creating node store tables");
            store.reset()?;
        }
        Ok(store)
    }

    fn tables_exist(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('chunks', 'edges')",
            [],
            |row| row.get(0),
        )?;
        Ok(count == 2)
    }

    /// Drop and recreate both tables. Destroys all data.
    pub fn reset(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!("BEGIN;{}{}COMMIT;", DROP_TABLES_SQL, CREATE_TABLES_SQL))
            .map_err(|e| {
                let _ = self.conn.execute_batch("ROLLBACK;");
                StoreError::from(e)
            })?;
        log::info!("Node store reset");
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Hash, embed and insert a chunk. Returns the new key.
    pub fn create(&self, chunk: &NewChunk) -> Result<ChunkKey> {
        let embedding = self.embedder.embed(&chunk.content)?;
        self.check_dimensions(&embedding)?;

        let keywords = serde_json::to_string(&chunk.keywords)?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO chunks (filename, chunk_begin, chunk_end, depth, original_filename, \
             original_begin, original_end, sha256, embedding, keywords, created, accessed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                chunk.filename,
                chunk.chunk_begin as i64,
                chunk.chunk_end as i64,
                chunk.depth,
                chunk.original_filename,
                chunk.original_begin as i64,
                chunk.original_end as i64,
                content_hash(&chunk.content),
                serialize_embedding(&embedding),
                keywords,
                now,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Run `f` in one transaction. Nothing it wrote survives an error.
    pub fn atomically<T, E>(
        &self,
        f: impl FnOnce(&Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self.conn.unchecked_transaction().map_err(StoreError::from)?;
        // Dropping `tx` on the error path rolls back
        let value = f(self)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn add_edge(
        &self,
        from: ChunkKey,
        to: ChunkKey,
        edge_type: EdgeType,
        strength: f64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO edges (chunk_from, chunk_to, type, strength) VALUES (?1, ?2, ?3, ?4)",
            params![from, to, edge_type.as_str(), strength],
        )?;
        Ok(())
    }

    /// Fetch a chunk, counting the access.
    pub fn get(&self, key: ChunkKey) -> Result<Option<Chunk>> {
        self.touch(&[key])?;
        self.conn
            .query_row(
                &format!("SELECT {} FROM chunks WHERE key = ?1", CHUNK_COLUMNS),
                params![key],
                read_row,
            )
            .optional()?
            .map(RawChunk::into_chunk)
            .transpose()
    }

    /// All chunks of one source document, shallowest first.
    pub fn chunks_for_file(&self, original_filename: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE original_filename = ?1 ORDER BY depth, chunk_begin, key",
            CHUNK_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![original_filename], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawChunk::into_chunk).collect()
    }

    pub fn edges_from(&self, key: ChunkKey) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_from, chunk_to, type, strength FROM edges WHERE chunk_from = ?1 \
             ORDER BY chunk_to",
        )?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(chunk_from, chunk_to, edge_type, strength)| {
                Ok(Edge {
                    chunk_from,
                    chunk_to,
                    edge_type: edge_type.parse().map_err(StoreError::Corrupt)?,
                    strength,
                })
            })
            .collect()
    }

    /// Root chunk of a document, if and only if indexing completed.
    ///
    /// A completed document has exactly one chunk at its deepest depth,
    /// that chunk covers the whole original file, and every other chunk of
    /// the document points to a summary through a `parent` edge.
    pub fn find_root(&self, original_filename: &str, original_len: usize) -> Result<Option<Chunk>> {
        let chunks = self.chunks_for_file(original_filename)?;
        let Some(max_depth) = chunks.iter().map(|c| c.depth).max() else {
            return Ok(None);
        };

        let mut top = chunks.iter().filter(|c| c.depth == max_depth);
        let (Some(root), None) = (top.next(), top.next()) else {
            return Ok(None);
        };
        if root.original_begin != 0 || root.original_end != original_len {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT e.chunk_from FROM edges e JOIN chunks c ON c.key = e.chunk_from \
             WHERE c.original_filename = ?1 AND e.type = 'parent'",
        )?;
        let with_parent: HashSet<ChunkKey> = stmt
            .query_map(params![original_filename], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let complete = !with_parent.contains(&root.key)
            && chunks
                .iter()
                .filter(|c| c.key != root.key)
                .all(|c| with_parent.contains(&c.key));

        Ok(complete.then(|| root.clone()))
    }

    /// Remove every chunk of a document; edges go with them.
    pub fn delete_file(&self, original_filename: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM chunks WHERE original_filename = ?1",
            params![original_filename],
        )?;
        Ok(removed)
    }

    /// Nearest chunks to `embedding` by cosine similarity, best first.
    pub fn similarity_search(&self, embedding: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        self.check_dimensions(embedding)?;

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM chunks", CHUNK_COLUMNS))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut scored: Vec<SearchHit> = Vec::with_capacity(rows.len());
        for raw in rows {
            let chunk = raw.into_chunk()?;
            let score = cosine_similarity(embedding, &chunk.embedding);
            scored.push(SearchHit { chunk, score });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        let keys: Vec<ChunkKey> = scored.iter().map(|h| h.chunk.key).collect();
        let now = self.touch(&keys)?;
        for hit in &mut scored {
            hit.chunk.accessed = now;
            hit.chunk.access_count += 1;
        }
        Ok(scored)
    }

    /// Embed `query` and search with it.
    pub fn search_text(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let embedding = self.embedder.embed(query)?;
        self.similarity_search(&embedding, limit)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (chunk_count, document_count, max_depth): (i64, i64, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT original_filename), MAX(depth) FROM chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
        let edge_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;

        Ok(StoreStats {
            chunk_count: chunk_count as u64,
            edge_count: edge_count as u64,
            document_count: document_count as u64,
            max_depth: max_depth.map(|d| d as u32),
            dimensions: self.dimensions,
        })
    }

    /// Bump access bookkeeping and return the access time written.
    fn touch(&self, keys: &[ChunkKey]) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let mut stmt = self.conn.prepare(
            "UPDATE chunks SET accessed = ?1, access_count = access_count + 1 WHERE key = ?2",
        )?;
        for key in keys {
            stmt.execute(params![stamp, key])?;
        }
        Ok(now)
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

/// Row as stored, before decoding JSON, blobs and timestamps.
struct RawChunk {
    key: i64,
    filename: String,
    chunk_begin: i64,
    chunk_end: i64,
    depth: i64,
    original_filename: String,
    original_begin: i64,
    original_end: i64,
    sha256: String,
    embedding: Vec<u8>,
    keywords: String,
    created: String,
    accessed: String,
    access_count: i64,
}

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<RawChunk> {
    Ok(RawChunk {
        key: row.get(0)?,
        filename: row.get(1)?,
        chunk_begin: row.get(2)?,
        chunk_end: row.get(3)?,
        depth: row.get(4)?,
        original_filename: row.get(5)?,
        original_begin: row.get(6)?,
        original_end: row.get(7)?,
        sha256: row.get(8)?,
        embedding: row.get(9)?,
        keywords: row.get(10)?,
        created: row.get(11)?,
        accessed: row.get(12)?,
        access_count: row.get(13)?,
    })
}

impl RawChunk {
    fn into_chunk(self) -> Result<Chunk> {
        Ok(Chunk {
            key: self.key,
            filename: self.filename,
            chunk_begin: self.chunk_begin as usize,
            chunk_end: self.chunk_end as usize,
            depth: self.depth as u32,
            original_filename: self.original_filename,
            original_begin: self.original_begin as usize,
            original_end: self.original_end as usize,
            content_hash: self.sha256,
            embedding: deserialize_embedding(&self.embedding),
            keywords: serde_json::from_str(&self.keywords)?,
            created: parse_timestamp(&self.created)?,
            accessed: parse_timestamp(&self.accessed)?,
            access_count: self.access_count as u64,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", raw, e)))
}

/// SHA-256 of the content as 64 lowercase hex characters.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Store embedding as binary blob (f32 little-endian)
fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Calculate cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }

    dot_product / denominator
}
