//! Data models for RAG operations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned chunk identifier.
pub type ChunkKey = i64;

/// A chunk to be written. Content is hashed and embedded by the store but
/// not kept there; it lives in `filename` at `chunk_begin..chunk_end`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub filename: String,
    pub chunk_begin: usize,
    pub chunk_end: usize,
    pub depth: u32,
    pub original_filename: String,
    pub original_begin: usize,
    pub original_end: usize,
    pub keywords: Vec<String>,
    pub content: String,
}

/// A persisted chunk row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub key: ChunkKey,
    pub filename: String,
    pub chunk_begin: usize,
    pub chunk_end: usize,
    pub depth: u32,
    pub original_filename: String,
    pub original_begin: usize,
    pub original_end: usize,
    /// SHA-256 of the content, 64 hex characters
    pub content_hash: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub keywords: Vec<String>,
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Relation type of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// From a chunk to the summary that covers it
    Parent,
    Previous,
    /// From a chunk to the following chunk at the same depth
    Next,
    Supports,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Parent => "parent",
            EdgeType::Previous => "previous",
            EdgeType::Next => "next",
            EdgeType::Supports => "supports",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(EdgeType::Parent),
            "previous" => Ok(EdgeType::Previous),
            "next" => Ok(EdgeType::Next),
            "supports" => Ok(EdgeType::Supports),
            other => Err(format!("Unknown edge type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub chunk_from: ChunkKey,
    pub chunk_to: ChunkKey,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub strength: f64,
}

/// Result from a similarity search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity (higher is more similar)
    pub score: f32,
}

/// Statistics about the node store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub chunk_count: u64,
    pub edge_count: u64,
    pub document_count: u64,
    pub max_depth: Option<u32>,
    pub dimensions: usize,
}

/// In-memory view of one chunk produced while indexing a document.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub key: ChunkKey,
    pub depth: u32,
    pub filename: String,
    pub chunk_begin: usize,
    pub chunk_end: usize,
    pub original_begin: usize,
    pub original_end: usize,
    pub keywords: Vec<String>,
    pub content: String,
}

/// Everything written for one document: chunks keyed by store key, the
/// keys of each depth in order, and the edges between them.
#[derive(Debug, Clone, Default)]
pub struct DocumentTree {
    pub nodes: BTreeMap<ChunkKey, TreeNode>,
    pub levels: Vec<Vec<ChunkKey>>,
    pub edges: Vec<Edge>,
}

impl DocumentTree {
    /// The single chunk of the deepest level, once indexing has converged.
    pub fn root(&self) -> Option<&TreeNode> {
        match self.levels.last() {
            Some(level) if level.len() == 1 => self.nodes.get(&level[0]),
            _ => None,
        }
    }

    pub fn depth_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, depth: usize) -> Vec<&TreeNode> {
        self.levels
            .get(depth)
            .map(|keys| keys.iter().filter_map(|k| self.nodes.get(k)).collect())
            .unwrap_or_default()
    }

    /// The summary chunk a chunk was folded into.
    pub fn parent_of(&self, key: ChunkKey) -> Option<ChunkKey> {
        self.edges
            .iter()
            .find(|e| e.chunk_from == key && e.edge_type == EdgeType::Parent)
            .map(|e| e.chunk_to)
    }

    pub(crate) fn push_node(&mut self, node: TreeNode) {
        let depth = node.depth as usize;
        while self.levels.len() <= depth {
            self.levels.push(Vec::new());
        }
        self.levels[depth].push(node.key);
        self.nodes.insert(node.key, node);
    }
}
