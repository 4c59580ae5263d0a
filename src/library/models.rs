//! Library data models
//!
//! A library is a directory of source files plus the derived summary files
//! produced while indexing them.

use std::path::PathBuf;

use serde::Serialize;

use crate::rag::{ChunkKey, DocumentTree};

/// How a file was indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Text,
}

/// A source file stored in the files directory, ready for a handler.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Sanitized, collision-free name inside the files directory
    pub filename: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Outcome of indexing one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFile {
    pub filename: String,
    pub kind: FileKind,
    /// Key of the root summary chunk
    pub root: Option<ChunkKey>,
    /// Number of depths written, including depth 0
    pub depths: usize,
    pub chunks: usize,
}

impl IndexedFile {
    pub fn new(filename: String, kind: FileKind, tree: &DocumentTree) -> Self {
        Self {
            filename,
            kind,
            root: tree.root().map(|n| n.key),
            depths: tree.levels.iter().filter(|l| !l.is_empty()).count(),
            chunks: tree.nodes.len(),
        }
    }
}
