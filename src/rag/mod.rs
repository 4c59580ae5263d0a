//! RAG indexing: splitting, recursive summarization and the node store.

mod derived;
mod images;
mod index;
mod models;
pub mod prompts;
mod reducer;
mod splitter;

pub use derived::{DerivedText, SEPARATOR};
pub use images::{prepare_image, scaled_dimensions, ImageIndexer, PreparedImage};
#[cfg(test)]
pub(crate) use images::tests::png_bytes as test_png;
pub use index::{content_hash, NodeStore, StoreError};
pub use models::{
    Chunk, ChunkKey, DocumentTree, Edge, EdgeType, NewChunk, SearchHit, StoreStats, TreeNode,
};
pub use prompts::TextKind;
pub use reducer::{Reducer, SourceDocument};
pub use splitter::{Boundary, Splitter, DEFAULT_BOUNDARIES};
