//! Hierarchical summarizing indexer for retrieval-augmented generation.
//!
//! Documents are split into token-budgeted chunks, summarized depth by depth
//! until a single root summary remains, and every chunk is stored with its
//! embedding and its edges in a SQLite node store.

pub mod config;
pub mod error;
pub mod library;
pub mod llm;
pub mod rag;
pub mod tokenizer;

pub use config::Config;
pub use error::{ErrorKind, IndexError, IndexResult};
pub use library::{index_paths, Capabilities, IndexedFile, Library};
