//! File handlers, tried in order until one accepts a file.

use std::sync::Arc;

use super::models::{FileKind, SourceFile};
use crate::config::{Config, IndexerConfig};
use crate::error::{IndexError, IndexResult};
use crate::llm::{Completion, Embedder, OpenAiClient};
use crate::rag::{DocumentTree, ImageIndexer, NodeStore, Reducer, SourceDocument, TextKind};
use crate::tokenizer::{self, Tokenize};

/// Remote and local capabilities shared by every worker.
#[derive(Clone)]
pub struct Capabilities {
    pub completion: Arc<dyn Completion>,
    pub embedder: Arc<dyn Embedder>,
    pub tokenizer: Arc<dyn Tokenize>,
}

impl Capabilities {
    /// One OpenAI-compatible client for completion and embeddings, and the
    /// configured tokenizer.
    pub fn from_config(config: &Config) -> IndexResult<Self> {
        let client = Arc::new(OpenAiClient::new(&config.llm)?);
        Ok(Self {
            completion: client.clone(),
            embedder: client,
            tokenizer: tokenizer::load(config.indexer.tokenizer_json.as_deref())?,
        })
    }
}

/// Everything a handler may use while indexing one file.
pub struct IndexContext<'a> {
    pub llm: &'a dyn Completion,
    pub tokenizer: &'a dyn Tokenize,
    pub store: &'a NodeStore,
    pub config: &'a IndexerConfig,
}

pub trait FileHandler: Send + Sync {
    fn kind(&self) -> FileKind;

    /// Cheap check on the raw bytes. A handler that declines is skipped.
    fn classify(&self, bytes: &[u8]) -> bool;

    /// Index the file. `InvalidInput` lets the next handler try.
    fn index(&self, ctx: &IndexContext, file: &SourceFile) -> IndexResult<DocumentTree>;
}

pub struct ImageHandler;

impl FileHandler for ImageHandler {
    fn kind(&self) -> FileKind {
        FileKind::Image
    }

    fn classify(&self, bytes: &[u8]) -> bool {
        image::guess_format(bytes).is_ok()
    }

    fn index(&self, ctx: &IndexContext, file: &SourceFile) -> IndexResult<DocumentTree> {
        ImageIndexer::new(ctx.llm, ctx.store, ctx.config).index(&file.filename, &file.bytes)
    }
}

pub struct TextHandler;

impl FileHandler for TextHandler {
    fn kind(&self) -> FileKind {
        FileKind::Text
    }

    fn classify(&self, bytes: &[u8]) -> bool {
        std::str::from_utf8(bytes).is_ok()
    }

    fn index(&self, ctx: &IndexContext, file: &SourceFile) -> IndexResult<DocumentTree> {
        let text = std::str::from_utf8(&file.bytes)
            .map_err(|e| IndexError::InvalidInput(format!("{} is not UTF-8 text: {}", file.filename, e)))?;

        let doc = SourceDocument {
            filename: file.filename.clone(),
            text: text.to_string(),
        };
        let kind = TextKind::from_filename(&file.filename);
        Reducer::new(ctx.llm, ctx.tokenizer, ctx.store, ctx.config, kind).index(&doc)
    }
}

/// Handlers in priority order.
pub fn default_handlers() -> Vec<Box<dyn FileHandler>> {
    vec![Box::new(ImageHandler), Box::new(TextHandler)]
}
