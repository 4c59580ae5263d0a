//! Recursive summarization of a text document into a tree of chunks.
//!
//! Depth 0 is the source text split into budget-sized pieces. Each pass
//! re-splits the text of the current depth, summarizes every piece (showing
//! the model the end of the previous piece and its summary), writes the
//! summaries to a derived file and to the store, and links every chunk of
//! the current depth to the summary that covers it. Passes repeat until a
//! depth holds a single chunk: the document root.

use std::ops::Range;

use super::derived::DerivedText;
use super::index::NodeStore;
use super::models::{ChunkKey, DocumentTree, Edge, EdgeType, NewChunk, TreeNode};
use super::prompts::{self, TextKind};
use super::splitter::Splitter;
use crate::config::IndexerConfig;
use crate::error::{IndexError, IndexResult};
use crate::llm::{Completion, LlmError, Message};
use crate::tokenizer::{Tokenize, Tokens};

/// A source text to index.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Name of the source file inside the files directory
    pub filename: String,
    pub text: String,
}

/// One chunk of the depth being reduced.
#[derive(Debug, Clone)]
struct LevelChunk {
    key: ChunkKey,
    /// Byte range in the level text
    range: Range<usize>,
    /// Byte range in the source document
    original: Range<usize>,
    keywords: Vec<String>,
}

/// All chunks of one depth together with the text they were cut from.
struct Level {
    depth: u32,
    text: String,
    tokens: Tokens,
    chunks: Vec<LevelChunk>,
}

impl Level {
    fn new(depth: u32, text: String, chunks: Vec<LevelChunk>, tokenizer: &dyn Tokenize) -> Self {
        let tokens = Tokens::new(tokenizer, &text);
        Self {
            depth,
            text,
            tokens,
            chunks,
        }
    }

    /// Chunks whose ranges intersect `range`, with the overlap in bytes.
    fn overlapping(&self, range: &Range<usize>) -> impl Iterator<Item = (&LevelChunk, usize)> + '_ {
        let range = range.clone();
        self.chunks.iter().filter_map(move |c| {
            let overlap = c.range.end.min(range.end).saturating_sub(c.range.start.max(range.start));
            (overlap > 0).then_some((c, overlap))
        })
    }
}

pub struct Reducer<'a> {
    llm: &'a dyn Completion,
    tokenizer: &'a dyn Tokenize,
    store: &'a NodeStore,
    config: &'a IndexerConfig,
    kind: TextKind,
    splitter: Splitter,
}

impl<'a> Reducer<'a> {
    pub fn new(
        llm: &'a dyn Completion,
        tokenizer: &'a dyn Tokenize,
        store: &'a NodeStore,
        config: &'a IndexerConfig,
        kind: TextKind,
    ) -> Self {
        Self {
            llm,
            tokenizer,
            store,
            config,
            kind,
            splitter: Splitter::new(config.chunk_tokens, config.tail_tokens),
        }
    }

    /// Index a document down to its root summary.
    ///
    /// Every chunk is committed as soon as it is produced. On failure the
    /// depths written so far stay in the store, but the document has no
    /// root until it is indexed again.
    pub fn index(&self, doc: &SourceDocument) -> IndexResult<DocumentTree> {
        if doc.text.trim().is_empty() {
            return Err(IndexError::InvalidInput(format!(
                "{} has no text to index",
                doc.filename
            )));
        }
        log::info!("Indexing {} ({} bytes)", doc.filename, doc.text.len());

        let mut tree = DocumentTree::default();
        let mut level = self.ingest(doc, &mut tree)?;

        while level.chunks.len() > 1 {
            if level.depth >= self.config.max_depth {
                return Err(IndexError::Stalled {
                    depth: level.depth,
                    chunks: level.chunks.len(),
                });
            }

            let next = self.reduce_level(doc, &level, &mut tree)?;
            if next.tokens.token_count() >= level.tokens.token_count() {
                log::warn!(
                    "Summaries of {} at depth {} did not shrink ({} -> {} tokens)",
                    doc.filename,
                    next.depth,
                    level.tokens.token_count(),
                    next.tokens.token_count()
                );
                return Err(IndexError::Stalled {
                    depth: level.depth,
                    chunks: level.chunks.len(),
                });
            }
            level = next;
        }

        log::info!(
            "Indexed {}: {} chunks over {} depths",
            doc.filename,
            tree.nodes.len(),
            tree.depth_count()
        );
        Ok(tree)
    }

    /// Split the source into depth-0 chunks and store them.
    fn ingest(&self, doc: &SourceDocument, tree: &mut DocumentTree) -> IndexResult<Level> {
        let tokens = Tokens::new(self.tokenizer, &doc.text);
        let ranges = self.splitter.split(&doc.text, &tokens)?;
        log::info!("{}: {} chunks at depth 0", doc.filename, ranges.len());

        let mut chunks = Vec::with_capacity(ranges.len());
        for range in ranges {
            let content = &doc.text[range.clone()];
            let keywords = if self.wants_keywords(0) {
                self.extract_keywords(content)?
            } else {
                Vec::new()
            };

            let chunk = NewChunk {
                filename: doc.filename.clone(),
                chunk_begin: range.start,
                chunk_end: range.end,
                depth: 0,
                original_filename: doc.filename.clone(),
                original_begin: range.start,
                original_end: range.end,
                keywords,
                content: content.to_string(),
            };
            let key = self.store.create(&chunk)?;
            log::debug!("Stored {}[{:?}] as chunk {}", doc.filename, range, key);

            tree.push_node(tree_node(key, &chunk));
            chunks.push(LevelChunk {
                key,
                range: range.clone(),
                original: range,
                keywords: chunk.keywords,
            });
        }

        self.link_siblings(&chunks, tree)?;
        Ok(Level {
            depth: 0,
            text: doc.text.clone(),
            tokens,
            chunks,
        })
    }

    /// Summarize one depth into the next.
    fn reduce_level(
        &self,
        doc: &SourceDocument,
        level: &Level,
        tree: &mut DocumentTree,
    ) -> IndexResult<Level> {
        let depth = level.depth + 1;
        let pieces = self.splitter.split(&level.text, &level.tokens)?;
        log::info!(
            "{}: summarizing {} chunks into {} at depth {}",
            doc.filename,
            level.chunks.len(),
            pieces.len(),
            depth
        );

        let mut out = DerivedText::create(&self.config.files_dir, &doc.filename, depth)?;
        let mut summaries: Vec<LevelChunk> = Vec::with_capacity(pieces.len());
        if let Err(e) = self.summarize_pieces(doc, level, &pieces, &mut out, &mut summaries, tree) {
            // Chunks already stored keep their file; remove() sweeps it later
            if summaries.is_empty() {
                out.discard();
            }
            return Err(e);
        }

        self.link_parents(level, &pieces, &summaries, tree)?;
        self.link_siblings(&summaries, tree)?;

        Ok(Level::new(depth, out.into_text(), summaries, self.tokenizer))
    }

    /// Summarize `pieces` of the level text into `out`, storing one chunk each.
    fn summarize_pieces(
        &self,
        doc: &SourceDocument,
        level: &Level,
        pieces: &[Range<usize>],
        out: &mut DerivedText,
        summaries: &mut Vec<LevelChunk>,
        tree: &mut DocumentTree,
    ) -> IndexResult<()> {
        let depth = level.depth + 1;
        let mut previous: Option<String> = None;

        for piece in pieces {
            let content = &level.text[piece.clone()];
            let context = match &previous {
                Some(summary) => Some((self.overlap_excerpt(level, piece.start)?, summary.as_str())),
                None => None,
            };
            let summary = self.summarize(content, context)?;

            let keywords = if self.wants_keywords(depth) {
                match level
                    .chunks
                    .iter()
                    .find(|c| c.range == *piece && !c.keywords.is_empty())
                {
                    Some(same) => same.keywords.clone(),
                    None => self.extract_keywords(content)?,
                }
            } else {
                Vec::new()
            };

            let original = self.provenance(level, piece);
            let range = out.append(&summary)?;
            let chunk = NewChunk {
                filename: out.name().to_string(),
                chunk_begin: range.start,
                chunk_end: range.end,
                depth,
                original_filename: doc.filename.clone(),
                original_begin: original.start,
                original_end: original.end,
                keywords,
                content: summary,
            };
            let key = self.store.create(&chunk)?;
            log::debug!("Stored {}[{:?}] as chunk {}", chunk.filename, range, key);

            tree.push_node(tree_node(key, &chunk));
            summaries.push(LevelChunk {
                key,
                range,
                original,
                keywords: chunk.keywords,
            });
            previous = Some(chunk.content);
        }

        Ok(())
    }

    fn wants_keywords(&self, depth: u32) -> bool {
        depth <= self.config.keyword_depth
    }

    /// The `overlap_tokens` tokens just before byte `start` of the level text.
    fn overlap_excerpt<'t>(&self, level: &'t Level, start: usize) -> IndexResult<&'t str> {
        let start_tok = level.tokens.token_pos(start)?;
        let from_tok = start_tok.saturating_sub(self.config.overlap_tokens);
        let from = level.tokens.text_pos(from_tok)?;
        Ok(&level.text[from..start])
    }

    fn summarize(&self, content: &str, context: Option<(&str, &str)>) -> IndexResult<String> {
        let mut messages = vec![Message::system(self.kind.summary_instruction())];
        if let Some((excerpt, summary)) = context {
            messages.push(Message::user(format!("{}\n\n{}", prompts::CONTEXT_LEAD, excerpt)));
            messages.push(Message::assistant(summary));
        }
        messages.push(Message::user(content));

        let summary = self.llm.complete(&messages)?.trim().to_string();
        if summary.is_empty() {
            return Err(LlmError::BadResponse("empty summary".to_string()).into());
        }
        Ok(summary)
    }

    fn extract_keywords(&self, content: &str) -> IndexResult<Vec<String>> {
        let messages = [
            Message::system(prompts::KEYWORDS_SYSTEM),
            Message::user(content),
        ];
        let raw = self.llm.complete(&messages)?;
        Ok(prompts::parse_keywords(&raw, self.config.max_keywords))
    }

    /// Original byte range covered by the level chunks under `piece`.
    fn provenance(&self, level: &Level, piece: &Range<usize>) -> Range<usize> {
        let covered = level
            .overlapping(piece)
            .map(|(c, _)| c.original.clone())
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end));

        // A piece made only of separator text falls back to the chunk before it
        covered.unwrap_or_else(|| {
            level
                .chunks
                .iter()
                .rev()
                .find(|c| c.range.start <= piece.start)
                .or(level.chunks.first())
                .map(|c| c.original.clone())
                .unwrap_or(0..0)
        })
    }

    /// Point every chunk of `level` at the summary whose piece holds most of it.
    fn link_parents(
        &self,
        level: &Level,
        pieces: &[Range<usize>],
        summaries: &[LevelChunk],
        tree: &mut DocumentTree,
    ) -> IndexResult<()> {
        for child in &level.chunks {
            let best = pieces
                .iter()
                .zip(summaries)
                .map(|(piece, summary)| {
                    let overlap = child
                        .range
                        .end
                        .min(piece.end)
                        .saturating_sub(child.range.start.max(piece.start));
                    (overlap, summary.key)
                })
                .max_by_key(|(overlap, _)| *overlap);

            let Some((overlap, parent)) = best else {
                continue;
            };
            let len = child.range.len();
            let strength = if len == 0 {
                1.0
            } else {
                overlap as f64 / len as f64
            };
            self.add_edge(child.key, parent, EdgeType::Parent, strength, tree)?;
        }
        Ok(())
    }

    fn link_siblings(&self, chunks: &[LevelChunk], tree: &mut DocumentTree) -> IndexResult<()> {
        for pair in chunks.windows(2) {
            self.add_edge(pair[0].key, pair[1].key, EdgeType::Next, 1.0, tree)?;
        }
        Ok(())
    }

    fn add_edge(
        &self,
        from: ChunkKey,
        to: ChunkKey,
        edge_type: EdgeType,
        strength: f64,
        tree: &mut DocumentTree,
    ) -> IndexResult<()> {
        self.store.add_edge(from, to, edge_type, strength)?;
        tree.edges.push(Edge {
            chunk_from: from,
            chunk_to: to,
            edge_type,
            strength,
        });
        Ok(())
    }
}

pub(crate) fn tree_node(key: ChunkKey, chunk: &NewChunk) -> TreeNode {
    TreeNode {
        key,
        depth: chunk.depth,
        filename: chunk.filename.clone(),
        chunk_begin: chunk.chunk_begin,
        chunk_end: chunk.chunk_end,
        original_begin: chunk.original_begin,
        original_end: chunk.original_end,
        keywords: chunk.keywords.clone(),
        content: chunk.content.clone(),
    }
}
