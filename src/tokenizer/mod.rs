//! Tokenization and byte/token offset mapping.
//!
//! A tokenizer only has to report where its tokens sit in the text. `Tokens`
//! turns those spans into a two-way mapping between byte offsets and token
//! indices, which the splitter uses to measure chunks in tokens while
//! slicing text in bytes.

mod hf;
mod pretokenizer;

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub use hf::ModelTokenizer;
pub use pretokenizer::RegexTokenizer;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Offset {index} out of range (limit {limit})")]
    OutOfRange { index: usize, limit: usize },

    #[error("Cannot load tokenizer {path:?}: {message}")]
    Load { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, TokenError>;

/// Tokenization capability.
///
/// Implementations return ordered, non-overlapping byte spans, one per token.
/// Every span boundary must fall on a UTF-8 character boundary.
pub trait Tokenize: Send + Sync {
    fn spans(&self, text: &str) -> Vec<Range<usize>>;

    fn count(&self, text: &str) -> usize {
        self.spans(text).len()
    }
}

/// The model tokenizer at `path`, or the built-in one when none is configured.
pub fn load(path: Option<&Path>) -> Result<Arc<dyn Tokenize>> {
    match path {
        Some(path) => Ok(Arc::new(ModelTokenizer::from_file(path)?)),
        None => Ok(Arc::new(RegexTokenizer::new())),
    }
}

/// Token spans of one text, with offset lookups in both directions.
#[derive(Debug, Clone)]
pub struct Tokens {
    spans: Vec<Range<usize>>,
    /// Average tokens per byte over the whole text, used to predict where a
    /// byte offset lands before checking the real spans.
    tokens_per_byte: f64,
}

impl Tokens {
    /// Tokenize `text` with the given capability.
    pub fn new(tokenizer: &dyn Tokenize, text: &str) -> Self {
        Self::from_spans(tokenizer.spans(text))
    }

    /// Build from precomputed spans.
    pub fn from_spans(spans: Vec<Range<usize>>) -> Self {
        debug_assert!(spans.windows(2).all(|w| w[0].end <= w[1].start));
        let end = spans.last().map(|s| s.end).unwrap_or(0);
        let tokens_per_byte = if end == 0 {
            0.0
        } else {
            spans.len() as f64 / end as f64
        };
        Self {
            spans,
            tokens_per_byte,
        }
    }

    pub fn token_count(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// One-past-the-end byte offset of the last token.
    pub fn end(&self) -> usize {
        self.spans.last().map(|s| s.end).unwrap_or(0)
    }

    /// Byte offset where token `index` starts.
    ///
    /// `index == token_count()` is allowed and yields the end of the last
    /// token, so half-open ranges can be expressed.
    pub fn text_pos(&self, index: usize) -> Result<usize> {
        match self.spans.get(index) {
            Some(span) => Ok(span.start),
            None if index == self.spans.len() => Ok(self.end()),
            None => Err(TokenError::OutOfRange {
                index,
                limit: self.spans.len(),
            }),
        }
    }

    /// Index of the token covering byte `offset`.
    ///
    /// A token covers the bytes from its own start up to the start of the
    /// next token, so offsets in a gap between spans map to the preceding
    /// token and offsets before the first token map to token 0. Offsets at
    /// or after the end of the last token are out of range.
    pub fn token_pos(&self, offset: usize) -> Result<usize> {
        let end = self.end();
        if offset >= end {
            return Err(TokenError::OutOfRange { index: offset, limit: end });
        }

        // Interpolation search. The answer always lies in [lo, hi] and every
        // miss shrinks that interval by at least one, so the loop terminates
        // even when the token density is very uneven.
        let (mut lo, mut hi) = (0usize, self.spans.len() - 1);
        let mut guess = ((offset as f64 * self.tokens_per_byte) as usize).min(hi);

        loop {
            let start = self.spans[guess].start;
            if offset < start {
                if guess == lo {
                    // Only reachable for lo == 0: the offset precedes the first token
                    return Ok(guess);
                }
                hi = guess - 1;
                let step = self.correction(start - offset);
                guess = guess.saturating_sub(step).max(lo);
            } else {
                let next = self.next_start(guess);
                if offset < next {
                    return Ok(guess);
                }
                lo = guess + 1;
                let step = self.correction(offset - next + 1);
                guess = (guess + step).min(hi);
            }
        }
    }

    /// Number of tokens to move for a byte error, never less than one.
    fn correction(&self, byte_error: usize) -> usize {
        ((byte_error as f64 * self.tokens_per_byte) as usize).max(1)
    }

    fn next_start(&self, index: usize) -> usize {
        self.spans
            .get(index + 1)
            .map(|s| s.start)
            .unwrap_or_else(|| self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spans of wildly varying width to defeat the average-density guess.
    fn uneven_spans() -> Vec<Range<usize>> {
        let widths = [1, 40, 2, 2, 3, 97, 1, 1, 1, 1, 15, 6, 250, 4, 1, 8];
        let mut spans = Vec::new();
        let mut pos = 0;
        for w in widths {
            spans.push(pos..pos + w);
            pos += w;
        }
        spans
    }

    #[test]
    fn test_round_trip_every_index() {
        let tokens = Tokens::from_spans(uneven_spans());
        for i in 0..tokens.token_count() {
            let offset = tokens.text_pos(i).unwrap();
            assert_eq!(tokens.token_pos(offset).unwrap(), i);
        }
    }

    #[test]
    fn test_every_byte_maps_to_bracketing_token() {
        let spans = uneven_spans();
        let tokens = Tokens::from_spans(spans.clone());
        for offset in 0..tokens.end() {
            let idx = tokens.token_pos(offset).unwrap();
            assert!(spans[idx].contains(&offset), "offset {} -> {}", offset, idx);
        }
    }

    #[test]
    fn test_boundary_offset_returns_following_token() {
        let tokens = Tokens::from_spans(vec![0..3, 3..4, 4..9]);
        assert_eq!(tokens.token_pos(3).unwrap(), 1);
        assert_eq!(tokens.token_pos(4).unwrap(), 2);
        assert_eq!(tokens.token_pos(2).unwrap(), 0);
    }

    #[test]
    fn test_last_token_and_end() {
        let tokens = Tokens::from_spans(vec![0..3, 3..4, 4..9]);
        assert_eq!(tokens.token_pos(8).unwrap(), 2);
        assert_eq!(tokens.text_pos(3).unwrap(), 9);
        assert_eq!(
            tokens.token_pos(9),
            Err(TokenError::OutOfRange { index: 9, limit: 9 })
        );
        assert_eq!(
            tokens.text_pos(4),
            Err(TokenError::OutOfRange { index: 4, limit: 3 })
        );
    }

    #[test]
    fn test_gaps_between_spans() {
        // Tokenizers that skip whitespace leave holes between spans
        let tokens = Tokens::from_spans(vec![2..5, 8..10, 10..12]);
        assert_eq!(tokens.token_pos(0).unwrap(), 0);
        assert_eq!(tokens.token_pos(6).unwrap(), 0);
        assert_eq!(tokens.token_pos(8).unwrap(), 1);
        assert_eq!(tokens.token_pos(11).unwrap(), 2);
    }

    #[test]
    fn test_empty() {
        let tokens = Tokens::from_spans(Vec::new());
        assert!(tokens.is_empty());
        assert_eq!(tokens.text_pos(0).unwrap(), 0);
        assert!(tokens.token_pos(0).is_err());
    }

    #[test]
    fn test_load_without_path_is_builtin() {
        let tokenizer = load(None).unwrap();
        assert_eq!(tokenizer.count("The quick brown fox"), 4);
        assert!(load(Some(Path::new("/nonexistent/tokenizer.json"))).is_err());
    }

    #[test]
    fn test_with_regex_tokenizer() {
        let text = "The quick brown fox jumps over the lazy dog";
        let tokens = Tokens::new(&RegexTokenizer::new(), text);
        assert_eq!(tokens.token_count(), 9);
        assert_eq!(tokens.end(), text.len());
        let fox = text.find(" fox").unwrap();
        assert_eq!(tokens.token_pos(fox).unwrap(), 3);
    }
}
