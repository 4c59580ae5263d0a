//! Model tokenizer loaded from a `tokenizer.json` file.

use std::ops::Range;
use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

use super::{RegexTokenizer, TokenError, Tokenize};

/// Tokenizer of the completion model, so chunk budgets count the same
/// tokens the model does.
pub struct ModelTokenizer {
    inner: Tokenizer,
    path: PathBuf,
    fallback: RegexTokenizer,
}

impl ModelTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, TokenError> {
        let load_error = |e: Box<dyn std::error::Error + Send + Sync>| TokenError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let mut inner = Tokenizer::from_file(path).map_err(load_error)?;
        // Budgets are measured over whole documents
        inner.with_truncation(None).map_err(load_error)?;
        inner.with_padding(None);

        log::info!("Loaded tokenizer from {:?}", path);
        Ok(Self {
            inner,
            path: path.to_path_buf(),
            fallback: RegexTokenizer::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tokenize for ModelTokenizer {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        match self.inner.encode(text, false) {
            Ok(encoding) => tile_offsets(text, encoding.get_offsets().iter().copied()),
            Err(e) => {
                log::warn!("Tokenizer {:?} failed, using built-in spans: {}", self.path, e);
                self.fallback.spans(text)
            }
        }
    }
}

/// Turn model token offsets into spans that tile `text`.
///
/// Each token is stretched back to where the previous one ended, so skipped
/// whitespace belongs to the token after it, and the last token runs to the
/// end of the text. Empty offsets (special tokens) are dropped, and tokens
/// ending inside one UTF-8 character merge into the token that completes it.
pub(crate) fn tile_offsets(
    text: &str,
    offsets: impl IntoIterator<Item = (usize, usize)>,
) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut covered = 0;

    for (begin, end) in offsets {
        if end <= begin {
            continue;
        }
        let mut end = end.min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        if end > covered {
            spans.push(covered..end);
            covered = end;
        }
    }

    if let Some(last) = spans.last_mut() {
        last.end = text.len();
    }
    spans
}
