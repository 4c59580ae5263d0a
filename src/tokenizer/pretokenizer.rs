//! Built-in regex pre-tokenizer.
//! Splits text the way byte-level BPE pre-tokenizers do (words carry their
//! leading space), which tracks real model token counts closely enough for
//! chunk budgeting without loading a vocabulary.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use super::Tokenize;

const TOKEN_PATTERN: &str =
    r"'(?:s|t|re|ve|m|ll|d)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+";

/// Words longer than this are cut into several tokens.
const MAX_TOKEN_BYTES: usize = 16;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TOKEN_PATTERN).unwrap())
}

/// Default tokenizer. Spans cover the whole input without gaps.
#[derive(Debug, Clone, Default)]
pub struct RegexTokenizer;

impl RegexTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl Tokenize for RegexTokenizer {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut covered = 0;

        for m in token_regex().find_iter(text) {
            // The pattern matches every character, but guard anyway so the
            // spans always tile the text
            if m.start() > covered {
                spans.push(covered..m.start());
            }
            split_long(text, m.range(), &mut spans);
            covered = m.end();
        }
        if covered < text.len() {
            spans.push(covered..text.len());
        }

        spans
    }
}

/// Push `range`, cut into pieces of at most `MAX_TOKEN_BYTES` on char boundaries.
fn split_long(text: &str, range: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let mut start = range.start;
    while range.end - start > MAX_TOKEN_BYTES {
        let mut cut = start + MAX_TOKEN_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        spans.push(start..cut);
        start = cut;
    }
    spans.push(start..range.end);
}
