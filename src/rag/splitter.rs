//! Boundary-aware text splitting for RAG indexing.
//!
//! Chunks are measured in tokens but cut at natural boundaries: a chunk is
//! given a token budget, and the cut is pulled back from the budget to the
//! last header, blank line, sentence end or space found in the back half of
//! the chunk.

use std::ops::Range;

use crate::tokenizer::{Result, Tokens};

/// A place where a chunk may end.
#[derive(Debug, Clone, Copy)]
pub struct Boundary {
    pub pattern: &'static str,
    /// Bytes of `pattern` that stay in the chunk before the cut
    pub keep: usize,
}

impl Boundary {
    const fn after(pattern: &'static str) -> Self {
        Self {
            pattern,
            keep: pattern.len(),
        }
    }
}

/// Preferred boundaries, most preferred first.
pub const DEFAULT_BOUNDARIES: &[Boundary] = &[
    // Markdown header: the header line opens the next chunk
    Boundary {
        pattern: "\n#",
        keep: 1,
    },
    Boundary::after("\n\n"),
    Boundary::after(". "),
    Boundary::after(".\n"),
    Boundary::after("! "),
    Boundary::after("? "),
    Boundary::after("\n"),
    Boundary::after("; "),
    Boundary::after(", "),
    Boundary::after(" "),
];

#[derive(Debug, Clone)]
pub struct Splitter {
    budget: usize,
    tail: usize,
    boundaries: &'static [Boundary],
}

impl Splitter {
    /// `budget` tokens per chunk; a chunk that would leave fewer than `tail`
    /// tokens behind runs to the end of the text instead.
    pub fn new(budget: usize, tail: usize) -> Self {
        Self {
            budget: budget.max(1),
            tail,
            boundaries: DEFAULT_BOUNDARIES,
        }
    }

    pub fn with_boundaries(mut self, boundaries: &'static [Boundary]) -> Self {
        self.boundaries = boundaries;
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    fn tail_window(&self) -> usize {
        self.tail.min(self.budget / 4)
    }

    /// End byte offset of the chunk starting at byte `start`.
    pub fn next_end(&self, text: &str, tokens: &Tokens, start: usize) -> Result<usize> {
        let start_tok = tokens.token_pos(start)?;
        let end_tok = start_tok + self.budget;

        // Close to the end: take everything rather than leave a sliver
        if end_tok + self.tail_window() >= tokens.token_count() {
            return Ok(text.len());
        }

        let naive_end = tokens.text_pos(end_tok)?;
        let window_start = tokens.text_pos(start_tok + (self.budget / 2).max(1))?;
        let window = &text[window_start..naive_end];

        for boundary in self.boundaries {
            if let Some(pos) = window.rfind(boundary.pattern) {
                let cut = window_start + pos + boundary.keep;
                let aligned = tokens.text_pos(tokens.token_pos(cut)?)?;
                if aligned > start {
                    return Ok(aligned);
                }
            }
        }

        Ok(naive_end)
    }

    /// Partition `text` into consecutive chunk ranges covering all of it.
    pub fn split(&self, text: &str, tokens: &Tokens) -> Result<Vec<Range<usize>>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        if tokens.is_empty() {
            return Ok(vec![0..text.len()]);
        }

        let mut ranges = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let end = self.next_end(text, tokens, start)?;
            ranges.push(start..end);
            start = end;
        }

        Ok(ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{RegexTokenizer, Tokenize};

    fn split(text: &str, budget: usize, tail: usize) -> Vec<Range<usize>> {
        let tokens = Tokens::new(&RegexTokenizer::new(), text);
        Splitter::new(budget, tail).split(text, &tokens).unwrap()
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let text = "A short note.";
        assert_eq!(split(text, 100, 8), vec![0..text.len()]);
    }

    #[test]
    fn test_partition_has_no_gaps() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(40);
        let ranges = split(&text, 37, 4);
        assert!(ranges.len() > 5);

        let rebuilt: String = ranges.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(rebuilt, text);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_prefers_sentence_end_over_space() {
        let text = "One two three four five six. Seven eight nine ten eleven twelve thirteen fourteen fifteen";
        let ranges = split(text, 10, 0);
        assert_eq!(&text[ranges[0].clone()], "One two three four five six.");
    }

    #[test]
    fn test_prefers_header_over_blank_line() {
        let text = "intro words here and\n## Header\n\nbody words go on and on for a while longer";
        let ranges = split(text, 8, 0);
        assert_eq!(&text[ranges[0].clone()], "intro words here and\n");
        assert!(text[ranges[1].clone()].starts_with("## Header"));
    }

    #[test]
    fn test_boundary_outside_back_half_ignored() {
        // The only sentence end sits in the front half, so the cut falls on a space
        let text = "Hi. aa bb cc dd ee ff gg hh ii jj kk ll mm nn oo pp qq rr";
        let ranges = split(text, 10, 0);
        let first = &text[ranges[0].clone()];
        assert!(first.len() > "Hi.".len());
        assert!(first.ends_with(' ') || text[ranges[0].end..].starts_with(' '));
    }

    #[test]
    fn test_tail_absorbed() {
        let text = "w ".repeat(22);
        let tokens = RegexTokenizer::new().count(&text);
        assert!(tokens > 20);
        // 20-token budget with a 5-token tail: the leftover is absorbed
        assert_eq!(split(&text, 20, 5).len(), 1);
        assert!(split(&text, 20, 0).len() > 1);
    }

    #[test]
    fn test_chunk_ends_are_token_aligned() {
        let text = "alpha beta, gamma delta; epsilon zeta. eta theta iota kappa lambda mu ".repeat(10);
        let tokens = Tokens::new(&RegexTokenizer::new(), &text);
        let ranges = Splitter::new(9, 2).split(&text, &tokens).unwrap();
        for r in &ranges[..ranges.len() - 1] {
            let idx = tokens.token_pos(r.end).unwrap();
            assert_eq!(tokens.text_pos(idx).unwrap(), r.end);
        }
    }

    #[test]
    fn test_empty_text() {
        assert!(split("", 10, 2).is_empty());
    }
}
