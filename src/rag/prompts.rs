//! Instructions sent to the model while indexing.

use std::path::Path;

/// Kind of text document, selecting the summarization instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Prose,
    Markdown,
    Code,
}

impl TextKind {
    pub fn from_filename(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "md" | "markdown" | "org" | "rst" => TextKind::Markdown,
            "rs" | "py" | "js" | "ts" | "c" | "h" | "cpp" | "go" | "java" | "sh" | "toml"
            | "json" | "yaml" | "yml" => TextKind::Code,
            _ => TextKind::Prose,
        }
    }

    pub fn summary_instruction(&self) -> &'static str {
        match self {
            TextKind::Prose => SUMMARIZE_PROSE,
            TextKind::Markdown => SUMMARIZE_MARKDOWN,
            TextKind::Code => SUMMARIZE_CODE,
        }
    }
}

const SUMMARIZE_PROSE: &str = "You condense documents for a search index. \
Rewrite the passage you are given as a shorter summary that keeps every important fact, \
name, number and conclusion. Write plain prose in the language of the passage. \
If an earlier part of the document and its summary are shown first, continue in the same \
style and do not repeat what that summary already says. Reply with the summary only.";

const SUMMARIZE_MARKDOWN: &str = "You condense structured notes for a search index. \
Rewrite the section you are given as a shorter summary that keeps its headings' topics, \
every important fact, name and number. Use short paragraphs, no tables. \
If an earlier part of the document and its summary are shown first, continue in the same \
style and do not repeat what that summary already says. Reply with the summary only.";

const SUMMARIZE_CODE: &str = "You document source files for a search index. \
Describe what the code you are given does: its purpose, main types and functions, inputs, \
outputs and side effects. Be shorter than the code. \
If an earlier part of the file and its description are shown first, continue from there \
without repeating it. Reply with the description only.";

/// Lead-in for the excerpt that precedes the chunk being summarized.
pub const CONTEXT_LEAD: &str = "End of the previous part of the document:";

pub const KEYWORDS_SYSTEM: &str = "You extract search keywords. \
Reply with a single line of comma-separated keywords and short key phrases (names, topics, \
technical terms) for the content you are given. No numbering, no explanations.";

pub const KEYWORDS_IMAGE: &str = "List keywords for this image.";

pub const IMAGE_SYSTEM: &str = "You describe images for a search index. \
Be factual: mention visible objects, people, text, colors, setting and style.";

pub const IMAGE_LONG: &str = "Describe this image in detail in one paragraph.";

pub const IMAGE_SHORT: &str = "Describe this image in one sentence.";

/// Parse a comma-separated keyword answer into an ordered, duplicate-free list.
pub fn parse_keywords(raw: &str, max: usize) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for part in raw.split([',', '\n']) {
        let word = part
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '"' | '\'' | '`'));
        if word.is_empty() {
            continue;
        }
        if keywords.iter().any(|k| k.eq_ignore_ascii_case(word)) {
            continue;
        }
        keywords.push(word.to_string());
        if keywords.len() >= max {
            break;
        }
    }

    keywords
}
