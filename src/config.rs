//! Indexer configuration, read from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

/// Environment variable that overrides `llm.api_key`.
pub const API_KEY_ENV: &str = "RAGTREE_API_KEY";

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ragtree.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub indexer: IndexerConfig,
}

/// Model server connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible server (without `/v1`)
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub completion_model: String,
    pub embedding_model: String,
    /// Prefix prepended to every embedding input
    pub embedding_query: String,
    /// Accept invalid TLS certificates (self-hosted servers)
    pub insecure: bool,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            api_key: None,
            completion_model: "gemma3-12b".to_string(),
            embedding_model: "multilingual-e5-large".to_string(),
            embedding_query: String::new(),
            insecure: false,
            timeout_secs: 600,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

/// Node store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub database: PathBuf,
    /// Length of every embedding vector; must match the embedding model
    pub embedding_dimensions: usize,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_data_dir().join("ragtree.sqlite"),
            embedding_dimensions: 1024,
            busy_timeout_ms: 5000,
        }
    }
}

/// Chunking and summarization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexerConfig {
    /// Directory holding source files and derived summary files
    pub files_dir: PathBuf,
    /// Token budget per chunk
    pub chunk_tokens: usize,
    /// Tokens of the previous chunk shown to the model for continuity
    pub overlap_tokens: usize,
    /// A chunk ending this close to the document end absorbs the remainder
    pub tail_tokens: usize,
    /// Deepest depth whose chunks get keywords
    pub keyword_depth: u32,
    pub max_keywords: usize,
    pub max_depth: u32,
    pub image_max_size: u32,
    pub image_min_size: u32,
    pub workers: usize,
    /// `tokenizer.json` of the completion model; the built-in tokenizer
    /// is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer_json: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            files_dir: default_data_dir().join("files"),
            chunk_tokens: 2048,
            overlap_tokens: 128,
            tail_tokens: 64,
            keyword_depth: 1,
            max_keywords: 16,
            max_depth: 12,
            image_max_size: 256,
            image_min_size: 8,
            workers: 1,
            tokenizer_json: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> IndexResult<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            Self::parse(&raw)?
        } else {
            log::info!("No config at {:?}, using defaults", path);
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.llm.api_key = Some(key);
            }
        }

        Ok(config)
    }

    pub fn parse(raw: &str) -> IndexResult<Self> {
        let config: Config = toml::from_str(raw)
            .map_err(|e| IndexError::InvalidInput(format!("Bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> IndexResult<()> {
        let ix = &self.indexer;
        if ix.chunk_tokens < 2 {
            return Err(IndexError::InvalidInput(
                "indexer.chunk_tokens must be at least 2".to_string(),
            ));
        }
        if ix.overlap_tokens >= ix.chunk_tokens {
            return Err(IndexError::InvalidInput(
                "indexer.overlap_tokens must be smaller than chunk_tokens".to_string(),
            ));
        }
        if ix.image_min_size == 0 || ix.image_min_size > ix.image_max_size {
            return Err(IndexError::InvalidInput(
                "indexer.image_min_size must be in 1..=image_max_size".to_string(),
            ));
        }
        if self.store.embedding_dimensions == 0 {
            return Err(IndexError::InvalidInput(
                "store.embedding_dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default data directory (e.g. ~/.local/share/ragtree)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("ragtree"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [llm]
            base_url = "https://llm.example.net"
            insecure = true

            [indexer]
            chunk_tokens = 512
            overlap_tokens = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.base_url, "https://llm.example.net");
        assert!(config.llm.insecure);
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.indexer.chunk_tokens, 512);
        assert_eq!(config.indexer.keyword_depth, 1);
        assert_eq!(config.store.embedding_dimensions, 1024);
        assert_eq!(config.indexer.tokenizer_json, None);
    }

    #[test]
    fn test_tokenizer_path() {
        let config = Config::parse("[indexer]\ntokenizer_json = \"/models/gemma/tokenizer.json\"\n")
            .unwrap();
        assert_eq!(
            config.indexer.tokenizer_json.as_deref(),
            Some(Path::new("/models/gemma/tokenizer.json"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::parse("[indexer]\nchunk_tokens = 100\noverlap_tokens = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));

        assert!(Config::parse("[llm\nbase_url = 1").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config.indexer, IndexerConfig::default());
    }
}
