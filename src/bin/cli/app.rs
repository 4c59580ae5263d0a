use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use ragtree_lib::config::{Config, DEFAULT_CONFIG_FILE};
use ragtree_lib::library::{Capabilities, Library};

/// Shared application state for CLI commands
pub struct App {
    pub config: Config,
    pub caps: Capabilities,
    pub library: Library,
}

impl App {
    /// Load the configuration and open the node store
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config = Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        let caps = Capabilities::from_config(&config)
            .context("Failed to set up the model client")?;
        let library = Library::open(&config, caps.clone()).with_context(|| {
            format!(
                "Failed to open node store at {}",
                config.store.database.display()
            )
        })?;

        Ok(Self {
            config,
            caps,
            library,
        })
    }
}
