use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, file: &str, format: &OutputFormat) -> Result<()> {
    let removed = app
        .library
        .remove(file)
        .with_context(|| format!("Failed to remove {}", file))?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "file": file,
                    "removedChunks": removed,
                }))?
            );
        }
        OutputFormat::Plain => {
            println!("Removed {} chunks of {}", removed, file);
        }
    }

    Ok(())
}
