use std::path::PathBuf;

use anyhow::{bail, Result};

use ragtree_lib::index_paths;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(
    app: &App,
    files: &[PathBuf],
    workers: Option<usize>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let workers = workers.unwrap_or(app.config.indexer.workers);
    let results = index_paths(&app.config, &app.caps, files, workers)?;
    let failed = results.iter().filter(|r| r.is_err()).count();

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = files
                .iter()
                .zip(&results)
                .map(|(path, result)| match result {
                    Ok(indexed) => serde_json::json!({
                        "path": path.to_string_lossy(),
                        "ok": true,
                        "file": indexed,
                    }),
                    Err(e) => serde_json::json!({
                        "path": path.to_string_lossy(),
                        "ok": false,
                        "error": e.to_string(),
                        "kind": format!("{:?}", e.kind()),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            for (path, result) in files.iter().zip(&results) {
                match result {
                    Ok(indexed) => println!(
                        "{} {} -> {} ({:?}, {} chunks, {} depths)",
                        paint("ok", Color::GREEN, use_color),
                        path.display(),
                        indexed.filename,
                        indexed.kind,
                        indexed.chunks,
                        indexed.depths
                    ),
                    Err(e) => println!(
                        "{} {}: {}",
                        paint("failed", Color::RED, use_color),
                        path.display(),
                        e
                    ),
                }
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} files failed to index", failed, files.len());
    }
    Ok(())
}
