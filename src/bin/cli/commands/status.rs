use std::collections::BTreeMap;

use anyhow::Result;

use ragtree_lib::library::naming::sanitize_filename;

use crate::app::App;
use crate::render::terminal::{paint, wrap_lines, Color};
use crate::OutputFormat;

pub fn run(app: &App, file: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let name = sanitize_filename(file);
    let chunks = app.library.store().chunks_for_file(&name)?;
    let root = app.library.root(&name)?;

    let mut per_depth: BTreeMap<u32, usize> = BTreeMap::new();
    for chunk in &chunks {
        *per_depth.entry(chunk.depth).or_default() += 1;
    }

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "file": name,
                "indexed": root.is_some(),
                "root": root.as_ref().map(|c| c.key),
                "chunksPerDepth": per_depth,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let state = match (&root, chunks.is_empty()) {
                (Some(_), _) => paint("indexed", Color::GREEN, use_color),
                (None, true) => paint("not indexed", Color::GRAY, use_color),
                (None, false) => paint("incomplete", Color::YELLOW, use_color),
            };
            println!("{}: {}", name, state);

            for (depth, count) in &per_depth {
                println!("  depth {}: {} chunks", depth, count);
            }

            if let Some(root) = root {
                println!();
                let summary = app.library.read_chunk(&root)?;
                for line in wrap_lines(&summary, "  ", 80) {
                    println!("{}", line);
                }
            }
        }
    }

    Ok(())
}
