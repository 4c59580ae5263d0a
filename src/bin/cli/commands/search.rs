use anyhow::{Context, Result};

use crate::app::App;
use crate::render::terminal::{paint, preview, Color};
use crate::OutputFormat;

pub fn run(
    app: &App,
    query: &str,
    limit: usize,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let hits = app.library.search(query, limit).context("Search failed")?;

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = hits
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "score": hit.score,
                        "chunk": hit.chunk,
                        "content": app.library.read_chunk(&hit.chunk).ok(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if hits.is_empty() {
                println!("No results found for '{}'.", query);
                return Ok(());
            }

            let file_w = hits
                .iter()
                .map(|h| h.chunk.original_filename.len())
                .max()
                .unwrap_or(4)
                .clamp(4, 32);

            println!(
                "{:<6} {:<5} {:<file_w$} {:<15} {}",
                "Score",
                "Depth",
                "File",
                "Range",
                "Text",
                file_w = file_w
            );
            println!(
                "{} {} {} {} {}",
                "\u{2500}".repeat(6),
                "\u{2500}".repeat(5),
                "\u{2500}".repeat(file_w),
                "\u{2500}".repeat(15),
                "\u{2500}".repeat(40)
            );

            for hit in &hits {
                let chunk = &hit.chunk;
                let file = preview(&chunk.original_filename, file_w);
                let range = format!("{}..{}", chunk.original_begin, chunk.original_end);
                let text = match app.library.read_chunk(chunk) {
                    Ok(text) => preview(&text, 60),
                    Err(_) => paint("(content unavailable)", Color::GRAY, use_color),
                };

                println!(
                    "{:<6.3} {:<5} {:<file_w$} {:<15} {}",
                    hit.score,
                    chunk.depth,
                    file,
                    range,
                    text,
                    file_w = file_w
                );
            }

            println!("\n{} results", hits.len());
        }
    }

    Ok(())
}
