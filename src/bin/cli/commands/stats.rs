use anyhow::Result;

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat) -> Result<()> {
    let stats = app.library.store().stats()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Plain => {
            println!("Documents:  {}", stats.document_count);
            println!("Chunks:     {}", stats.chunk_count);
            println!("Edges:      {}", stats.edge_count);
            match stats.max_depth {
                Some(depth) => println!("Max depth:  {}", depth),
                None => println!("Max depth:  -"),
            }
            println!("Dimensions: {}", stats.dimensions);
            if let Some(path) = app.library.store().db_path() {
                println!("Database:   {}", path.display());
            }
            println!("Files:      {}", app.library.files_dir().display());
        }
    }

    Ok(())
}
