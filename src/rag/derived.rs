//! Derived files: the text of one summary depth, written next to the source.

use std::fs::{self, File};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::library::naming::{create_unique, derived_name};

/// Separator between consecutive chunks of one depth.
pub const SEPARATOR: &str = "\n\n";

/// Append-only text file for one depth of one document.
pub struct DerivedText {
    name: String,
    path: PathBuf,
    file: File,
    text: String,
}

impl DerivedText {
    /// Reserve a fresh file name for `original` at `depth` and create it empty.
    pub fn create(dir: &Path, original: &str, depth: u32) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let (name, path, file) = create_unique(dir, &derived_name(original, depth))?;

        Ok(Self {
            name,
            path,
            file,
            text: String::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one chunk and return its byte range in the file.
    pub fn append(&mut self, chunk: &str) -> std::io::Result<Range<usize>> {
        let mut piece = String::with_capacity(chunk.len() + SEPARATOR.len());
        if !self.text.is_empty() {
            piece.push_str(SEPARATOR);
        }
        let begin = self.text.len() + piece.len();
        piece.push_str(chunk);

        self.file.write_all(piece.as_bytes())?;
        self.text.push_str(&piece);
        Ok(begin..self.text.len())
    }

    /// Delete the file. Used when none of its chunks reached the store.
    pub fn discard(self) {
        let Self { path, file, .. } = self;
        drop(file);
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Discarded {:?}", path),
            Err(e) => log::warn!("Cannot remove {:?}: {}", path, e),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
