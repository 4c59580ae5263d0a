//! Library storage operations
//!
//! Copies incoming files into the files directory under safe names, runs
//! them through the handlers and answers questions about what is indexed.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::handlers::{default_handlers, Capabilities, FileHandler, IndexContext};
use super::models::{IndexedFile, SourceFile};
use super::naming::{create_unique, is_derived_name, sanitize_filename};
use crate::config::{Config, IndexerConfig};
use crate::error::{IndexError, IndexResult};
use crate::rag::{Chunk, NodeStore, SearchHit};

/// A files directory bound to one node store connection.
pub struct Library {
    config: IndexerConfig,
    store: NodeStore,
    caps: Capabilities,
    handlers: Vec<Box<dyn FileHandler>>,
}

impl Library {
    /// Open the configured store with its own connection.
    pub fn open(config: &Config, caps: Capabilities) -> IndexResult<Self> {
        let store = NodeStore::open(
            &config.store.database,
            config.store.embedding_dimensions,
            caps.embedder.clone(),
            Duration::from_millis(config.store.busy_timeout_ms),
        )?;
        Ok(Self::with_store(config.indexer.clone(), store, caps))
    }

    pub fn with_store(config: IndexerConfig, store: NodeStore, caps: Capabilities) -> Self {
        Self {
            config,
            store,
            caps,
            handlers: default_handlers(),
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn files_dir(&self) -> &Path {
        &self.config.files_dir
    }

    /// Add a file and index it.
    ///
    /// With `data`, the bytes are written under the sanitized name (or the
    /// first free variant of it). Without, the sanitized name must already
    /// exist in the files directory.
    pub fn add_file(&self, unsecure_name: &str, data: Option<&[u8]>) -> IndexResult<IndexedFile> {
        let base = sanitize_filename(unsecure_name);
        if base.chars().all(|c| c == '.' || c == '_') {
            return Err(IndexError::InvalidInput(format!(
                "Unusable file name: {:?}",
                unsecure_name
            )));
        }

        let (filename, path) = match data {
            Some(bytes) => {
                fs::create_dir_all(self.files_dir())?;
                let (name, path, mut file) = create_unique(self.files_dir(), &base)?;
                file.write_all(bytes)?;
                log::info!("Stored {} as {}", unsecure_name, name);
                (name, path)
            }
            None => {
                let path = self.files_dir().join(&base);
                if !path.is_file() {
                    return Err(IndexError::InvalidInput(format!(
                        "{} not found in {:?}",
                        base,
                        self.files_dir()
                    )));
                }
                (base, path)
            }
        };

        // Leftovers of an earlier or failed run would hide the new root
        let stale = self.clear(&filename)?;
        if stale > 0 {
            log::info!("Dropped {} stale chunks of {} before indexing", stale, filename);
        }

        let bytes = fs::read(&path)?;
        self.index_file(&SourceFile {
            filename,
            path,
            bytes,
        })
    }

    /// Copy a file from anywhere on disk into the library and index it.
    pub fn import_path(&self, path: &Path) -> IndexResult<IndexedFile> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IndexError::InvalidInput(format!("No file name in {:?}", path)))?;
        let bytes = fs::read(path)
            .map_err(|e| IndexError::InvalidInput(format!("Cannot read {:?}: {}", path, e)))?;
        self.add_file(name, Some(&bytes))
    }

    fn index_file(&self, file: &SourceFile) -> IndexResult<IndexedFile> {
        let ctx = IndexContext {
            llm: self.caps.completion.as_ref(),
            tokenizer: self.caps.tokenizer.as_ref(),
            store: &self.store,
            config: &self.config,
        };

        let mut rejection = None;
        for handler in &self.handlers {
            if !handler.classify(&file.bytes) {
                continue;
            }
            match handler.index(&ctx, file) {
                Ok(tree) => return Ok(IndexedFile::new(file.filename.clone(), handler.kind(), &tree)),
                Err(e) if e.is_recoverable() => {
                    log::warn!("{:?} handler rejected {}: {}", handler.kind(), file.filename, e);
                    rejection = Some(e);
                }
                Err(e) => {
                    log::warn!("Indexing {} failed: {}", file.filename, e);
                    return Err(e);
                }
            }
        }

        Err(rejection.unwrap_or_else(|| {
            IndexError::InvalidInput(format!("No handler accepts {}", file.filename))
        }))
    }

    /// The root chunk of `filename`, if indexing it completed.
    pub fn root(&self, filename: &str) -> IndexResult<Option<Chunk>> {
        let name = sanitize_filename(filename);
        let len = match fs::metadata(self.files_dir().join(&name)) {
            Ok(meta) => meta.len() as usize,
            Err(_) => return Ok(None),
        };
        Ok(self.store.find_root(&name, len)?)
    }

    pub fn is_indexed(&self, filename: &str) -> IndexResult<bool> {
        Ok(self.root(filename)?.is_some())
    }

    /// Drop the chunks of `filename` and its derived files. The source file
    /// stays, so it can be indexed again with `add_file(name, None)`.
    pub fn remove(&self, filename: &str) -> IndexResult<usize> {
        let name = sanitize_filename(filename);
        let removed = self.clear(&name)?;
        log::info!("Removed {} chunks of {}", removed, name);
        Ok(removed)
    }

    /// Delete every chunk of `name`, the files they point into, and any
    /// other `<name>.d<depth>` file left by a run that failed.
    fn clear(&self, name: &str) -> IndexResult<usize> {
        let mut derived: BTreeSet<String> = self
            .store
            .chunks_for_file(name)?
            .into_iter()
            .map(|c| c.filename)
            .filter(|f| f != name)
            .collect();

        match fs::read_dir(self.files_dir()) {
            Ok(entries) => {
                for entry in entries {
                    let file = entry?.file_name().to_string_lossy().into_owned();
                    // A source that happens to look derived keeps its file
                    if is_derived_name(&file, name) && self.store.chunks_for_file(&file)?.is_empty() {
                        derived.insert(file);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let removed = self.store.delete_file(name)?;
        for file in derived {
            match fs::remove_file(self.files_dir().join(&file)) {
                Ok(()) => log::debug!("Deleted {}", file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Read a chunk's text back from its file.
    pub fn read_chunk(&self, chunk: &Chunk) -> IndexResult<String> {
        let bytes = fs::read(self.files_dir().join(&chunk.filename))?;
        let slice = bytes.get(chunk.chunk_begin..chunk.chunk_end).ok_or_else(|| {
            IndexError::InvalidInput(format!(
                "{} is shorter than chunk {} ({}..{})",
                chunk.filename, chunk.key, chunk.chunk_begin, chunk.chunk_end
            ))
        })?;
        String::from_utf8(slice.to_vec()).map_err(|_| {
            IndexError::InvalidInput(format!("Chunk {} is not text", chunk.key))
        })
    }

    pub fn search(&self, query: &str, limit: usize) -> IndexResult<Vec<SearchHit>> {
        Ok(self.store.search_text(query, limit)?)
    }
}

/// Index several files on a bounded pool of workers.
///
/// Every worker opens its own store connection. Results come back in the
/// order of `paths`; one failing file does not stop the others.
pub fn index_paths(
    config: &Config,
    caps: &Capabilities,
    paths: &[PathBuf],
    workers: usize,
) -> IndexResult<Vec<IndexResult<IndexedFile>>> {
    let workers = workers.clamp(1, paths.len().max(1));
    let libraries = (0..workers)
        .map(|_| Library::open(config, caps.clone()))
        .collect::<IndexResult<Vec<_>>>()?;
    log::info!("Indexing {} files on {} workers", paths.len(), workers);

    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<IndexResult<IndexedFile>>>> =
        Mutex::new((0..paths.len()).map(|_| None).collect());

    std::thread::scope(|scope| {
        let next = &next;
        let slots = &slots;
        for library in libraries {
            scope.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(path) = paths.get(i) else {
                    break;
                };
                let result = library.import_path(path);
                let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                slots[i] = Some(result);
            });
        }
    });

    Ok(slots
        .into_inner()
        .unwrap_or_else(|e| e.into_inner())
        .into_iter()
        .zip(paths)
        .map(|(slot, path)| {
            slot.unwrap_or_else(|| {
                Err(IndexError::InvalidInput(format!("{:?} was not processed", path)))
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::library::FileKind;
    use crate::llm::testing::{HashEmbedder, ScriptedLlm};
    use crate::rag::test_png;
    use crate::tokenizer::RegexTokenizer;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DIMS: usize = 8;

    fn caps() -> Capabilities {
        Capabilities {
            completion: Arc::new(ScriptedLlm::new(5)),
            embedder: Arc::new(HashEmbedder::new(DIMS)),
            tokenizer: Arc::new(RegexTokenizer::new()),
        }
    }

    fn config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.store.database = temp.path().join("db").join("ragtree.sqlite");
        config.store.embedding_dimensions = DIMS;
        config.indexer.files_dir = temp.path().join("files");
        config.indexer.chunk_tokens = 40;
        config.indexer.overlap_tokens = 6;
        config.indexer.tail_tokens = 4;
        config
    }

    fn library(temp: &TempDir) -> Library {
        let config = config(temp);
        let caps = caps();
        let store = NodeStore::open_in_memory(DIMS, caps.embedder.clone()).unwrap();
        Library::with_store(config.indexer, store, caps)
    }

    fn long_text() -> String {
        (0..30)
            .map(|i| format!("Paragraph {} mentions the harbor and {} boats.", i, i + 3))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_add_text_file() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);
        let text = long_text();

        let indexed = lib.add_file("Harbor Notes.txt", Some(text.as_bytes())).unwrap();
        assert_eq!(indexed.filename, "Harbor_Notes.txt");
        assert_eq!(indexed.kind, FileKind::Text);
        assert!(indexed.depths >= 2);
        assert!(temp.path().join("files/Harbor_Notes.txt").is_file());
        assert!(lib.is_indexed("Harbor Notes.txt").unwrap());

        let root = lib.root("Harbor_Notes.txt").unwrap().unwrap();
        assert_eq!(Some(root.key), indexed.root);
        assert!(!lib.read_chunk(&root).unwrap().is_empty());

        let chunks = lib.store().chunks_for_file("Harbor_Notes.txt").unwrap();
        let depth0: String = chunks
            .iter()
            .filter(|c| c.depth == 0)
            .map(|c| lib.read_chunk(c).unwrap())
            .collect();
        assert_eq!(depth0, text);
    }

    #[test]
    fn test_add_image_file() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);

        let indexed = lib.add_file("photo.png", Some(&test_png(600, 300))).unwrap();
        assert_eq!(indexed.kind, FileKind::Image);
        assert_eq!(indexed.chunks, 2);
        assert_eq!(indexed.depths, 2);
        assert!(lib.is_indexed("photo.png").unwrap());
    }

    #[test]
    fn test_image_name_with_text_content_falls_back() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);

        let indexed = lib.add_file("fake.png", Some(b"Just words in here.")).unwrap();
        assert_eq!(indexed.kind, FileKind::Text);
        assert_eq!(indexed.chunks, 1);
    }

    #[test]
    fn test_undecodable_file_is_invalid_input() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);

        let err = lib
            .add_file("broken.png", Some(b"\x89PNG\r\n\x1a\n\x00\xff\xfe"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!lib.is_indexed("broken.png").unwrap());
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);

        let err = lib.add_file("absent.txt", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(lib.add_file("..", Some(b"x")).is_err());
        assert!(lib.add_file("", Some(b"x")).is_err());
        for name in ["?", "/", "._.", "\u{1F600}"] {
            let err = lib.add_file(name, Some(b"x")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{:?}", name);
        }
        assert!(fs::read_dir(lib.files_dir()).map_or(true, |mut d| d.next().is_none()));
    }

    #[test]
    fn test_reindex_existing_file() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);

        let first = lib.add_file("a.txt", Some(b"First version.")).unwrap();
        let second = lib.add_file("a.txt", Some(b"Second version.")).unwrap();
        assert_eq!(first.filename, "a.txt");
        assert_eq!(second.filename, "a.txt-1");

        let removed = lib.remove("a.txt").unwrap();
        assert_eq!(removed, 1);
        assert!(!lib.is_indexed("a.txt").unwrap());

        let again = lib.add_file("a.txt", None).unwrap();
        assert_eq!(again.filename, "a.txt");
        assert!(lib.is_indexed("a.txt").unwrap());
    }

    #[test]
    fn test_reindex_in_place_stays_indexed() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);
        let first = lib.add_file("long.txt", Some(long_text().as_bytes())).unwrap();
        assert!(lib.is_indexed("long.txt").unwrap());

        let again = lib.add_file("long.txt", None).unwrap();
        assert!(lib.is_indexed("long.txt").unwrap());
        assert_eq!(lib.root("long.txt").unwrap().map(|c| c.key), again.root);
        assert_ne!(again.root, first.root);
        assert_eq!(
            lib.store().chunks_for_file("long.txt").unwrap().len(),
            again.chunks
        );

        // Derived files were replaced, not pushed to new suffixes
        assert!(temp.path().join("files/long.txt.d1").is_file());
        assert!(!temp.path().join("files/long.txt.d1-1").exists());
    }

    #[test]
    fn test_remove_sweeps_unreferenced_derived_files() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);
        lib.add_file("short.txt", Some(b"One short line.")).unwrap();
        let files = temp.path().join("files");
        fs::write(files.join("short.txt.d3"), "left by a failed run").unwrap();
        fs::write(files.join("short.txt.d3-1"), "and another").unwrap();
        fs::write(files.join("short.txt.draft"), "not derived").unwrap();

        lib.remove("short.txt").unwrap();
        assert!(!files.join("short.txt.d3").exists());
        assert!(!files.join("short.txt.d3-1").exists());
        assert!(files.join("short.txt.draft").is_file());
        assert!(files.join("short.txt").is_file());
    }

    #[test]
    fn test_remove_deletes_derived_files() {
        let temp = TempDir::new().unwrap();
        let lib = library(&temp);
        lib.add_file("long.txt", Some(long_text().as_bytes())).unwrap();
        assert!(temp.path().join("files/long.txt.d1").is_file());

        lib.remove("long.txt").unwrap();
        assert!(!temp.path().join("files/long.txt.d1").exists());
        assert!(temp.path().join("files/long.txt").is_file());
        assert_eq!(lib.store().stats().unwrap().chunk_count, 0);
    }

    #[test]
    fn test_index_paths_keeps_order() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let inbox = temp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();

        let mut paths = Vec::new();
        for name in ["one.txt", "two.txt", "three.txt", "four.txt"] {
            let path = inbox.join(name);
            fs::write(&path, format!("Notes from {}.\n{}", name, long_text())).unwrap();
            paths.push(path);
        }
        paths.push(inbox.join("missing.txt"));

        let results = index_paths(&config, &caps(), &paths, 3).unwrap();
        assert_eq!(results.len(), 5);
        for (result, name) in results.iter().zip(["one.txt", "two.txt", "three.txt", "four.txt"]) {
            assert_eq!(result.as_ref().unwrap().filename, name);
        }
        assert_eq!(
            results[4].as_ref().unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let lib = Library::open(&config, caps()).unwrap();
        assert_eq!(lib.store().stats().unwrap().document_count, 4);
        assert!(lib.is_indexed("three.txt").unwrap());
    }
}
