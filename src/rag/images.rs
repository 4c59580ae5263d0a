//! Image indexing: keywords plus a long and a short description.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::ImageFormat;

use super::derived::DerivedText;
use super::index::NodeStore;
use super::models::{DocumentTree, Edge, EdgeType, NewChunk};
use super::prompts;
use super::reducer::tree_node;
use crate::config::IndexerConfig;
use crate::error::{IndexError, IndexResult};
use crate::llm::{Completion, LlmError, Message};

/// Image ready to be sent to a vision model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    /// `data:image/png;base64,...`
    pub data_url: String,
}

/// Target size for a `width` x `height` image.
///
/// Images within `max_size` on both sides are left alone. Larger ones are
/// scaled down to fit, keeping the aspect ratio, but no side drops below
/// `min_size`.
pub fn scaled_dimensions(width: u32, height: u32, max_size: u32, min_size: u32) -> (u32, u32) {
    if width <= max_size && height <= max_size {
        return (width, height);
    }

    let scale = (max_size as f64 / width as f64).min(max_size as f64 / height as f64);
    let side = |v: u32| ((v as f64 * scale).round() as u32).max(min_size);
    (side(width), side(height))
}

/// Decode, downscale and re-encode an image as a PNG data URL.
pub fn prepare_image(bytes: &[u8], max_size: u32, min_size: u32) -> IndexResult<PreparedImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| IndexError::InvalidInput(format!("Not a decodable image: {}", e)))?;

    let (width, height) = scaled_dimensions(img.width(), img.height(), max_size, min_size);
    let img = if (width, height) != (img.width(), img.height()) {
        log::debug!(
            "Scaling image from {}x{} to {}x{}",
            img.width(),
            img.height(),
            width,
            height
        );
        img.resize_exact(width, height, FilterType::Lanczos3)
    } else {
        img
    };

    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)
        .map_err(|e| IndexError::InvalidInput(format!("Cannot encode image: {}", e)))?;

    Ok(PreparedImage {
        width,
        height,
        data_url: format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())),
    })
}

pub struct ImageIndexer<'a> {
    llm: &'a dyn Completion,
    store: &'a NodeStore,
    config: &'a IndexerConfig,
}

impl<'a> ImageIndexer<'a> {
    pub fn new(llm: &'a dyn Completion, store: &'a NodeStore, config: &'a IndexerConfig) -> Self {
        Self { llm, store, config }
    }

    /// Describe an image and store the long (depth 1) and short (depth 2)
    /// descriptions, both carrying the image keywords.
    pub fn index(&self, filename: &str, bytes: &[u8]) -> IndexResult<DocumentTree> {
        let image = prepare_image(bytes, self.config.image_max_size, self.config.image_min_size)?;
        log::info!(
            "Indexing image {} ({}x{} for the model)",
            filename,
            image.width,
            image.height
        );

        let raw = self.ask(
            prompts::KEYWORDS_SYSTEM,
            prompts::KEYWORDS_IMAGE,
            &image.data_url,
        )?;
        let keywords = prompts::parse_keywords(&raw, self.config.max_keywords);
        let long = self.ask(prompts::IMAGE_SYSTEM, prompts::IMAGE_LONG, &image.data_url)?;
        let short = self.ask(prompts::IMAGE_SYSTEM, prompts::IMAGE_SHORT, &image.data_url)?;

        // Both chunks and their edge land together or not at all
        let mut files = Vec::with_capacity(2);
        let stored = self.store.atomically(|store| {
            Self::store_descriptions(
                store,
                self.config,
                filename,
                bytes.len(),
                &keywords,
                [long, short],
                &mut files,
            )
        });
        match stored {
            Ok(tree) => {
                log::info!("Indexed image {}", filename);
                Ok(tree)
            }
            Err(e) => {
                for file in files {
                    file.discard();
                }
                Err(e)
            }
        }
    }

    fn store_descriptions(
        store: &NodeStore,
        config: &IndexerConfig,
        filename: &str,
        original_len: usize,
        keywords: &[String],
        descriptions: [String; 2],
        files: &mut Vec<DerivedText>,
    ) -> IndexResult<DocumentTree> {
        let mut tree = DocumentTree::default();
        let mut keys = Vec::with_capacity(2);
        for (depth, description) in (1u32..).zip(descriptions) {
            files.push(DerivedText::create(&config.files_dir, filename, depth)?);
            let out = &mut files[keys.len()];
            let range = out.append(&description)?;

            let chunk = NewChunk {
                filename: out.name().to_string(),
                chunk_begin: range.start,
                chunk_end: range.end,
                depth,
                original_filename: filename.to_string(),
                original_begin: 0,
                original_end: original_len,
                keywords: keywords.to_vec(),
                content: description,
            };
            let key = store.create(&chunk)?;
            log::debug!("Stored {} as chunk {}", chunk.filename, key);
            tree.push_node(tree_node(key, &chunk));
            keys.push(key);
        }

        store.add_edge(keys[0], keys[1], EdgeType::Parent, 1.0)?;
        tree.edges.push(Edge {
            chunk_from: keys[0],
            chunk_to: keys[1],
            edge_type: EdgeType::Parent,
            strength: 1.0,
        });
        Ok(tree)
    }

    fn ask(&self, system: &str, instruction: &str, data_url: &str) -> IndexResult<String> {
        let messages = [
            Message::system(system),
            Message::user_with_image(instruction, data_url),
        ];
        let answer = self.llm.complete(&messages)?.trim().to_string();
        if answer.is_empty() {
            return Err(LlmError::BadResponse(format!("empty answer to {:?}", instruction)).into());
        }
        Ok(answer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::llm::testing::{FailingEmbedder, HashEmbedder, ScriptedLlm};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 20, 20])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn decoded_size(data_url: &str) -> (u32, u32) {
        let b64 = data_url.strip_prefix("data:image/png;base64,").unwrap();
        let img = image::load_from_memory(&STANDARD.decode(b64).unwrap()).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_scaled_dimensions() {
        assert_eq!(scaled_dimensions(600, 300, 256, 8), (256, 128));
        assert_eq!(scaled_dimensions(300, 600, 256, 8), (128, 256));
        assert_eq!(scaled_dimensions(2000, 10, 256, 8), (256, 8));
        assert_eq!(scaled_dimensions(100, 50, 256, 8), (100, 50));
    }

    #[test]
    fn test_prepare_image_rescales() {
        let prepared = prepare_image(&png_bytes(600, 300), 256, 8).unwrap();
        assert_eq!((prepared.width, prepared.height), (256, 128));
        assert_eq!(decoded_size(&prepared.data_url), (256, 128));

        let small = prepare_image(&png_bytes(40, 30), 256, 8).unwrap();
        assert_eq!(decoded_size(&small.data_url), (40, 30));
    }

    #[test]
    fn test_invalid_bytes_are_invalid_input() {
        let err = prepare_image(b"plain text, not pixels", 256, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_two_descriptions_share_keywords() {
        let temp = TempDir::new().unwrap();
        let config = IndexerConfig {
            files_dir: temp.path().to_path_buf(),
            ..IndexerConfig::default()
        };
        let store = NodeStore::open_in_memory(8, Arc::new(HashEmbedder::new(8))).unwrap();
        let llm = ScriptedLlm::new(5);
        let bytes = png_bytes(600, 300);

        let tree = ImageIndexer::new(&llm, &store, &config)
            .index("red.png", &bytes)
            .unwrap();

        assert_eq!(tree.nodes.len(), 2);
        let long = tree.level(1)[0];
        let short = tree.level(2)[0];
        assert!(tree.level(0).is_empty());
        assert_eq!(long.keywords, vec!["alpha", "Beta", "gamma"]);
        assert_eq!(long.keywords, short.keywords);
        assert_eq!(short.content, "A small red square.");
        assert!(long.content.len() > short.content.len());
        assert_eq!(long.filename, "red.png.d1");
        assert_eq!(short.filename, "red.png.d2");

        assert_eq!(tree.parent_of(long.key), Some(short.key));
        assert_eq!(tree.root().map(|n| n.key), Some(short.key));
        assert_eq!(llm.call_count(), 3);

        let root = store.find_root("red.png", bytes.len()).unwrap().unwrap();
        assert_eq!(root.key, short.key);
        assert_eq!(root.original_end, bytes.len());
    }

    #[test]
    fn test_failed_short_description_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let config = IndexerConfig {
            files_dir: temp.path().to_path_buf(),
            ..IndexerConfig::default()
        };
        // The long description embeds, the short one does not
        let store = NodeStore::open_in_memory(8, Arc::new(FailingEmbedder::new(8, 1))).unwrap();
        let llm = ScriptedLlm::new(5);
        let bytes = png_bytes(64, 64);

        let err = ImageIndexer::new(&llm, &store, &config)
            .index("red.png", &bytes)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteCallFailure);

        assert!(store.find_root("red.png", bytes.len()).unwrap().is_none());
        assert!(store.chunks_for_file("red.png").unwrap().is_empty());
        assert!(!temp.path().join("red.png.d1").exists());
        assert!(!temp.path().join("red.png.d2").exists());
    }
}
