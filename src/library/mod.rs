//! Library module
//!
//! A library is the directory where source files and their derived summary
//! files live, together with the node store describing them.

mod handlers;
mod models;
pub mod naming;
mod storage;

pub use handlers::{
    default_handlers, Capabilities, FileHandler, ImageHandler, IndexContext, TextHandler,
};
pub use models::{FileKind, IndexedFile, SourceFile};
pub use storage::{index_paths, Library};
