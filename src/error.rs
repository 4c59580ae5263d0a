//! Crate-wide error type for indexing operations

use thiserror::Error;

use crate::llm::LlmError;
use crate::rag::StoreError;
use crate::tokenizer::TokenError;

/// Coarse classification of an indexing failure.
///
/// Only `InvalidInput` is recoverable by the caller (e.g. falling back from
/// image to text handling). Everything else aborts the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    OutOfRange,
    RemoteCallFailure,
    StoreConstraintViolation,
}

/// Errors that can occur while indexing a document
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reduction stalled at depth {depth}: {chunks} chunks did not shrink")]
    Stalled { depth: u32, chunks: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::InvalidInput(_) => ErrorKind::InvalidInput,
            IndexError::Token(TokenError::Load { .. }) => ErrorKind::InvalidInput,
            IndexError::Token(_) => ErrorKind::OutOfRange,
            IndexError::Llm(_) | IndexError::Stalled { .. } => ErrorKind::RemoteCallFailure,
            IndexError::Store(e) if e.is_constraint_violation() => {
                ErrorKind::StoreConstraintViolation
            }
            IndexError::Store(_) => ErrorKind::RemoteCallFailure,
            // Source files that cannot be read are bad input, not a remote fault
            IndexError::Io(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether the caller may try another handler for the same file.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput && !matches!(self, IndexError::Io(_))
    }
}

impl From<IndexError> for String {
    fn from(err: IndexError) -> Self {
        err.to_string()
    }
}

/// Result type alias for indexing operations
pub type IndexResult<T> = Result<T, IndexError>;
