//! Error kinds surfaced by the ingestion, store, and QA layers.
//!
//! Each layer has its own enum so callers can match on the exact failure
//! instead of string-sniffing a generic error.

use std::fmt;
use std::path::PathBuf;

use knowba_core::models::FileKind;

use crate::llm::LlmError;

/// Per-file ingestion failure. Never aborts the rest of a batch.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("'{name}': unsupported file format (supported: pdf, docx, txt, csv)")]
    UnsupportedFormat { name: String },

    #[error("'{name}': not valid UTF-8 text: {source}")]
    Decode {
        name: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("'{name}': could not parse {kind} content: {reason}")]
    Parse {
        name: String,
        kind: FileKind,
        reason: String,
    },

    #[error("'{name}': could not be read: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    /// The uploaded filename the error refers to.
    pub fn file_name(&self) -> &str {
        match self {
            IngestError::UnsupportedFormat { name }
            | IngestError::Decode { name, .. }
            | IngestError::Parse { name, .. }
            | IngestError::Read { name, .. } => name,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("store '{name}' already exists; choose another name or append to it")]
    NameConflict { name: String },

    #[error("store '{name}' not found")]
    NotFound { name: String },

    #[error("store '{name}' is corrupt: {reason}")]
    CorruptStore { name: String, reason: String },

    #[error(
        "store '{name}' was built with embedding model {expected_model} ({expected_dims} dims), \
         not {actual_model} ({actual_dims} dims)"
    )]
    EmbeddingMismatch {
        name: String,
        expected_model: String,
        expected_dims: usize,
        actual_model: String,
        actual_dims: usize,
    },

    #[error("embedding service failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Non-fatal condition reported by an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWarning {
    /// The target store did not exist and was created from the new files.
    Created { store: String },
    /// The persisted store could not be loaded and was replaced by a fresh
    /// store holding only the new files.
    Rebuilt { store: String, reason: String },
}

impl fmt::Display for StoreWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreWarning::Created { store } => {
                write!(f, "store '{}' did not exist and was created", store)
            }
            StoreWarning::Rebuilt { store, reason } => write!(
                f,
                "store '{}' could not be loaded ({}); rebuilt it with the new files only",
                store, reason
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("answer generation failed: {0}")]
    GenerationFailed(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
