//! Upload pipeline: normalize → chunk → embed → store.
//!
//! A batch never fails because of one bad file. Per-file normalization
//! errors are collected in the [`IngestReport`]; only store-level errors
//! (invalid name, name conflict on create, embedding failures, I/O) abort
//! the call.

use std::path::{Path, PathBuf};

use knowba_core::chunk::TextSplitter;
use knowba_core::embedding::EmbeddingProvider;
use knowba_core::models::Chunk;

use crate::error::{IngestError, StoreError, StoreWarning};
use crate::extract::normalize;
use crate::store::{validate_name, StoreHandle, VectorStores};

/// Whether an upload starts a new store or adds to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadIntent {
    /// Fails with `NameConflict` if the name is taken.
    Create,
    /// Adds to the store, creating or rebuilding it if it cannot be loaded.
    Append,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// `(filename, raw bytes)` pairs.
    pub files: Vec<(String, Vec<u8>)>,
    pub store: String,
    pub intent: UploadIntent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedFile {
    pub name: String,
    pub id: String,
    pub units: usize,
    pub chunks: usize,
}

/// Batch summary of one upload.
#[derive(Debug)]
pub struct IngestReport {
    pub store: String,
    pub succeeded: Vec<IngestedFile>,
    pub failed: Vec<IngestError>,
    pub warnings: Vec<StoreWarning>,
    /// Handle to the target store, if it was written.
    pub handle: Option<StoreHandle>,
}

impl IngestReport {
    pub fn chunk_count(&self) -> usize {
        self.succeeded.iter().map(|f| f.chunks).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} files indexed into '{}' ({} chunks)",
            self.succeeded.len(),
            self.succeeded.len() + self.failed.len(),
            self.store,
            self.chunk_count()
        )
    }
}

/// The filename an upload is recorded under.
pub fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read upload files from disk. Files that cannot be read are returned as
/// [`IngestError::Read`] failures instead of aborting the batch.
pub async fn read_uploads(paths: &[PathBuf]) -> (Vec<(String, Vec<u8>)>, Vec<IngestError>) {
    let mut files = Vec::new();
    let mut unreadable = Vec::new();
    for path in paths {
        let name = upload_name(path);
        match tokio::fs::read(path).await {
            Ok(bytes) => files.push((name, bytes)),
            Err(source) => {
                tracing::warn!(path = %path.display(), error = %source, "skipping unreadable file");
                unreadable.push(IngestError::Read { name, source });
            }
        }
    }
    (files, unreadable)
}

/// Normalize, split, and index every file of `request`.
///
/// If no file normalizes successfully the store is left untouched.
pub async fn ingest(
    stores: &VectorStores,
    splitter: &TextSplitter,
    provider: &dyn EmbeddingProvider,
    request: UploadRequest,
) -> Result<IngestReport, StoreError> {
    validate_name(&request.store)?;

    let mut report = IngestReport {
        store: request.store.clone(),
        succeeded: Vec::new(),
        failed: Vec::new(),
        warnings: Vec::new(),
        handle: None,
    };
    let mut chunks: Vec<Chunk> = Vec::new();

    for (name, bytes) in &request.files {
        match normalize(bytes, name) {
            Ok(file) => {
                let file_chunks = splitter.split(&file);
                tracing::debug!(file = %name, units = file.units.len(), chunks = file_chunks.len(), "normalized");
                report.succeeded.push(IngestedFile {
                    name: file.name.clone(),
                    id: file.id.clone(),
                    units: file.units.len(),
                    chunks: file_chunks.len(),
                });
                chunks.extend(file_chunks);
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "skipping file");
                report.failed.push(e);
            }
        }
    }

    if report.succeeded.is_empty() {
        tracing::info!(store = %request.store, "no files to index");
        return Ok(report);
    }

    let handle = match request.intent {
        UploadIntent::Create => stores.create(&request.store, &chunks, provider).await?,
        UploadIntent::Append => {
            let (handle, warning) = stores.upsert(&request.store, &chunks, provider).await?;
            report.warnings.extend(warning);
            handle
        }
    };
    report.handle = Some(handle);

    tracing::info!(
        store = %request.store,
        files = report.succeeded.len(),
        failed = report.failed.len(),
        chunks = chunks.len(),
        "upload indexed"
    );
    Ok(report)
}
