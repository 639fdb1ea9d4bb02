//! Named, persistent vector stores.
//!
//! Every store lives in its own directory under the storage root and is
//! persisted as a single JSON artifact (`index.json`) holding the embedding
//! model it was built with and all entries. Vectors are stored as base64
//! little-endian `f32` blobs.
//!
//! # Concurrency
//!
//! [`VectorStores`] hands out one shared slot per store name. The slot is an
//! async `RwLock`: `create`, `append`, and `upsert` take the write side, so
//! mutations of one store are serialized; `search` takes the read side and
//! may run alongside other searches.
//!
//! # Durability
//!
//! Writes go to a uniquely named temp file in the store directory, are
//! fsynced, then renamed over `index.json`. A crash mid-write leaves the
//! previous artifact in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use knowba_core::embedding::{embed_one, EmbeddingProvider};
use knowba_core::models::{Chunk, UnitMetadata};
use knowba_core::search::top_k;

use crate::config::Config;
use crate::embedding::embed_batched;
use crate::error::{StoreError, StoreWarning};

/// Name of the persisted artifact inside a store directory.
pub const INDEX_FILE: &str = "index.json";

const FORMAT_VERSION: u32 = 1;
const MAX_NAME_CHARS: usize = 128;

/// Batching policy for embedding calls made by the store.
#[derive(Debug, Clone, Copy)]
pub struct EmbedOptions {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 4,
        }
    }
}

/// Embedding model a store was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub model: String,
    pub dims: usize,
}

impl EmbeddingModel {
    fn of(provider: &dyn EmbeddingProvider) -> Self {
        Self {
            model: provider.model_name().to_string(),
            dims: provider.dims(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub metadata: UnitMetadata,
    #[serde(with = "vector_b64")]
    pub vector: Vec<f32>,
}

/// A search result, best match first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub metadata: UnitMetadata,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Summary of a store for listings.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub name: String,
    pub embedding: EmbeddingModel,
    pub entries: usize,
    /// Distinct source filenames, in first-indexed order.
    pub sources: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorIndex {
    version: u32,
    name: String,
    embedding: EmbeddingModel,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    fn new(name: &str, embedding: EmbeddingModel, entries: Vec<IndexEntry>) -> Self {
        let now = Utc::now();
        Self {
            version: FORMAT_VERSION,
            name: name.to_string(),
            embedding,
            created_at: now,
            updated_at: now,
            entries,
        }
    }

    fn check_provider(&self, provider: &dyn EmbeddingProvider) -> Result<(), StoreError> {
        let actual = EmbeddingModel::of(provider);
        if actual != self.embedding {
            return Err(StoreError::EmbeddingMismatch {
                name: self.name.clone(),
                expected_model: self.embedding.model.clone(),
                expected_dims: self.embedding.dims,
                actual_model: actual.model,
                actual_dims: actual.dims,
            });
        }
        Ok(())
    }

    fn info(&self) -> StoreInfo {
        let mut sources: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !sources.contains(&entry.metadata.source) {
                sources.push(entry.metadata.source.clone());
            }
        }
        StoreInfo {
            name: self.name.clone(),
            embedding: self.embedding.clone(),
            entries: self.entries.len(),
            sources,
            updated_at: self.updated_at,
        }
    }
}

type Slot = Arc<RwLock<Option<VectorIndex>>>;

/// Registry of the stores under one storage root.
pub struct VectorStores {
    root: PathBuf,
    options: EmbedOptions,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Shared handle to one loaded store. Cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
    name: String,
    dir: PathBuf,
    slot: Slot,
    options: EmbedOptions,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish()
    }
}

/// Reject names that are not a single safe path segment.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.trim() != name {
        "name may not start or end with whitespace"
    } else if name.chars().count() > MAX_NAME_CHARS {
        "name is longer than 128 characters"
    } else if name.starts_with('.') {
        "name may not start with '.'"
    } else if name.contains(|c| c == '/' || c == '\\') {
        "name may not contain path separators"
    } else if name.contains("..") {
        "name may not contain '..'"
    } else if name.chars().any(char::is_control) {
        "name may not contain control characters"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl VectorStores {
    pub fn new(root: impl Into<PathBuf>, options: EmbedOptions) -> Self {
        Self {
            root: root.into(),
            options,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.storage.root.clone(),
            EmbedOptions {
                batch_size: config.embedding.batch_size,
                concurrency: config.embedding.concurrency,
            },
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(name.to_string()).or_default().clone()
    }

    fn handle(&self, name: &str, slot: Slot) -> StoreHandle {
        StoreHandle {
            name: name.to_string(),
            dir: self.store_dir(name),
            slot,
            options: self.options,
        }
    }

    /// Names of all persisted stores, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(io_error(&self.root)(e)),
        };
        while let Some(entry) = dir.next_entry().await.map_err(io_error(&self.root))? {
            let path = entry.path();
            if !path.join(INDEX_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// True if a store directory with this name exists on disk.
    pub fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.store_dir(name).exists()
    }

    /// Embed `chunks` into a brand-new store and persist it.
    ///
    /// # Errors
    ///
    /// [`StoreError::NameConflict`] if the name is already taken on disk.
    pub async fn create(
        &self,
        name: &str,
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
    ) -> Result<StoreHandle, StoreError> {
        validate_name(name)?;
        let slot = self.slot(name);
        let mut guard = slot.write().await;

        let dir = self.store_dir(name);
        if guard.is_some() || dir.exists() {
            return Err(StoreError::NameConflict {
                name: name.to_string(),
            });
        }

        let entries = embed_entries(chunks, provider, self.options).await?;
        let index = VectorIndex::new(name, EmbeddingModel::of(provider), entries);

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(io_error(&self.root))?;
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::NameConflict {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(io_error(&dir)(e)),
        }
        persist(&dir, &index).await?;

        tracing::info!(store = name, entries = index.entries.len(), "created store");
        *guard = Some(index);
        drop(guard);
        Ok(self.handle(name, slot))
    }

    /// Open a persisted store.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when nothing is persisted under `name`,
    /// [`StoreError::CorruptStore`] when the artifact cannot be decoded.
    pub async fn load(&self, name: &str) -> Result<StoreHandle, StoreError> {
        validate_name(name)?;
        let slot = self.slot(name);
        if slot.read().await.is_some() {
            return Ok(self.handle(name, slot));
        }

        let mut guard = slot.write().await;
        if guard.is_none() {
            let index = read_index(&self.store_dir(name), name).await?;
            tracing::info!(store = name, entries = index.entries.len(), "loaded store");
            *guard = Some(index);
        }
        drop(guard);
        Ok(self.handle(name, slot))
    }

    /// Append to `name`, repairing it first if needed.
    ///
    /// If the store cannot be loaded (missing, corrupt, or unreadable) it is
    /// replaced by a fresh store holding only `chunks`, and a
    /// [`StoreWarning`] explains what happened. Embedding-model mismatches
    /// are not repaired; they fail with [`StoreError::EmbeddingMismatch`].
    pub async fn upsert(
        &self,
        name: &str,
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
    ) -> Result<(StoreHandle, Option<StoreWarning>), StoreError> {
        validate_name(name)?;
        let slot = self.slot(name);
        let dir = self.store_dir(name);
        let mut guard = slot.write().await;

        // The artifact on disk is authoritative; a cached copy does not mask
        // a store that was deleted or damaged since it was loaded.
        let mut warning = None;
        match read_index(&dir, name).await {
            Ok(index) => *guard = Some(index),
            Err(StoreError::NotFound { .. }) => {
                *guard = None;
                warning = Some(StoreWarning::Created {
                    store: name.to_string(),
                });
            }
            Err(e) => {
                *guard = None;
                warning = Some(StoreWarning::Rebuilt {
                    store: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        match guard.as_mut() {
            Some(index) => {
                append_entries(&dir, index, chunks, provider, self.options).await?;
            }
            None => {
                let entries = embed_entries(chunks, provider, self.options).await?;
                let index = VectorIndex::new(name, EmbeddingModel::of(provider), entries);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(io_error(&dir))?;
                persist(&dir, &index).await?;
                *guard = Some(index);
            }
        }
        drop(guard);

        if let Some(w) = &warning {
            tracing::warn!(store = name, "{}", w);
        }
        Ok((self.handle(name, slot), warning))
    }
}

impl StoreHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn missing(&self) -> StoreError {
        StoreError::NotFound {
            name: self.name.clone(),
        }
    }

    pub async fn len(&self) -> usize {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|index| index.entries.len())
            .unwrap_or(0)
    }

    pub async fn info(&self) -> Result<StoreInfo, StoreError> {
        let guard = self.slot.read().await;
        guard
            .as_ref()
            .map(VectorIndex::info)
            .ok_or_else(|| self.missing())
    }

    /// Embed `chunks`, add them, and persist the whole index atomically.
    /// Returns the number of entries added.
    pub async fn append(
        &self,
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
    ) -> Result<usize, StoreError> {
        let mut guard = self.slot.write().await;
        let index = guard.as_mut().ok_or_else(|| self.missing())?;
        append_entries(&self.dir, index, chunks, provider, self.options).await
    }

    /// The `k` entries most similar to `query`, best first.
    /// An empty store yields an empty result.
    pub async fn search(
        &self,
        query: &str,
        provider: &dyn EmbeddingProvider,
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let guard = self.slot.read().await;
        let index = guard.as_ref().ok_or_else(|| self.missing())?;
        if index.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        index.check_provider(provider)?;

        let query_vec = embed_one(provider, query)
            .await
            .map_err(StoreError::Embedding)?;
        let ranked = top_k(
            &query_vec,
            index.entries.iter().map(|e| e.vector.as_slice()),
            k,
        );

        Ok(ranked
            .into_iter()
            .map(|s| {
                let entry = &index.entries[s.position];
                SearchHit {
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    score: s.score,
                }
            })
            .collect())
    }
}

async fn embed_entries(
    chunks: &[Chunk],
    provider: &dyn EmbeddingProvider,
    options: EmbedOptions,
) -> Result<Vec<IndexEntry>, StoreError> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_batched(provider, &texts, options.batch_size, options.concurrency)
        .await
        .map_err(StoreError::Embedding)?;

    Ok(chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry {
            id: Uuid::new_v4().to_string(),
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            vector,
        })
        .collect())
}

async fn append_entries(
    dir: &Path,
    index: &mut VectorIndex,
    chunks: &[Chunk],
    provider: &dyn EmbeddingProvider,
    options: EmbedOptions,
) -> Result<usize, StoreError> {
    index.check_provider(provider)?;
    if chunks.is_empty() {
        return Ok(0);
    }

    let new_entries = embed_entries(chunks, provider, options).await?;
    let added = new_entries.len();
    let previous_len = index.entries.len();
    let previous_updated = index.updated_at;

    index.entries.extend(new_entries);
    index.updated_at = Utc::now();
    if let Err(e) = persist(dir, index).await {
        // Keep memory in step with the artifact that is still on disk.
        index.entries.truncate(previous_len);
        index.updated_at = previous_updated;
        return Err(e);
    }

    tracing::info!(
        store = %index.name,
        added,
        total = index.entries.len(),
        "appended to store"
    );
    Ok(added)
}

async fn read_index(dir: &Path, name: &str) -> Result<VectorIndex, StoreError> {
    let path = dir.join(INDEX_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            })
        }
        Err(e) => return Err(io_error(&path)(e)),
    };

    let corrupt = |reason: String| StoreError::CorruptStore {
        name: name.to_string(),
        reason,
    };

    let index: VectorIndex = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if index.version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {}", index.version)));
    }
    if let Some(bad) = index
        .entries
        .iter()
        .find(|e| e.vector.len() != index.embedding.dims)
    {
        return Err(corrupt(format!(
            "entry {} has {} dims, expected {}",
            bad.id,
            bad.vector.len(),
            index.embedding.dims
        )));
    }
    Ok(index)
}

async fn persist(dir: &Path, index: &VectorIndex) -> Result<(), StoreError> {
    let data = serde_json::to_vec(index).map_err(|e| StoreError::Io {
        path: dir.join(INDEX_FILE),
        source: std::io::Error::other(e),
    })?;

    let tmp = dir.join(format!(".{}.{}.tmp", INDEX_FILE, Uuid::new_v4()));
    let target = dir.join(INDEX_FILE);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &target).await?;
        // Make the rename itself durable.
        #[cfg(unix)]
        tokio::fs::File::open(dir).await?.sync_all().await?;
        Ok::<(), std::io::Error>(())
    };

    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(&target)(e));
    }
    Ok(())
}

mod vector_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    use knowba_core::embedding::{blob_to_vec, vec_to_blob};

    pub fn serialize<S: Serializer>(vector: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(vec_to_blob(vector)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let blob = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        if blob.len() % 4 != 0 {
            return Err(serde::de::Error::custom("vector blob length is not a multiple of 4"));
        }
        Ok(blob_to_vec(&blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use knowba_core::models::Locator;
    use tempfile::TempDir;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: UnitMetadata {
                source: source.to_string(),
                locator: Locator::Document,
            },
            index: 0,
        }
    }

    fn stores(tmp: &TempDir) -> VectorStores {
        VectorStores::new(tmp.path().join("stores"), EmbedOptions::default())
    }

    #[test]
    fn test_validate_name() {
        for ok in ["docs", "my db", "q3-report_v2", "données"] {
            assert!(validate_name(ok).is_ok(), "{} should be valid", ok);
        }
        for bad in ["", " padded", "..", "../etc", "a/b", "a\\b", ".hidden", "a..b", "tab\there"] {
            assert!(
                matches!(validate_name(bad), Err(StoreError::InvalidName { .. })),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(validate_name(&"x".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn test_create_conflicts_with_existing_name() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        let p = HashingProvider::new(32);
        stores.create("docs", &[chunk("a.txt", "alpha")], &p).await.unwrap();

        let err = stores
            .create("docs", &[chunk("b.txt", "beta")], &p)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NameConflict { .. }));

        // A second registry over the same root sees the directory too.
        let err = VectorStores::new(stores.root(), EmbedOptions::default())
            .create("docs", &[chunk("b.txt", "beta")], &p)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        assert!(matches!(
            stores.load("nope").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));

        let dir = stores.root().join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(INDEX_FILE), b"{ not json").unwrap();
        assert!(matches!(
            stores.load("broken").await.unwrap_err(),
            StoreError::CorruptStore { .. }
        ));
    }

    #[tokio::test]
    async fn test_persisted_store_reloads_in_fresh_registry() {
        let tmp = TempDir::new().unwrap();
        let p = HashingProvider::new(64);
        {
            let stores = stores(&tmp);
            stores
                .create(
                    "kb",
                    &[chunk("a.txt", "rust ownership rules"), chunk("b.txt", "sourdough starter")],
                    &p,
                )
                .await
                .unwrap();
        }

        let stores = stores(&tmp);
        let handle = stores.load("kb").await.unwrap();
        assert_eq!(handle.len().await, 2);
        let hits = handle.search("sourdough starter", &p, 4).await.unwrap();
        assert_eq!(hits[0].text, "sourdough starter");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(stores.list().await.unwrap(), vec!["kb".to_string()]);
    }

    #[tokio::test]
    async fn test_append_rejects_other_embedding_model() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        let handle = stores
            .create("kb", &[chunk("a.txt", "alpha")], &HashingProvider::new(32))
            .await
            .unwrap();
        let err = handle
            .append(&[chunk("b.txt", "beta")], &HashingProvider::new(16))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmbeddingMismatch { expected_dims: 32, .. }));
        assert_eq!(handle.len().await, 1);
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        let p = HashingProvider::new(16);
        let handle = stores.create("empty", &[], &p).await.unwrap();
        assert!(handle.search("anything", &p, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_store_with_warning() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        let p = HashingProvider::new(16);
        let (handle, warning) = stores
            .upsert("fresh", &[chunk("a.txt", "alpha")], &p)
            .await
            .unwrap();
        assert_eq!(
            warning,
            Some(StoreWarning::Created {
                store: "fresh".to_string()
            })
        );
        assert_eq!(handle.len().await, 1);

        let (handle, warning) = stores
            .upsert("fresh", &[chunk("b.txt", "beta")], &p)
            .await
            .unwrap();
        assert!(warning.is_none());
        assert_eq!(handle.len().await, 2);
    }

    #[tokio::test]
    async fn test_upsert_rebuilds_loaded_store_damaged_on_disk() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        let p = HashingProvider::new(16);
        stores
            .create("kb", &[chunk("a.txt", "alpha"), chunk("b.txt", "beta")], &p)
            .await
            .unwrap();
        std::fs::write(stores.root().join("kb").join(INDEX_FILE), b"{ truncated").unwrap();

        let (handle, warning) = stores
            .upsert("kb", &[chunk("c.txt", "gamma")], &p)
            .await
            .unwrap();
        assert!(matches!(warning, Some(StoreWarning::Rebuilt { ref store, .. }) if store == "kb"));
        assert_eq!(handle.len().await, 1);

        let fresh = VectorStores::new(stores.root(), EmbedOptions::default());
        assert_eq!(fresh.load("kb").await.unwrap().len().await, 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let stores = stores(&tmp);
        let p = HashingProvider::new(16);
        let handle = stores.create("kb", &[chunk("a.txt", "alpha")], &p).await.unwrap();
        handle.append(&[chunk("b.txt", "beta")], &p).await.unwrap();

        let files: Vec<String> = std::fs::read_dir(stores.root().join("kb"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec![INDEX_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let tmp = TempDir::new().unwrap();
        let stores = Arc::new(stores(&tmp));
        let p = Arc::new(HashingProvider::new(16));
        stores.create("kb", &[], p.as_ref()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let stores = stores.clone();
            let p = p.clone();
            tasks.push(tokio::spawn(async move {
                let handle = stores.load("kb").await.unwrap();
                handle
                    .append(&[chunk("f.txt", &format!("entry {}", i))], p.as_ref())
                    .await
                    .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let fresh = VectorStores::new(stores.root(), EmbedOptions::default());
        assert_eq!(fresh.load("kb").await.unwrap().len().await, 8);
    }
}
