//! Batched upload of embedded documents with vector-index provisioning.
//!
//! Nothing in here returns an error: every failure is logged and reflected in
//! the returned count of persisted documents.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::embedder::{dominant_dimension, EmbeddedDocument};
use crate::store::{DocumentStore, DEFAULT_DIMENSION, DEFAULT_INDEX_NAME};

/// Batching and provisioning knobs for an upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Documents per insert.
    pub batch_size: usize,
    /// Delete existing documents first.
    pub clear_first: bool,
    /// Vector index to ensure.
    pub index_name: String,
    /// Required embedding length; the most common document length when unset.
    pub dimension: Option<usize>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            clear_first: false,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            dimension: None,
        }
    }
}

/// Uploads `documents`, returning how many were persisted.
pub async fn upload_documents<S: DocumentStore>(
    store: &mut S,
    documents: &[EmbeddedDocument],
    options: &UploadOptions,
) -> usize {
    if let Err(err) = store.connect().await {
        error!("error connecting to document store: {err:#}");
        return 0;
    }
    let uploaded = upload_connected(store, documents, options).await;
    store.disconnect().await;
    uploaded
}

async fn upload_connected<S: DocumentStore>(
    store: &mut S,
    documents: &[EmbeddedDocument],
    options: &UploadOptions,
) -> usize {
    let dimension = options
        .dimension
        .filter(|dim| *dim > 0)
        .or_else(|| dominant_dimension(documents.iter().map(|doc| doc.embedding.len())))
        .unwrap_or(DEFAULT_DIMENSION);

    if let Err(err) = store.prepare(dimension).await {
        error!(dimension, "error preparing document store: {err:#}");
        return 0;
    }

    if options.clear_first {
        match store.delete_all().await {
            Ok(deleted) => info!(deleted, "cleared existing documents"),
            Err(err) => error!("error clearing documents: {err:#}"),
        }
    }

    if let Err(err) = ensure_index(store, &options.index_name, dimension).await {
        warn!("ignoring vector index error: {err:#}");
    }

    let valid: Vec<EmbeddedDocument> = documents
        .iter()
        .filter(|doc| doc.embedding.len() == dimension)
        .cloned()
        .collect();
    if valid.len() < documents.len() {
        warn!(
            skipped = documents.len() - valid.len(),
            dimension,
            "skipping documents without a valid embedding"
        );
    }

    let batch_size = options.batch_size.max(1);
    let batches = valid.len().div_ceil(batch_size);
    let mut total = 0;
    for (i, batch) in valid.chunks(batch_size).enumerate() {
        match store.insert_many(batch).await {
            Ok(inserted) => {
                total += inserted;
                info!(batch = i + 1, batches, inserted, "uploaded batch");
            }
            Err(err) => error!(batch = i + 1, batches, "error uploading batch: {err:#}"),
        }
    }
    info!(total, "upload finished");
    total
}

async fn ensure_index<S: DocumentStore>(
    store: &mut S,
    name: &str,
    dimension: usize,
) -> anyhow::Result<()> {
    let existing = store.list_index_names().await?;
    if existing.iter().any(|index| index == name) {
        info!(index = name, "vector index exists");
        return Ok(());
    }
    warn!(index = name, "vector index does not exist, creating it");
    store.create_vector_index(name, dimension).await
}

/// Uploads the document list stored at `path`.
///
/// A missing file, a file that is not a JSON list, or an empty list uploads
/// nothing and returns 0 without touching the store.
pub async fn upload_file<S: DocumentStore>(
    store: &mut S,
    path: &Path,
    options: &UploadOptions,
) -> usize {
    match load_upload_file(path) {
        Some(documents) => upload_documents(store, &documents, options).await,
        None => 0,
    }
}

/// Uploads every `embedded_*.json` file in `dir`; only the first upload clears.
pub async fn upload_all_files<S: DocumentStore>(
    store: &mut S,
    dir: &Path,
    options: &UploadOptions,
) -> usize {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("embedded_") && name.ends_with(".json"))
            .collect(),
        Err(err) => {
            error!(dir = %dir.display(), "cannot list embeddings directory: {err}");
            return 0;
        }
    };
    names.sort();

    let mut options = options.clone();
    let mut total = 0;
    for name in &names {
        total += upload_file(store, &dir.join(name), &options).await;
        options.clear_first = false;
    }
    info!(total, files = names.len(), "uploaded all files");
    total
}

fn load_upload_file(path: &Path) -> Option<Vec<EmbeddedDocument>> {
    if !path.exists() {
        error!(path = %path.display(), "file not found, aborting upload");
        return None;
    }
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            error!(path = %path.display(), "error reading upload file: {err}");
            return None;
        }
    };
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            error!(path = %path.display(), "upload file is not valid JSON: {err}");
            return None;
        }
    };
    let Value::Array(items) = value else {
        error!(path = %path.display(), "file does not contain a list of documents");
        return None;
    };
    if items.is_empty() {
        warn!(path = %path.display(), "no documents found");
        return None;
    }

    let total = items.len();
    let documents: Vec<EmbeddedDocument> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if documents.len() < total {
        warn!(
            skipped = total - documents.len(),
            "skipping entries that are not embedded documents"
        );
    }
    Some(documents)
}
