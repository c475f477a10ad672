//! Batched embedding of documents with per-batch retry and failure isolation.

pub mod openai;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::assembler::{Document, ALL_PROCESSED_FILE};
use crate::checkpoint::{read_json, write_json_atomic};
use crate::error::PipelineError;

pub use openai::OpenAiEmbedder;

/// Combined output of the embedding stage.
pub const ALL_EMBEDDED_FILE: &str = "all_embedded_data.json";

/// A vector tagged with the position of its input in the request.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEmbedding {
    /// Position of the input text in the request.
    pub index: usize,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// Anything that turns a batch of texts into vectors.
///
/// Results may come back in any order; `index` ties each vector to its input.
pub trait EmbeddingService {
    /// Embeds `texts` in one request.
    fn embed(&self, texts: &[&str]) -> Result<Vec<IndexedEmbedding>>;
}

/// A document paired with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    /// Document the vector was computed for.
    #[serde(flatten)]
    pub document: Document,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// What to do when a batch still fails after its last retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Leave placeholders; the affected documents are dropped.
    #[default]
    Drop,
    /// Stop the stage with an error.
    Abort,
}

/// Chunks texts into service calls.
#[derive(Debug, Clone)]
pub struct EmbeddingBatcher {
    /// Texts per request.
    pub batch_size: usize,
    /// Attempts per batch.
    pub retry_limit: usize,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Delay after each successful batch.
    pub pacing: Duration,
    /// Required vector length; inferred from the first usable batch when unset.
    pub expected_dimension: Option<usize>,
    /// Handling of batches that exhaust retries.
    pub failure_policy: FailurePolicy,
}

impl Default for EmbeddingBatcher {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry_limit: 3,
            retry_delay: Duration::from_secs(5),
            pacing: Duration::from_millis(500),
            expected_dimension: None,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

impl EmbeddingBatcher {
    /// One entry per input text, in input order; `None` marks a failed input.
    pub fn embed_texts<E: EmbeddingService + ?Sized>(
        &self,
        service: &E,
        texts: &[&str],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let batch_size = self.batch_size.max(1);
        let attempts = self.retry_limit.max(1);
        let mut dimension = self.expected_dimension;
        let mut out = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            let mut attempt = 0;
            let vectors = loop {
                attempt += 1;
                match service.embed(batch).and_then(|data| in_input_order(data, batch.len())) {
                    Ok(vectors) => {
                        if !self.pacing.is_zero() {
                            thread::sleep(self.pacing);
                        }
                        break Some(vectors);
                    }
                    Err(err) => {
                        warn!(batch = batch_no, attempt, attempts, "embedding batch failed: {err:#}");
                        if attempt < attempts {
                            info!(delay_ms = self.retry_delay.as_millis() as u64, "retrying batch");
                            if !self.retry_delay.is_zero() {
                                thread::sleep(self.retry_delay);
                            }
                            continue;
                        }
                        error!(batch = batch_no, attempts, "giving up on embedding batch");
                        if self.failure_policy == FailurePolicy::Abort {
                            return Err(err.context(format!(
                                "embedding batch {batch_no} failed after {attempts} attempts"
                            )));
                        }
                        break None;
                    }
                }
            };

            match vectors {
                Some(vectors) => {
                    if dimension.is_none() {
                        dimension = dominant_dimension(vectors.iter().map(Vec::len));
                    }
                    for vector in vectors {
                        match dimension {
                            Some(expected) if vector.len() == expected => out.push(Some(vector)),
                            expected => {
                                warn!(
                                    batch = batch_no,
                                    got = vector.len(),
                                    ?expected,
                                    "dropping embedding with unexpected dimension"
                                );
                                out.push(None);
                            }
                        }
                    }
                }
                None => out.extend(std::iter::repeat_with(|| None).take(batch.len())),
            }
        }
        Ok(out)
    }

    /// Embeds documents, dropping those whose embedding failed; order is kept.
    pub fn embed_documents<E: EmbeddingService + ?Sized>(
        &self,
        service: &E,
        documents: Vec<Document>,
    ) -> Result<Vec<EmbeddedDocument>> {
        let texts: Vec<&str> = documents.iter().map(|doc| doc.text.as_str()).collect();
        let embeddings = self.embed_texts(service, &texts)?;
        Ok(documents
            .into_iter()
            .zip(embeddings)
            .filter_map(|(document, embedding)| {
                embedding.map(|embedding| EmbeddedDocument {
                    document,
                    embedding,
                })
            })
            .collect())
    }
}

/// Most common non-zero length, preferring the earliest on a tie.
///
/// Empty vectors never set the dimension, so one degenerate entry cannot
/// invalidate the well-formed ones around it.
pub fn dominant_dimension(lengths: impl IntoIterator<Item = usize>) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for len in lengths.into_iter().filter(|len| *len > 0) {
        match counts.iter_mut().find(|(seen, _)| *seen == len) {
            Some((_, count)) => *count += 1,
            None => counts.push((len, 1)),
        }
    }
    counts
        .iter()
        .fold(None, |best: Option<(usize, usize)>, &(len, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((len, count)),
        })
        .map(|(len, _)| len)
}

/// Sorts a response by index and checks it covers exactly `0..expected`.
fn in_input_order(mut data: Vec<IndexedEmbedding>, expected: usize) -> Result<Vec<Vec<f32>>> {
    data.sort_by_key(|entry| entry.index);
    if data.len() != expected {
        return Err(anyhow!(
            "service returned {} embeddings for {} inputs",
            data.len(),
            expected
        ));
    }
    if let Some((pos, entry)) = data.iter().enumerate().find(|(pos, entry)| entry.index != *pos) {
        return Err(anyhow!("missing embedding for input {pos} (next index {})", entry.index));
    }
    Ok(data.into_iter().map(|entry| entry.embedding).collect())
}

/// File-level driver for the embedding stage.
pub struct EmbeddingStage<E> {
    service: E,
    batcher: EmbeddingBatcher,
    processed_dir: PathBuf,
    embeddings_dir: PathBuf,
}

impl<E: EmbeddingService> EmbeddingStage<E> {
    /// Reads from `processed_dir` and writes to `embeddings_dir`.
    pub fn new(
        service: E,
        batcher: EmbeddingBatcher,
        processed_dir: PathBuf,
        embeddings_dir: PathBuf,
    ) -> Self {
        Self {
            service,
            batcher,
            processed_dir,
            embeddings_dir,
        }
    }

    /// Directory embedded documents are written to.
    pub fn embeddings_dir(&self) -> &Path {
        &self.embeddings_dir
    }

    /// Embeds `<processed_dir>/<name>` into `<embeddings_dir>/embedded_<name>`.
    pub fn process_file(&self, name: &str) -> Result<Vec<EmbeddedDocument>> {
        self.embed_file(name, &format!("embedded_{name}"))
    }

    /// Embeds every `processed_*.json` and writes the concatenation as the combined output.
    pub fn process_all_files(&self) -> Result<Vec<EmbeddedDocument>> {
        info!("processing all files");
        let mut names: Vec<String> = fs::read_dir(&self.processed_dir)
            .map_err(|_| PipelineError::MissingInput(self.processed_dir.clone()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("processed_") && name.ends_with(".json"))
            .collect();
        names.sort();

        let mut all = Vec::new();
        for name in &names {
            match self.process_file(name) {
                Ok(documents) => all.extend(documents),
                Err(err) => error!(file = %name, "error processing file: {err:#}"),
            }
        }
        write_json_atomic(&self.embeddings_dir.join(ALL_EMBEDDED_FILE), &all)?;
        info!(count = all.len(), "embedded documents across all files");
        Ok(all)
    }

    /// Embeds `all_processed_data.json` into `all_embedded_data.json`.
    pub fn process_combined_file(&self) -> Result<Vec<EmbeddedDocument>> {
        self.embed_file(ALL_PROCESSED_FILE, ALL_EMBEDDED_FILE)
    }

    fn embed_file(&self, input: &str, output: &str) -> Result<Vec<EmbeddedDocument>> {
        info!(file = input, "embedding file");
        let path = self.processed_dir.join(input);
        if !path.exists() {
            return Err(PipelineError::MissingInput(path).into());
        }
        let documents: Vec<Document> =
            read_json(&path).map_err(|err| PipelineError::MalformedInput {
                path: path.clone(),
                reason: format!("{err:#}"),
            })?;
        if documents.is_empty() {
            warn!(file = input, "no documents found");
            return Ok(Vec::new());
        }

        let total = documents.len();
        info!(count = total, "generating embeddings");
        let embedded = self.batcher.embed_documents(&self.service, documents)?;
        write_json_atomic(&self.embeddings_dir.join(output), &embedded)?;
        info!(
            file = output,
            saved = embedded.len(),
            dropped = total - embedded.len(),
            "saved embedded documents"
        );
        Ok(embedded)
    }
}
