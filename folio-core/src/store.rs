//! The corpus store and its two ingest entry points.
//!
//! A store is one logical append-only structure with three physical
//! projections under a single directory: `chunks.jsonl` (the record
//! log), `index.json` (the vector index, row i embedding log record i)
//! and `manifest.json` (build metadata). Row alignment between log and
//! index is the core invariant; [`CorpusStore::open`] refuses to serve
//! from a store where the three artifacts disagree.
//!
//! The store takes no locks. Ingest and retrieval must not run
//! concurrently against the same directory; callers keep ingest and
//! serve as separate process modes.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::chunk::{ChunkMeta, ChunkRecord, make_uid};
use crate::chunker::chunk_text;
use crate::config::{IngestConfig, OcrMode};
use crate::error::{FolioError, IngestError, Result, StoreError};
use crate::extract::PageExtractor;
use crate::index::FlatIndex;
use crate::ollama::ModelService;
use crate::persistence;

pub const LOG_FILE: &str = "chunks.jsonl";
pub const INDEX_FILE: &str = "index.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Printed by callers when an incremental build found nothing to add.
pub const NO_NEW_CHUNKS: &str = "No new chunks detected. Nothing to do.";

/// Build metadata persisted alongside the log and index. Rewritten
/// after every build; `vector_count` must equal the log length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub vector_count: usize,
    pub vector_dim: usize,
    pub ocr_mode: OcrMode,
    pub ocr_langs: String,
}

/// Outcome of a full or incremental build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub new_chunks: usize,
    pub total_chunks: usize,
    pub vector_dim: usize,
}

impl BuildReport {
    /// True when an incremental build had nothing to add.
    pub fn is_noop(&self) -> bool {
        self.new_chunks == 0
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// An opened, consistency-checked store, ready for retrieval.
pub struct CorpusStore {
    records: Vec<ChunkRecord>,
    index: FlatIndex,
    manifest: Manifest,
}

impl CorpusStore {
    /// Open a store directory, verifying that log, index, and manifest
    /// describe the same build.
    pub fn open(dir: &Path) -> Result<Self> {
        let log_path = dir.join(LOG_FILE);
        let index_path = dir.join(INDEX_FILE);
        let manifest_path = dir.join(MANIFEST_FILE);
        for path in [&log_path, &index_path, &manifest_path] {
            if !path.exists() {
                return Err(StoreError::Missing { path: path.clone() }.into());
            }
        }

        let records = load_records(&log_path)?;
        let index = FlatIndex::load(&index_path)
            .map_err(|e| StoreError::CorruptIndex {
                message: e.to_string(),
            })?
            .ok_or_else(|| StoreError::Missing {
                path: index_path.clone(),
            })?;
        let manifest: Manifest = persistence::load_json(&manifest_path)
            .map_err(|e| StoreError::CorruptManifest {
                message: e.to_string(),
            })?
            .ok_or_else(|| StoreError::Missing {
                path: manifest_path.clone(),
            })?;

        if records.len() != index.len() {
            return Err(StoreError::Misaligned {
                log_len: records.len(),
                index_count: index.len(),
            }
            .into());
        }
        if manifest.vector_count != records.len() {
            return Err(StoreError::ManifestMismatch {
                expected: manifest.vector_count,
                found: records.len(),
            }
            .into());
        }

        debug!(records = records.len(), dim = index.dim(), "Opened corpus store");
        Ok(Self {
            records,
            index,
            manifest,
        })
    }

    /// Open a store if any of its artifacts exist; `Ok(None)` for a
    /// directory with no store at all. A partially present store is an
    /// error, not a fresh start.
    pub fn open_optional(dir: &Path) -> Result<Option<Self>> {
        let any_present = [LOG_FILE, INDEX_FILE, MANIFEST_FILE]
            .iter()
            .any(|name| dir.join(name).exists());
        if !any_present {
            return Ok(None);
        }
        Ok(Some(Self::open(dir)?))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, row: usize) -> Option<&ChunkRecord> {
        self.records.get(row)
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Exact top-k rows by inner product against a normalized query.
    pub fn search(&self, query: &[f32], k: usize) -> std::result::Result<Vec<(usize, f32)>, StoreError> {
        self.index.search(query, k)
    }

    /// Delete the store directory and recreate it empty.
    pub fn reset(dir: &Path) -> std::io::Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)
    }
}

fn load_records(path: &Path) -> Result<Vec<ChunkRecord>> {
    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mut record: ChunkRecord =
            serde_json::from_str(line).map_err(|e| StoreError::CorruptLog {
                line: i + 1,
                message: e.to_string(),
            })?;
        // Logs written before content addressing carry no uid.
        if record.uid.is_empty() {
            record.uid = make_uid(&record.meta, &record.text);
        }
        records.push(record);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Drives full and incremental corpus builds: discovery, extraction,
/// chunking, embedding, and persistence.
pub struct IngestPipeline {
    extractor: Arc<dyn PageExtractor>,
    service: Arc<dyn ModelService>,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        service: Arc<dyn ModelService>,
        config: IngestConfig,
    ) -> Self {
        Self {
            extractor,
            service,
            config,
        }
    }

    /// Build a fresh store from every document in the data directory,
    /// replacing whatever was there.
    pub async fn full_build(&self) -> Result<BuildReport> {
        let records = self.build_corpus().await?;
        info!(
            chunks = records.len(),
            model = %self.config.embedding_model,
            "Embedding corpus"
        );
        let vectors = self.embed_all(&records).await?;

        let mut index = FlatIndex::new();
        index.add(&vectors)?;

        let dir = &self.config.store_dir;
        let lines = record_lines(&records)?;
        persistence::atomic_write(&dir.join(LOG_FILE), (lines.join("\n") + "\n").as_bytes())?;
        index.save(&dir.join(INDEX_FILE))?;
        persistence::atomic_write_json(&dir.join(MANIFEST_FILE), &self.manifest_for(&index))?;

        info!(total = index.len(), dim = index.dim(), "Full build complete");
        Ok(BuildReport {
            new_chunks: records.len(),
            total_chunks: index.len(),
            vector_dim: index.dim(),
        })
    }

    /// Extend an existing store (or start one) with chunks whose uid is
    /// not in the log yet. Existing rows are never rewritten or
    /// reordered.
    pub async fn incremental_build(&self) -> Result<BuildReport> {
        let dir = &self.config.store_dir;
        let (mut index, prior_manifest, known) = match CorpusStore::open_optional(dir)? {
            Some(store) => {
                self.check_manifest(&store.manifest)?;
                let uids: HashSet<String> =
                    store.records.iter().map(|r| r.uid.clone()).collect();
                (store.index, Some(store.manifest), uids)
            }
            None => (FlatIndex::new(), None, HashSet::new()),
        };
        let prior_count = index.len();

        let candidate = self.build_corpus().await?;
        let new_records: Vec<ChunkRecord> = candidate
            .into_iter()
            .filter(|r| !known.contains(&r.uid))
            .collect();

        if new_records.is_empty() {
            info!(total = prior_count, "No new chunks detected");
            return Ok(BuildReport {
                new_chunks: 0,
                total_chunks: prior_count,
                vector_dim: index.dim(),
            });
        }

        info!(
            new = new_records.len(),
            model = %self.config.embedding_model,
            "Embedding new chunks"
        );
        let vectors = self.embed_all(&new_records).await?;
        index.add(&vectors)?;

        index.save(&dir.join(INDEX_FILE))?;
        persistence::append_lines(&dir.join(LOG_FILE), &record_lines(&new_records)?)?;
        let manifest = match prior_manifest {
            Some(mut m) => {
                m.vector_count = index.len();
                m
            }
            None => self.manifest_for(&index),
        };
        persistence::atomic_write_json(&dir.join(MANIFEST_FILE), &manifest)?;

        info!(
            new = new_records.len(),
            total = index.len(),
            "Incremental build complete"
        );
        Ok(BuildReport {
            new_chunks: new_records.len(),
            total_chunks: index.len(),
            vector_dim: index.dim(),
        })
    }

    /// Extract, chunk, and address every document in the data directory.
    async fn build_corpus(&self) -> Result<Vec<ChunkRecord>> {
        let documents = discover_documents(&self.config.data_dir)?;
        info!(documents = documents.len(), "Building corpus");

        let mut records = Vec::new();
        for path in &documents {
            let doc = document_name(path);
            let pages = self.extractor.extract(path).await?;
            let before = records.len();
            for page in &pages {
                for text in chunk_text(&page.text, self.config.chunk_size, self.config.chunk_overlap)
                {
                    let meta = ChunkMeta {
                        doc: doc.clone(),
                        path: path.display().to_string(),
                        page: page.page,
                    };
                    records.push(ChunkRecord::new(meta, text));
                }
            }
            debug!(doc = %doc, pages = pages.len(), chunks = records.len() - before, "Extracted document");
        }

        if records.is_empty() {
            return Err(IngestError::NoText.into());
        }
        Ok(records)
    }

    /// Embed records with bounded concurrency, preserving record order,
    /// and L2-normalize the results.
    async fn embed_all(&self, records: &[ChunkRecord]) -> Result<Vec<Vec<f32>>> {
        let concurrency = self.config.embed_concurrency.max(1);
        let vectors: Vec<Vec<f32>> = stream::iter(
            records
                .iter()
                .map(|r| self.service.embed(&r.text, &self.config.embedding_model)),
        )
        .buffered(concurrency)
        .try_collect()
        .await?;
        Ok(vectors.into_iter().map(l2_normalize).collect())
    }

    fn check_manifest(&self, manifest: &Manifest) -> std::result::Result<(), IngestError> {
        if manifest.chunk_size != self.config.chunk_size
            || manifest.chunk_overlap != self.config.chunk_overlap
        {
            return Err(IngestError::ChunkParamsChanged {
                stored_size: manifest.chunk_size,
                stored_overlap: manifest.chunk_overlap,
                size: self.config.chunk_size,
                overlap: self.config.chunk_overlap,
            });
        }
        if manifest.embedding_model != self.config.embedding_model {
            return Err(IngestError::EmbeddingModelChanged {
                stored: manifest.embedding_model.clone(),
                configured: self.config.embedding_model.clone(),
            });
        }
        Ok(())
    }

    fn manifest_for(&self, index: &FlatIndex) -> Manifest {
        Manifest {
            embedding_model: self.config.embedding_model.clone(),
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
            vector_count: index.len(),
            vector_dim: index.dim(),
            ocr_mode: self.config.ocr.mode,
            ocr_langs: self.config.ocr.langs.clone(),
        }
    }
}

fn record_lines(records: &[ChunkRecord]) -> Result<Vec<String>> {
    records
        .iter()
        .map(|r| serde_json::to_string(r).map_err(FolioError::from))
        .collect()
}

fn document_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

/// Collect `*.pdf` and `*.txt` files directly under `dir`, sorted by
/// name for a deterministic log order.
pub fn discover_documents(dir: &Path) -> std::result::Result<Vec<PathBuf>, IngestError> {
    let mut documents: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            matches!(ext.as_deref(), Some("pdf") | Some("txt"))
        })
        .collect();
    documents.sort();

    if documents.is_empty() {
        return Err(IngestError::NoDocuments {
            dir: dir.to_path_buf(),
        });
    }
    Ok(documents)
}

/// Scale a vector to unit Euclidean norm. Zero vectors are left as-is
/// (norm treated as 1) so they cannot poison a query with NaN.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    for v in &mut vector {
        *v /= norm;
    }
    vector
}
