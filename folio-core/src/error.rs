//! Error types for the Folio core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the model service, corpus store, ingest, extraction, and ask
//! orchestration domains.

use std::path::PathBuf;

/// Top-level error type for the Folio core library.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    #[error("Model service error: {0}")]
    Ollama(#[from] OllamaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Ask error: {0}")]
    Ask(#[from] AskError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from model service interactions.
#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Model service not reachable at {base_url}; ensure it is running")]
    Unreachable { base_url: String },
}

/// Errors from the corpus store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store artifact missing: {path}")]
    Missing { path: PathBuf },

    #[error("Corrupt record log at line {line}: {message}")]
    CorruptLog { line: usize, message: String },

    #[error("Corrupt index file: {message}")]
    CorruptIndex { message: String },

    #[error("Corrupt manifest file: {message}")]
    CorruptManifest { message: String },

    #[error("Store misaligned: {log_len} log records vs {index_count} index rows; run a full ingest to rebuild")]
    Misaligned { log_len: usize, index_count: usize },

    #[error("Manifest vector_count is {expected} but the store holds {found} rows; run a full ingest to rebuild")]
    ManifestMismatch { expected: usize, found: usize },

    #[error("Vector dimension mismatch: index holds {expected}-dim rows, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Errors from corpus ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No source documents found in {dir}")]
    NoDocuments { dir: PathBuf },

    #[error("No extractable text found in the source documents (even after OCR fallback)")]
    NoText,

    #[error(
        "Chunk parameters changed since the last build \
         (stored size={stored_size} overlap={stored_overlap}, configured size={size} overlap={overlap}); \
         run a full ingest to rebuild"
    )]
    ChunkParamsChanged {
        stored_size: usize,
        stored_overlap: usize,
        size: usize,
        overlap: usize,
    },

    #[error(
        "Embedding model changed since the last build \
         (stored '{stored}', configured '{configured}'); run a full ingest to rebuild"
    )]
    EmbeddingModelChanged { stored: String, configured: String },
}

/// Errors from page extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("'{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Unsupported document format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from ask orchestration.
#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("Model '{model}' call failed: {source}")]
    Model {
        model: String,
        source: OllamaError,
    },

    #[error("All {count} consensus candidates failed")]
    AllCandidatesFailed { count: usize },

    #[error("No models configured")]
    NoModels,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// A type alias for results using the top-level `FolioError`.
pub type Result<T> = std::result::Result<T, FolioError>;
