//! # Folio Core
//!
//! Core library for Folio, a local grounded question-answering pipeline.
//! Provides document extraction with OCR fallback, deterministic chunking,
//! the content-addressed corpus store, hybrid retrieval, grounded prompt
//! assembly, and multi-model ask orchestration.

pub mod chunk;
pub mod chunker;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod ollama;
pub mod orchestrator;
pub mod persistence;
pub mod prompt;
pub mod retriever;
pub mod server;
pub mod store;

// Re-export commonly used types at the crate root.
pub use chunk::{ChunkMeta, ChunkRecord, make_uid};
pub use chunker::chunk_text;
pub use config::{
    AskConfig, FolioConfig, IngestConfig, OcrConfig, OcrMode, OllamaConfig, RetrievalConfig,
    ServerConfig,
};
pub use error::{FolioError, Result};
pub use extract::{DocumentExtractor, MockPageExtractor, Page, PageExtractor};
pub use ollama::{ChatMessage, MockModelService, ModelService, OllamaClient, Role};
pub use orchestrator::{AskMode, AskOutcome, AskRequest, Orchestrator};
pub use prompt::{Citation, GroundedPrompt, REFUSAL};
pub use retriever::{HybridRetriever, RetrievedChunk};
pub use store::{BuildReport, CorpusStore, IngestPipeline, Manifest};
