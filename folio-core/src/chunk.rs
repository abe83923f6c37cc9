//! Chunk records and content addressing.
//!
//! A chunk is the atomic unit of retrieval: a bounded substring of one
//! document page, identified by a deterministic content address (`uid`)
//! derived from its location and text. The uid is the dedup key for
//! incremental ingest and must be stable across runs and ingest modes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Location of a chunk within the source collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Document file name (e.g. `handbook.pdf`).
    pub doc: String,
    /// Full path of the source document.
    pub path: String,
    /// 1-based page number within the document.
    pub page: u32,
}

/// One record of the corpus log: content address, location, and text.
///
/// `uid` defaults to empty on deserialization so logs written before
/// content addressing still parse; readers recompute the uid for such
/// records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub uid: String,
    pub meta: ChunkMeta,
    pub text: String,
}

impl ChunkRecord {
    /// Build a record, deriving the uid from the meta and text.
    pub fn new(meta: ChunkMeta, text: String) -> Self {
        let uid = make_uid(&meta, &text);
        Self { uid, meta, text }
    }
}

/// Derive the content address of a chunk.
///
/// The digest payload is `"{doc}|{page}|{len}|{text}"` where `len` is the
/// number of Unicode scalar values in `text`; the uid is the lowercase hex
/// SHA-256 of its UTF-8 bytes. Pure and deterministic: the same text at
/// the same location always yields the same uid.
pub fn make_uid(meta: &ChunkMeta, text: &str) -> String {
    let payload = format!(
        "{}|{}|{}|{}",
        meta.doc,
        meta.page,
        text.chars().count(),
        text
    );
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
