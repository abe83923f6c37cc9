//! Configuration system for Folio.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> CLI overrides. Configuration is loaded from
//! `~/.config/folio/config.toml` and/or `.folio/config.toml` in the
//! working directory; environment variables use the `FOLIO_` prefix with
//! `__` as the section separator (e.g. `FOLIO_INGEST__CHUNK_SIZE`).
//!
//! Every ranking and routing heuristic the pipeline uses is a named field
//! here rather than an embedded constant, so behavior is tunable without
//! code changes.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::orchestrator::AskMode;

/// Top-level configuration for the Folio pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolioConfig {
    pub ollama: OllamaConfig,
    pub ingest: IngestConfig,
    pub retrieval: RetrievalConfig,
    pub ask: AskConfig,
    pub server: ServerConfig,
}

/// Model service endpoint and request options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama-compatible server.
    pub base_url: String,
    /// Context window requested for chat calls.
    pub num_ctx: usize,
    /// Sampling temperature for chat calls.
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            num_ctx: 8192,
            temperature: 0.2,
        }
    }
}

/// Corpus build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory scanned for source documents.
    pub data_dir: PathBuf,
    /// Directory holding the persisted store (log, index, manifest).
    pub store_dir: PathBuf,
    /// Embedding model name. Must stay stable for the life of a store.
    pub embedding_model: String,
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters of context shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Concurrent embedding requests during ingest (1 = sequential).
    pub embed_concurrency: usize,
    /// OCR fallback behavior.
    pub ocr: OcrConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            store_dir: PathBuf::from("store"),
            embedding_model: "nomic-embed-text".to_string(),
            chunk_size: 1200,
            chunk_overlap: 200,
            embed_concurrency: 4,
            ocr: OcrConfig::default(),
        }
    }
}

/// When to run OCR on extracted pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// Never run OCR; native extraction only.
    Off,
    /// OCR the document when any page yields too little native text.
    #[default]
    Auto,
    /// Always OCR before extraction.
    Force,
}

impl std::fmt::Display for OcrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OcrMode::Off => "off",
            OcrMode::Auto => "auto",
            OcrMode::Force => "force",
        };
        f.write_str(s)
    }
}

/// OCR fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub mode: OcrMode,
    /// Tesseract language codes passed to the OCR tool (e.g. "eng+deu").
    pub langs: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: OcrMode::Auto,
            langs: "eng".to_string(),
        }
    }
}

/// Hybrid retrieval tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// How many chunks an answer is grounded on.
    pub top_k: usize,
    /// Dense over-fetch factor: the index is asked for
    /// `top_k * candidate_multiplier` rows before lexical re-ranking.
    pub candidate_multiplier: usize,
    /// Weight of the dense similarity score in the blend.
    pub similarity_weight: f32,
    /// Weight of the lexical term-count score in the blend. The lexical
    /// score is an unbounded raw count while similarity is bounded in
    /// [-1, 1]; heavy keyword repetition can dominate the ranking.
    pub lexical_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_multiplier: 6,
            similarity_weight: 0.75,
            lexical_weight: 0.25,
        }
    }
}

/// Answer orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskConfig {
    /// Orchestration strategy: single model ("off"), router, or consensus.
    pub mode: AskMode,
    /// Candidate chat models, in priority order. The router treats the
    /// first as the fast model and the second as the deep model;
    /// consensus uses at most the first three.
    pub models: Vec<String>,
    /// Model that arbitrates consensus candidates.
    pub judge_model: String,
    /// Router heuristics.
    pub routing: RoutingConfig,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            mode: AskMode::default(),
            models: vec!["llama3.1:8b".to_string()],
            judge_model: "llama3.1:8b".to_string(),
            routing: RoutingConfig::default(),
        }
    }
}

/// Heuristics for routing a question to the fast or deep model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Questions longer than this many characters route to the deep model.
    pub length_threshold: usize,
    /// Questions containing any of these substrings (lowercased match)
    /// route to the deep model.
    pub keywords: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            length_threshold: 220,
            keywords: [
                "compare",
                "contrast",
                "trade-off",
                "why",
                "how",
                "analyz",
                "synthesize",
                "across",
                "multiple",
                "summarize thoroughly",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// HTTP query surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl FolioConfig {
    /// Validate the configuration, clamping recoverable problems.
    ///
    /// Returns human-readable warnings for every clamp applied; hard
    /// errors are reserved for values with no sensible correction.
    pub fn validate(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();

        if self.ingest.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                message: "ingest.chunk_size must be at least 1".to_string(),
            });
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.top_k must be at least 1".to_string(),
            });
        }
        if self.retrieval.candidate_multiplier == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.candidate_multiplier must be at least 1".to_string(),
            });
        }

        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            let clamped = self.ingest.chunk_size - 1;
            warnings.push(format!(
                "ingest.chunk_overlap ({}) must be smaller than chunk_size ({}); clamping to {}",
                self.ingest.chunk_overlap, self.ingest.chunk_size, clamped
            ));
            self.ingest.chunk_overlap = clamped;
        }
        if self.ingest.embed_concurrency == 0 {
            warnings.push("ingest.embed_concurrency of 0 makes no progress; clamping to 1".to_string());
            self.ingest.embed_concurrency = 1;
        }

        Ok(warnings)
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `FOLIO_`)
/// 3. Working-directory config (`.folio/config.toml`)
/// 4. User config (`~/.config/folio/config.toml`)
/// 5. Built-in defaults
///
/// An explicit `config_file` replaces the discovered file layers (3 and
/// 4) entirely; environment and overrides still apply on top.
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&FolioConfig>,
) -> Result<FolioConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(FolioConfig::default()));

    if let Some(file) = config_file {
        figment = figment.merge(Toml::file(file));
    } else {
        // User-level config
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "folio", "folio") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                figment = figment.merge(Toml::file(&user_config));
            }
        }

        // Working-directory config
        if let Some(ws) = workspace {
            let ws_config = ws.join(".folio").join("config.toml");
            if ws_config.exists() {
                figment = figment.merge(Toml::file(&ws_config));
            }
        }
    }

    // Environment variables (FOLIO_OLLAMA__BASE_URL, FOLIO_ASK__MODE, etc.)
    figment = figment.merge(Env::prefixed("FOLIO_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_tuning() {
        let cfg = FolioConfig::default();
        assert_eq!(cfg.ollama.base_url, "http://localhost:11434");
        assert_eq!(cfg.ollama.num_ctx, 8192);
        assert_eq!(cfg.ingest.chunk_size, 1200);
        assert_eq!(cfg.ingest.chunk_overlap, 200);
        assert_eq!(cfg.ingest.embedding_model, "nomic-embed-text");
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.candidate_multiplier, 6);
        assert!((cfg.retrieval.similarity_weight - 0.75).abs() < f32::EPSILON);
        assert!((cfg.retrieval.lexical_weight - 0.25).abs() < f32::EPSILON);
        assert_eq!(cfg.ask.routing.length_threshold, 220);
        assert_eq!(cfg.ask.models, vec!["llama3.1:8b".to_string()]);
    }

    #[test]
    fn test_routing_keywords_cover_synthesis_vocabulary() {
        let routing = RoutingConfig::default();
        for kw in ["compare", "why", "how", "synthesize", "summarize thoroughly"] {
            assert!(routing.keywords.iter().any(|k| k == kw), "missing {kw}");
        }
    }

    #[test]
    fn test_validate_clamps_oversized_overlap() {
        let mut cfg = FolioConfig::default();
        cfg.ingest.chunk_size = 100;
        cfg.ingest.chunk_overlap = 150;
        let warnings = cfg.validate().unwrap();
        assert_eq!(cfg.ingest.chunk_overlap, 99);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("clamping"));
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut cfg = FolioConfig::default();
        cfg.ingest.chunk_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_zero_concurrency() {
        let mut cfg = FolioConfig::default();
        cfg.ingest.embed_concurrency = 0;
        cfg.validate().unwrap();
        assert_eq!(cfg.ingest.embed_concurrency, 1);
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let cfg: FolioConfig = Figment::from(Serialized::defaults(FolioConfig::default()))
            .merge(Toml::string(
                r#"
                [retrieval]
                top_k = 9

                [ask]
                mode = "consensus"
                models = ["a", "b", "c", "d"]
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(cfg.retrieval.top_k, 9);
        assert_eq!(cfg.ask.mode, AskMode::Consensus);
        assert_eq!(cfg.ask.models.len(), 4);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.ingest.chunk_size, 1200);
    }

    #[test]
    fn test_ocr_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OcrMode::Auto).unwrap(), "\"auto\"");
        assert_eq!(OcrMode::Force.to_string(), "force");
    }

    #[test]
    fn test_explicit_config_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("folio.toml");
        std::fs::write(&file, "[ingest]\nchunk_size = 900\n").unwrap();

        let cfg = load_config(None, Some(&file), None).unwrap();
        assert_eq!(cfg.ingest.chunk_size, 900);
        assert_eq!(cfg.ingest.chunk_overlap, 200);
    }
}
