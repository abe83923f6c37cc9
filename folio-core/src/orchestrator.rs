//! Ask orchestration: single model, router, or consensus with a judge.
//!
//! All three strategies share one retrieval and prompt path; they differ
//! only in which chat models see the assembled prompt. Consensus is best
//! effort across its panel: failed candidates are skipped with a
//! warning, and the ask fails only when every candidate failed or the
//! judge call itself fails.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{FolioConfig, RoutingConfig};
use crate::error::{AskError, Result};
use crate::ollama::{ChatMessage, ModelService};
use crate::prompt::{Citation, assemble};
use crate::retriever::HybridRetriever;
use crate::store::CorpusStore;

/// System instruction for the consensus judge.
const JUDGE_SYSTEM_PROMPT: &str = "You are a strict judge. Use ONLY the provided context to produce a final answer.\n\
If the context lacks the answer, respond EXACTLY: \"I don't know from these PDFs.\"";

/// Consensus never polls more than this many candidate models.
const MAX_PANEL: usize = 3;

/// Orchestration strategy. `off` answers with a single model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AskMode {
    #[default]
    #[serde(rename = "off")]
    Single,
    Router,
    Consensus,
}

impl std::fmt::Display for AskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AskMode::Single => "off",
            AskMode::Router => "router",
            AskMode::Consensus => "consensus",
        };
        write!(f, "{s}")
    }
}

/// One question against the store, with optional per-request overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub top_k: Option<usize>,
    pub mode: Option<AskMode>,
    pub models: Option<Vec<String>>,
    pub judge_model: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

/// One candidate model's answer in consensus mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub model: String,
    pub answer: String,
}

/// The answer with its grounding and, for consensus, the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub answer: String,
    pub sources: Vec<Citation>,
    /// Which model answered, for single and router asks.
    pub model: Option<String>,
    /// Raw candidate answers, consensus only.
    pub candidates: Vec<Candidate>,
    pub judge_model: Option<String>,
}

/// Routes questions through the configured strategy.
pub struct Orchestrator {
    service: Arc<dyn ModelService>,
    retriever: HybridRetriever,
    config: FolioConfig,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn ModelService>, config: FolioConfig) -> Self {
        let retriever = HybridRetriever::new(
            service.clone(),
            config.retrieval.clone(),
            config.ingest.embedding_model.clone(),
        );
        Self {
            service,
            retriever,
            config,
        }
    }

    /// Answer a question using the configured mode, honoring per-request
    /// overrides for mode, depth, and model set.
    pub async fn ask(&self, store: &CorpusStore, request: &AskRequest) -> Result<AskOutcome> {
        let mode = request.mode.unwrap_or(self.config.ask.mode);
        let k = request.top_k.unwrap_or(self.config.retrieval.top_k);
        let models = match &request.models {
            Some(models) if !models.is_empty() => models.clone(),
            _ => self.config.ask.models.clone(),
        };
        if models.is_empty() {
            return Err(AskError::NoModels.into());
        }

        info!(mode = %mode, k, "Answering question");
        match mode {
            AskMode::Single => self.ask_single(store, &request.question, k, &models[0]).await,
            AskMode::Router => {
                let model = route_model(&request.question, &models, &self.config.ask.routing);
                debug!(model = %model, "Routed question");
                self.ask_single(store, &request.question, k, model).await
            }
            AskMode::Consensus => {
                let judge_model = request
                    .judge_model
                    .as_deref()
                    .unwrap_or(&self.config.ask.judge_model);
                self.ask_consensus(store, &request.question, k, &models, judge_model)
                    .await
            }
        }
    }

    async fn ask_single(
        &self,
        store: &CorpusStore,
        question: &str,
        k: usize,
        model: &str,
    ) -> Result<AskOutcome> {
        let retrieved = self.retriever.retrieve(store, question, k).await?;
        let prompt = assemble(question, &retrieved);
        let answer = self
            .service
            .chat(model, &prompt.messages, self.config.ollama.temperature)
            .await
            .map_err(|source| AskError::Model {
                model: model.to_string(),
                source,
            })?;

        Ok(AskOutcome {
            answer,
            sources: prompt.citations,
            model: Some(model.to_string()),
            candidates: Vec::new(),
            judge_model: None,
        })
    }

    async fn ask_consensus(
        &self,
        store: &CorpusStore,
        question: &str,
        k: usize,
        models: &[String],
        judge_model: &str,
    ) -> Result<AskOutcome> {
        let panel = &models[..models.len().min(MAX_PANEL)];
        let retrieved = self.retriever.retrieve(store, question, k).await?;
        let prompt = assemble(question, &retrieved);

        let messages = &prompt.messages;
        let temperature = self.config.ollama.temperature;
        let calls = panel.iter().map(|model| async move {
            let result = self.service.chat(model, messages, temperature).await;
            (model.as_str(), result)
        });

        let mut candidates = Vec::new();
        for (model, result) in join_all(calls).await {
            match result {
                Ok(answer) => candidates.push(Candidate {
                    model: model.to_string(),
                    answer,
                }),
                Err(e) => {
                    warn!(model = %model, error = %e, "Candidate model failed, judging without it")
                }
            }
        }
        if candidates.is_empty() {
            return Err(AskError::AllCandidatesFailed { count: panel.len() }.into());
        }

        let judge_messages = judge_prompt(&prompt.messages[1].content, &candidates);
        let answer = self
            .service
            .chat(judge_model, &judge_messages, self.config.ollama.temperature)
            .await
            .map_err(|source| AskError::Model {
                model: judge_model.to_string(),
                source,
            })?;

        Ok(AskOutcome {
            answer,
            sources: prompt.citations,
            model: None,
            candidates,
            judge_model: Some(judge_model.to_string()),
        })
    }
}

/// Pick the fast or deep model for a question. Long questions and
/// comparison/causal/synthesis vocabulary go deep; with fewer than two
/// models there is nothing to route between.
pub fn route_model<'a>(
    question: &str,
    models: &'a [String],
    routing: &RoutingConfig,
) -> &'a str {
    let lowered = question.to_lowercase();
    let long = question.chars().count() > routing.length_threshold;
    let complex = routing
        .keywords
        .iter()
        .any(|term| lowered.contains(term.as_str()));
    if (long || complex) && models.len() >= 2 {
        &models[1]
    } else {
        &models[0]
    }
}

/// Judge prompt: the original grounded user message plus every candidate
/// answer, labeled by model.
fn judge_prompt(context_message: &str, candidates: &[Candidate]) -> Vec<ChatMessage> {
    let blocks: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[Candidate {} — {}]\n{}", i + 1, c.model, c.answer))
        .collect();
    let user = format!(
        "{context_message}\n\n\
         Candidate answers to consider (choose or synthesize one final answer using only the context):\n\n{}",
        blocks.join("\n\n")
    );
    vec![
        ChatMessage::system(JUDGE_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::extract::{MockPageExtractor, Page};
    use crate::ollama::{MockModelService, Role};
    use crate::prompt::{REFUSAL, SYSTEM_PROMPT};
    use crate::store::IngestPipeline;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn france_store(data: &TempDir, store_dir: &TempDir) -> CorpusStore {
        let pdf = data.path().join("facts.pdf");
        std::fs::write(&pdf, b"").unwrap();
        let extractor = MockPageExtractor::new()
            .with_document(&pdf, vec![Page::new(1, "The capital of France is Paris.")]);
        let config = IngestConfig {
            data_dir: data.path().to_path_buf(),
            store_dir: store_dir.path().to_path_buf(),
            ..IngestConfig::default()
        };
        IngestPipeline::new(
            Arc::new(extractor),
            Arc::new(MockModelService::new()),
            config,
        )
        .full_build()
        .await
        .unwrap();
        CorpusStore::open(store_dir.path()).unwrap()
    }

    fn orchestrator(service: Arc<MockModelService>, tweak: impl FnOnce(&mut FolioConfig)) -> Orchestrator {
        let mut config = FolioConfig::default();
        tweak(&mut config);
        Orchestrator::new(service, config)
    }

    #[test]
    fn test_ask_mode_serde_names() {
        assert_eq!(serde_json::to_string(&AskMode::Single).unwrap(), "\"off\"");
        assert_eq!(serde_json::to_string(&AskMode::Router).unwrap(), "\"router\"");
        let mode: AskMode = serde_json::from_str("\"consensus\"").unwrap();
        assert_eq!(mode, AskMode::Consensus);
        assert_eq!(AskMode::default(), AskMode::Single);
    }

    #[test]
    fn test_route_short_simple_question_stays_fast() {
        let models = vec!["fast".to_string(), "deep".to_string()];
        let routing = RoutingConfig::default();
        assert_eq!(route_model("What is the deadline?", &models, &routing), "fast");
    }

    #[test]
    fn test_route_keyword_goes_deep() {
        let models = vec!["fast".to_string(), "deep".to_string()];
        let routing = RoutingConfig::default();
        assert_eq!(
            route_model("Compare chapter one and chapter two", &models, &routing),
            "deep"
        );
        assert_eq!(
            route_model("We are analyzing the results", &models, &routing),
            "deep"
        );
    }

    #[test]
    fn test_route_long_question_goes_deep() {
        let models = vec!["fast".to_string(), "deep".to_string()];
        let routing = RoutingConfig::default();
        let long = "a ".repeat(115);
        assert_eq!(route_model(&long, &models, &routing), "deep");
    }

    #[test]
    fn test_route_single_model_never_routes() {
        let models = vec!["only".to_string()];
        let routing = RoutingConfig::default();
        assert_eq!(
            route_model("Compare everything across all chapters", &models, &routing),
            "only"
        );
    }

    #[tokio::test]
    async fn test_single_answers_with_first_model() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(MockModelService::new().with_reply("llama3.1:8b", "Paris."));
        let orchestrator = orchestrator(service.clone(), |_| {});

        let outcome = orchestrator
            .ask(&store, &AskRequest::new("What is the capital of France?"))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Paris.");
        assert_eq!(outcome.model.as_deref(), Some("llama3.1:8b"));
        assert!(outcome.candidates.is_empty());
        assert!(outcome.judge_model.is_none());
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].n, 1);
        assert_eq!(outcome.sources[0].doc, "facts.pdf");

        let calls = service.chat_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1[0].role, Role::System);
        assert_eq!(calls[0].1[0].content, SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_router_mode_picks_deep_model() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_reply("fast", "fast answer")
                .with_reply("deep", "deep answer"),
        );
        let orchestrator = orchestrator(service, |c| {
            c.ask.mode = AskMode::Router;
            c.ask.models = vec!["fast".into(), "deep".into()];
        });

        let outcome = orchestrator
            .ask(&store, &AskRequest::new("Compare the capital cities mentioned"))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "deep answer");
        assert_eq!(outcome.model.as_deref(), Some("deep"));
    }

    #[tokio::test]
    async fn test_consensus_judge_sees_all_candidates() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_reply("m1", "Answer Alpha")
                .with_reply("m2", "Answer Beta")
                .with_reply("arbiter", "Final synthesis"),
        );
        let orchestrator = orchestrator(service.clone(), |c| {
            c.ask.mode = AskMode::Consensus;
            c.ask.models = vec!["m1".into(), "m2".into()];
            c.ask.judge_model = "arbiter".into();
        });

        let outcome = orchestrator
            .ask(&store, &AskRequest::new("What is the capital of France?"))
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Final synthesis");
        assert_eq!(outcome.judge_model.as_deref(), Some("arbiter"));
        assert_eq!(
            outcome.candidates,
            vec![
                Candidate {
                    model: "m1".into(),
                    answer: "Answer Alpha".into()
                },
                Candidate {
                    model: "m2".into(),
                    answer: "Answer Beta".into()
                },
            ]
        );

        let judge_call = service
            .chat_calls()
            .into_iter()
            .find(|(model, _)| model == "arbiter")
            .expect("judge was called");
        assert_eq!(judge_call.1[0].content, JUDGE_SYSTEM_PROMPT);
        let judge_user = &judge_call.1[1].content;
        assert!(judge_user.starts_with("Question: What is the capital of France?"));
        assert!(judge_user.contains(
            "Candidate answers to consider (choose or synthesize one final answer using only the context):"
        ));
        assert!(judge_user.contains("[Candidate 1 — m1]\nAnswer Alpha"));
        assert!(judge_user.contains("[Candidate 2 — m2]\nAnswer Beta"));
    }

    #[tokio::test]
    async fn test_consensus_skips_failed_candidates() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_failing_model("m1")
                .with_reply("m2", "Answer Beta")
                .with_reply("arbiter", "Judged"),
        );
        let orchestrator = orchestrator(service, |c| {
            c.ask.mode = AskMode::Consensus;
            c.ask.models = vec!["m1".into(), "m2".into()];
            c.ask.judge_model = "arbiter".into();
        });

        let outcome = orchestrator
            .ask(&store, &AskRequest::new("What is the capital of France?"))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Judged");
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].model, "m2");
    }

    #[tokio::test]
    async fn test_consensus_fails_when_every_candidate_fails() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_failing_model("m1")
                .with_failing_model("m2"),
        );
        let orchestrator = orchestrator(service, |c| {
            c.ask.mode = AskMode::Consensus;
            c.ask.models = vec!["m1".into(), "m2".into()];
        });

        let err = orchestrator
            .ask(&store, &AskRequest::new("q"))
            .await
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("All 2 consensus candidates failed")
        );
    }

    #[tokio::test]
    async fn test_consensus_judge_failure_is_fatal() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_reply("m1", "Answer Alpha")
                .with_failing_model("arbiter"),
        );
        let orchestrator = orchestrator(service, |c| {
            c.ask.mode = AskMode::Consensus;
            c.ask.models = vec!["m1".into()];
            c.ask.judge_model = "arbiter".into();
        });

        let err = orchestrator
            .ask(&store, &AskRequest::new("q"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("arbiter"));
    }

    #[tokio::test]
    async fn test_consensus_panel_capped_at_three() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_reply("m1", "a1")
                .with_reply("m2", "a2")
                .with_reply("m3", "a3")
                .with_reply("m4", "a4")
                .with_reply("arbiter", "final"),
        );
        let orchestrator = orchestrator(service.clone(), |c| {
            c.ask.mode = AskMode::Consensus;
            c.ask.models = vec!["m1".into(), "m2".into(), "m3".into(), "m4".into()];
            c.ask.judge_model = "arbiter".into();
        });

        let outcome = orchestrator
            .ask(&store, &AskRequest::new("q"))
            .await
            .unwrap();
        assert_eq!(outcome.candidates.len(), 3);
        assert!(
            !service
                .chat_calls()
                .iter()
                .any(|(model, _)| model == "m4")
        );
    }

    #[tokio::test]
    async fn test_request_overrides_mode_and_models() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(
            MockModelService::new()
                .with_reply("other", "override answer")
                .with_reply("llama3.1:8b", "config answer"),
        );
        let orchestrator = orchestrator(service, |_| {});

        let request = AskRequest {
            question: "What is the capital of France?".into(),
            models: Some(vec!["other".into()]),
            top_k: Some(1),
            ..AskRequest::default()
        };
        let outcome = orchestrator.ask(&store, &request).await.unwrap();
        assert_eq!(outcome.answer, "override answer");
    }

    #[tokio::test]
    async fn test_no_models_is_an_error() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let orchestrator = orchestrator(Arc::new(MockModelService::new()), |c| {
            c.ask.models = Vec::new();
        });
        let err = orchestrator
            .ask(&store, &AskRequest::new("q"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No models configured"));
    }

    #[tokio::test]
    async fn test_refusal_is_a_normal_answer() {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store = france_store(&data, &store_dir).await;

        let service = Arc::new(MockModelService::new().with_reply("llama3.1:8b", REFUSAL));
        let orchestrator = orchestrator(service, |_| {});

        let outcome = orchestrator
            .ask(&store, &AskRequest::new("What color is the sky on Mars?"))
            .await
            .unwrap();
        assert_eq!(outcome.answer, REFUSAL);
    }
}
