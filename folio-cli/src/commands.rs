//! CLI subcommand handlers.

use crate::Commands;
use anyhow::Context;
use folio_core::ollama::ensure_reachable;
use folio_core::orchestrator::AskRequest;
use folio_core::store::NO_NEW_CHUNKS;
use folio_core::{
    AskMode, CorpusStore, DocumentExtractor, FolioConfig, IngestPipeline, ModelService,
    OllamaClient, Orchestrator,
};
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config: FolioConfig) -> anyhow::Result<()> {
    match command {
        Commands::Ingest { incremental } => handle_ingest(incremental, config).await,
        Commands::Ask {
            question,
            top_k,
            mode,
            models,
            judge_model,
        } => handle_ask(question, top_k, mode, models, judge_model, config).await,
        Commands::Repl { mode } => handle_repl(mode, config).await,
        Commands::Serve { host, port } => handle_serve(host, port, config).await,
        Commands::Status => handle_status(config).await,
        Commands::Reset { yes } => handle_reset(yes, config),
    }
}

fn service_for(config: &FolioConfig) -> Arc<OllamaClient> {
    Arc::new(OllamaClient::new(&config.ollama))
}

fn parse_mode(mode: &str) -> anyhow::Result<AskMode> {
    match mode.to_lowercase().as_str() {
        "off" => Ok(AskMode::Single),
        "router" => Ok(AskMode::Router),
        "consensus" => Ok(AskMode::Consensus),
        other => anyhow::bail!("Unknown mode '{}'. Expected off, router, or consensus.", other),
    }
}

async fn handle_ingest(incremental: bool, config: FolioConfig) -> anyhow::Result<()> {
    let service = service_for(&config);
    ensure_reachable(service.as_ref(), &config.ollama.base_url).await?;

    println!(
        "Using OCR mode: {} (langs={})",
        config.ingest.ocr.mode, config.ingest.ocr.langs
    );
    let extractor = Arc::new(DocumentExtractor::new(config.ingest.ocr.clone()));
    let store_dir = config.ingest.store_dir.clone();
    let pipeline = IngestPipeline::new(extractor, service, config.ingest);

    if incremental {
        let report = pipeline.incremental_build().await?;
        if report.is_noop() {
            println!("{NO_NEW_CHUNKS}");
        } else {
            println!(
                "Incremental ingest complete. {} new chunks appended ({} total).",
                report.new_chunks, report.total_chunks
            );
        }
    } else {
        println!("Building corpus from documents...");
        let report = pipeline.full_build().await?;
        println!(
            "\nIngestion complete. {} chunks indexed ({}-dim) in {}",
            report.total_chunks,
            report.vector_dim,
            store_dir.display()
        );
    }
    Ok(())
}

async fn handle_ask(
    question: Vec<String>,
    top_k: Option<usize>,
    mode: Option<String>,
    models: Option<String>,
    judge_model: Option<String>,
    config: FolioConfig,
) -> anyhow::Result<()> {
    let service = service_for(&config);
    ensure_reachable(service.as_ref(), &config.ollama.base_url).await?;

    let store = open_store(&config)?;

    let question = if question.is_empty() {
        "What are the key ideas across these PDFs?".to_string()
    } else {
        question.join(" ")
    };

    let request = AskRequest {
        question,
        top_k,
        mode: mode.as_deref().map(parse_mode).transpose()?,
        models: models
            .as_deref()
            .map(|m| m.split(',').map(|s| s.trim().to_string()).collect()),
        judge_model,
    };

    let orchestrator = Orchestrator::new(service, config);
    let out = orchestrator.ask(&store, &request).await?;

    println!("\n=== Answer ===\n");
    println!("{}", out.answer);
    println!("\nSources:");
    for s in &out.sources {
        println!("[{}] {} p.{}", s.n, s.doc, s.page);
    }
    Ok(())
}

async fn handle_repl(mode: Option<String>, mut config: FolioConfig) -> anyhow::Result<()> {
    if let Some(mode) = mode.as_deref() {
        config.ask.mode = parse_mode(mode)?;
    }
    let service = service_for(&config);
    ensure_reachable(service.as_ref(), &config.ollama.base_url).await?;

    let store = open_store(&config)?;
    crate::repl::run(store, config, service).await
}

async fn handle_serve(
    host: Option<String>,
    port: Option<u16>,
    mut config: FolioConfig,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let service = service_for(&config);
    folio_core::server::run(config, service).await?;
    Ok(())
}

async fn handle_status(config: FolioConfig) -> anyhow::Result<()> {
    let service = service_for(&config);

    if service.is_alive().await {
        match service.list_models().await {
            Ok(models) => {
                println!(
                    "Model service: reachable at {} ({} models)",
                    config.ollama.base_url,
                    models.len()
                );
                for model in &models {
                    println!("  - {model}");
                }
            }
            Err(e) => println!(
                "Model service: reachable at {} (model list failed: {e})",
                config.ollama.base_url
            ),
        }
    } else {
        println!("Model service: unreachable at {}", config.ollama.base_url);
    }

    match CorpusStore::open_optional(&config.ingest.store_dir)? {
        Some(store) => {
            let m = store.manifest();
            println!(
                "Store: {} chunks, {}-dim vectors in {}",
                store.len(),
                m.vector_dim,
                config.ingest.store_dir.display()
            );
            println!("  embedding model: {}", m.embedding_model);
            println!(
                "  chunking: size={} overlap={}",
                m.chunk_size, m.chunk_overlap
            );
            println!("  ocr: {} (langs={})", m.ocr_mode, m.ocr_langs);
        }
        None => println!(
            "Store: not built yet in {} (run `folio ingest`)",
            config.ingest.store_dir.display()
        ),
    }
    Ok(())
}

fn handle_reset(yes: bool, config: FolioConfig) -> anyhow::Result<()> {
    let dir = &config.ingest.store_dir;
    if !yes {
        anyhow::bail!(
            "Refusing to delete {} without --yes",
            dir.display()
        );
    }
    CorpusStore::reset(dir)?;
    println!("Store reset. You can now run a fresh full ingest: folio ingest");
    Ok(())
}

fn open_store(config: &FolioConfig) -> anyhow::Result<CorpusStore> {
    CorpusStore::open(&config.ingest.store_dir).with_context(|| {
        format!(
            "No usable store in {} (run `folio ingest` first)",
            config.ingest.store_dir.display()
        )
    })
}
