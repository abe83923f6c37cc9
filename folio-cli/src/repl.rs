//! Interactive question loop.

use folio_core::orchestrator::AskRequest;
use folio_core::{CorpusStore, FolioConfig, ModelService, Orchestrator};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Run the question loop until EOF. Each line is one question; blank
/// lines are skipped, and a failed ask is reported without ending the
/// session.
pub async fn run(
    store: CorpusStore,
    config: FolioConfig,
    service: Arc<dyn ModelService>,
) -> anyhow::Result<()> {
    println!(
        "Folio — Mode: {}",
        config.ask.mode.to_string().to_uppercase()
    );
    println!("Type your questions. Ctrl+C to exit.");

    let orchestrator = Orchestrator::new(service, config);

    let stdin = io::stdin();
    loop {
        print!("\nYou: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).is_err() || input.is_empty() {
            println!("\nBye!");
            break;
        }
        let question = input.trim();
        if question.is_empty() {
            continue;
        }

        match orchestrator.ask(&store, &AskRequest::new(question)).await {
            Ok(out) => println!("\nAssistant:\n{}", out.answer),
            Err(e) => eprintln!("\nError: {e}"),
        }
    }
    Ok(())
}
