//! Console practice: work through one scenario from the terminal
//!
//! Usage: `practice <scenario.json>`. Type replies line by line; `status`
//! shows progress, `reset` starts over and `quit` exits.

use chat_buddy::config::AppConfig;
use chat_buddy::engine::{ConversationEngine, EngineError, LoadSummary, ResponseOutcome};
use chat_buddy::evaluator::{Judge, LlmJudge, ResponseEvaluator, UnconfiguredJudge};
use chat_buddy::llm::ModelRegistry;
use chat_buddy::scenario;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_buddy=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: practice <scenario.json>");
        std::process::exit(2);
    };

    let config = AppConfig::from_env();
    let registry = ModelRegistry::new(&config.llm);
    let judge: Arc<dyn Judge> = match registry.default() {
        Some(llm) => Arc::new(LlmJudge::new(llm, config.judge_max_tokens)),
        None => {
            eprintln!("No judge model configured; replies cannot be checked.");
            Arc::new(UnconfiguredJudge)
        }
    };
    let evaluator = Arc::new(ResponseEvaluator::new(judge, config.retry));
    let mut engine = ConversationEngine::new(evaluator, config.engine);

    let definition = scenario::load_file(&path)?;
    let summary = engine.load_scenario(Arc::new(definition))?;
    print_opening(&summary);
    print_prompt(&engine)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => continue,
            "quit" | "exit" => break,
            "status" => {
                let state = engine.get_state();
                println!(
                    "[event {} | attempts {} | completed {}]",
                    state.current_event_index, state.attempts, state.completed
                );
                for (name, value) in &state.variables {
                    println!("  {name} = {}", value.as_deref().unwrap_or("-"));
                }
                continue;
            }
            "reset" => {
                if let Some(summary) = engine.reset()? {
                    print_opening(&summary);
                }
                print_prompt(&engine)?;
                continue;
            }
            _ => {}
        }

        match engine.process_student_response(input).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(EngineError::InvalidState(e)) => println!("({e})"),
            Err(e) => return Err(e.into()),
        }
        if engine.get_state().completed {
            break;
        }
    }

    Ok(())
}

fn print_opening(summary: &LoadSummary) {
    println!("== {} (with {}) ==", summary.scenario_name, summary.persona.name);
    for text in &summary.opening {
        println!("{}: {text}", summary.persona.name);
    }
}

fn print_prompt(engine: &ConversationEngine) -> Result<(), EngineError> {
    println!("> {}", engine.get_current_prompt()?);
    Ok(())
}

fn print_outcome(outcome: &ResponseOutcome) {
    match outcome {
        ResponseOutcome::Accepted {
            feedback,
            next_prompt,
            transcript,
            ..
        } => {
            println!("{feedback}");
            for text in transcript {
                println!("{text}");
            }
            if let Some(prompt) = next_prompt {
                println!("> {prompt}");
            }
        }
        ResponseOutcome::NeedsCorrection {
            feedback,
            corrected_text,
            attempt_count,
        } => {
            println!("{feedback} (attempt {attempt_count})");
            if let Some(corrected) = corrected_text {
                println!("Try: {corrected}");
            }
        }
        ResponseOutcome::Unavailable { message } => println!("{message}"),
    }
}
