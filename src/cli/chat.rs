use anyhow::Result;
use clap::Args;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::is_exit_command;
use crate::agent::{Orchestrator, TurnEvent};
use crate::config::Config;

#[derive(Args)]
pub struct ChatArgs {
    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,
}

pub async fn run(args: ChatArgs, config: &Config) -> Result<()> {
    let model = args
        .model
        .unwrap_or_else(|| config.agent.default_model.clone());
    let mut orchestrator = Orchestrator::from_config(config, &model)?;

    println!(
        "Revit Assistant v{} | Model: {} | Revit: {}\n",
        env!("CARGO_PKG_VERSION"),
        model,
        config.revit.base_url
    );
    println!("Type 'exit' to quit\n");

    let mut rl = DefaultEditor::new()?;

    loop {
        // A running plan advances without asking the user.
        if !orchestrator.needs_input() {
            let events = orchestrator.step(None).await;
            render_events(&events);
            continue;
        }

        let input = match rl.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        if is_exit_command(input) {
            break;
        }

        let events = orchestrator.step(Some(input)).await;
        render_events(&events);
    }

    println!("Goodbye!");
    Ok(())
}

pub(crate) fn render_events(events: &[TurnEvent]) {
    for event in events {
        match event {
            TurnEvent::ToolStarted { name, arguments } => {
                println!("\nUsing tool {} with arguments {}", name, arguments);
            }
            TurnEvent::ToolFinished { output, .. } => {
                println!("Result: {}", output);
            }
            TurnEvent::Reply(text) | TurnEvent::Error(text) => {
                println!("\nAssistant: {}\n", text);
            }
        }
    }
}
