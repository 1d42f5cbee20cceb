use anyhow::Result;
use clap::Args;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::is_exit_command;
use crate::agent::{CodeGenerator, CodegenOutcome};
use crate::config::Config;

#[derive(Args)]
pub struct CodegenArgs {
    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Don't print generated code
    #[arg(long)]
    pub hide_code: bool,
}

pub async fn run(args: CodegenArgs, config: &Config) -> Result<()> {
    let model = args
        .model
        .unwrap_or_else(|| config.agent.codegen_model.clone());
    let generator = CodeGenerator::from_config(config, &model)?;
    let show_code = config.codegen.show_code && !args.hide_code;

    println!(
        "Revit Code Generator v{} | Model: {} | Revit {} at {}\n",
        env!("CARGO_PKG_VERSION"),
        model,
        config.codegen.revit_version,
        config.revit.base_url
    );
    println!("Describe what to do in Revit. Type 'exit' to quit\n");

    let mut rl = DefaultEditor::new()?;

    loop {
        let input = match rl.readline("Request: ") {
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

        println!("\nGenerating code...");
        match generator.run(input).await {
            Ok(outcome) => render_outcome(&outcome, show_code),
            Err(e) => eprintln!("\nError: {:#}\n", e),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn render_outcome(outcome: &CodegenOutcome, show_code: bool) {
    for (i, attempt) in outcome.attempts.iter().enumerate() {
        if i > 0 {
            println!("\nExecution failed, regenerating code...");
        }
        if show_code {
            println!("\n--- Generated code ---\n{}\n----------------------", attempt.code);
        }
        println!("\nRevit: {}", attempt.response.message);
    }
    println!();
}
