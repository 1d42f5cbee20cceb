pub mod ask;
pub mod call;
pub mod chat;
pub mod codegen;
pub mod config;
pub mod tools;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "revit-assistant")]
#[command(author, version, about = "Natural-language assistant for Autodesk Revit")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "REVIT_ASSISTANT_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive session with the tool-calling assistant
    Chat(chat::ChatArgs),

    /// Start an interactive session that generates and runs C# in Revit
    Codegen(codegen::CodegenArgs),

    /// Send a single request through the assistant
    Ask(ask::AskArgs),

    /// List the Revit capabilities exposed to the model
    Tools(tools::ToolsArgs),

    /// Run one capability directly, without a model
    Call(call::CallArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

/// Inputs that end an interactive session.
pub const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w))
}
