use anyhow::Result;
use clap::Parser;
use std::path::Path;

use revit_assistant::cli::{self, Cli, Commands};
use revit_assistant::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_file = cli.config.as_deref().map(Path::new);

    // `config` manages the file itself and must work when it is broken.
    let command = match cli.command {
        Commands::Config(args) => {
            init_logging(cli.verbose, "info");
            return cli::config::run(args, config_file).await;
        }
        command => command,
    };

    let mut config = Config::load_from(config_file)?;
    config.resolve_credentials(|key| std::env::var(key));
    init_logging(cli.verbose, &config.logging.level);

    match command {
        Commands::Chat(args) => cli::chat::run(args, &config).await,
        Commands::Codegen(args) => cli::codegen::run(args, &config).await,
        Commands::Ask(args) => cli::ask::run(args, &config).await,
        Commands::Tools(args) => cli::tools::run(args, &config),
        Commands::Call(args) => cli::call::run(args, &config).await,
        Commands::Config(_) => unreachable!("handled above"),
    }
}

/// `RUST_LOG` wins, then `--verbose`, then `logging.level` from config.
fn init_logging(verbose: bool, configured: &str) {
    let log_level = if verbose { "debug" } else { configured };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
