use anyhow::Result;
use clap::Args;
use std::sync::Arc;

use crate::config::Config;
use crate::revit::{Capability, CapabilityRegistry, HttpTransport};

#[derive(Args)]
pub struct CallArgs {
    /// Capability name (see `revit-assistant tools`)
    pub capability: String,

    /// Arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,
}

pub async fn run(args: CallArgs, config: &Config) -> Result<()> {
    let capability = Capability::from_name(&args.capability).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown capability '{}'. Run `revit-assistant tools` to list them.",
            args.capability
        )
    })?;

    let registry = CapabilityRegistry::new(
        Arc::new(HttpTransport::new(&config.revit)),
        config.capabilities.clone(),
    );
    println!("{}", registry.execute(capability, &args.args).await);

    Ok(())
}
