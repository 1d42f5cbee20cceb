use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::revit::Capability;

#[derive(Args)]
pub struct ToolsArgs {
    /// Print full JSON schemas instead of a summary
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ToolsArgs, config: &Config) -> Result<()> {
    let schemas: Vec<_> = Capability::ALL
        .into_iter()
        .map(|c| c.schema(&config.capabilities))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        return Ok(());
    }

    for schema in &schemas {
        println!("{}", schema.name);
        println!("  {}", schema.description);
        if let Some(props) = schema.parameters["properties"].as_object()
            && !props.is_empty()
        {
            let names: Vec<&str> = props.keys().map(String::as_str).collect();
            println!("  parameters: {}", names.join(", "));
        }
        println!();
    }

    Ok(())
}
