use anyhow::Result;
use clap::Args;

use super::chat::render_events;
use crate::agent::{Orchestrator, TurnEvent};
use crate::config::Config;

#[derive(Args)]
pub struct AskArgs {
    /// The request to perform in Revit
    pub request: String,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: AskArgs, config: &Config) -> Result<()> {
    let model = args
        .model
        .unwrap_or_else(|| config.agent.default_model.clone());
    let mut orchestrator = Orchestrator::from_config(config, &model)?;

    let events = orchestrator.run_turn(&args.request).await;

    match args.format.as_str() {
        "json" => {
            let output = serde_json::json!({
                "request": args.request,
                "model": model,
                "tool_calls": tool_calls_json(&events),
                "response": final_reply(&events),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => render_events(&events),
    }

    if let Some(TurnEvent::Error(message)) = events.last() {
        anyhow::bail!("{}", message);
    }

    Ok(())
}

fn final_reply(events: &[TurnEvent]) -> Option<&str> {
    events.iter().rev().find_map(|e| match e {
        TurnEvent::Reply(text) | TurnEvent::Error(text) => Some(text.as_str()),
        _ => None,
    })
}

/// Pair each started tool with its result.
fn tool_calls_json(events: &[TurnEvent]) -> Vec<serde_json::Value> {
    let mut calls = Vec::new();
    let mut pending: Option<(&str, &str)> = None;

    for event in events {
        match event {
            TurnEvent::ToolStarted { name, arguments } => {
                pending = Some((name.as_str(), arguments.as_str()))
            }
            TurnEvent::ToolFinished { name, output } => {
                let arguments = pending
                    .take()
                    .filter(|(started, _)| *started == name.as_str())
                    .map(|(_, args)| args)
                    .unwrap_or_default();
                calls.push(serde_json::json!({
                    "name": name,
                    "arguments": arguments,
                    "output": output,
                }));
            }
            _ => {}
        }
    }

    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_summary_pairs_tools_and_picks_last_reply() {
        let events = vec![
            TurnEvent::ToolStarted {
                name: "create_wall".into(),
                arguments: "{}".into(),
            },
            TurnEvent::ToolFinished {
                name: "create_wall".into(),
                output: "Created elements with IDs: 1".into(),
            },
            TurnEvent::Reply("Task completed".into()),
        ];

        let calls = tool_calls_json(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["arguments"], "{}");
        assert_eq!(calls[0]["output"], "Created elements with IDs: 1");
        assert_eq!(final_reply(&events), Some("Task completed"));
        assert_eq!(final_reply(&events[..2]), None);
    }
}
