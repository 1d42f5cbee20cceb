//! Free-form requests: generate a C# method body, run it in Revit, and
//! regenerate exactly once if Revit reports a compilation or runtime error.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::providers::{self, LLMProvider, Message};
use super::system_prompt::{self, CodegenPromptParams};
use crate::config::Config;
use crate::revit::{HttpTransport, RemoteRequest, RemoteResponse, Transport};

/// Remove a surrounding markdown fence (```` ```csharp ... ``` ````) if present.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Drop the language tag line, or an inline tag when the reply is one line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => strip_language_tag(rest),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

fn strip_language_tag(text: &str) -> &str {
    for tag in ["csharp", "c#", "cs"] {
        if let Some(head) = text.get(..tag.len())
            && head.eq_ignore_ascii_case(tag)
        {
            let rest = &text[tag.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest;
            }
        }
    }
    text
}

/// True when Revit's reply describes a failed compile or run of generated code.
pub fn is_execution_error(message: &str) -> bool {
    message.contains("Error")
        && (message.contains("Compilation errors") || message.contains("Runtime error"))
}

/// One generate-and-run round.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttempt {
    pub code: String,
    pub response: RemoteResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodegenOutcome {
    pub attempts: Vec<CodeAttempt>,
}

impl CodegenOutcome {
    pub fn final_attempt(&self) -> Option<&CodeAttempt> {
        self.attempts.last()
    }

    /// Message shown to the user: the last response Revit gave.
    pub fn final_message(&self) -> &str {
        self.final_attempt()
            .map(|a| a.response.message.as_str())
            .unwrap_or_default()
    }

    pub fn regenerated(&self) -> bool {
        self.attempts.len() > 1
    }

    pub fn succeeded(&self) -> bool {
        self.final_attempt()
            .is_some_and(|a| !is_execution_error(&a.response.message))
    }
}

pub struct CodeGenerator {
    provider: Box<dyn LLMProvider>,
    transport: Arc<dyn Transport>,
    system_prompt: String,
}

impl CodeGenerator {
    pub fn new(
        provider: Box<dyn LLMProvider>,
        transport: Arc<dyn Transport>,
        revit_version: &str,
    ) -> Self {
        let system_prompt =
            system_prompt::build_codegen_prompt(CodegenPromptParams { revit_version });
        Self {
            provider,
            transport,
            system_prompt,
        }
    }

    pub fn from_config(config: &Config, model: &str) -> Result<Self> {
        let provider = providers::create_provider(model, config)?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.revit));
        Ok(Self::new(provider, transport, &config.codegen.revit_version))
    }

    /// Ask the model for code implementing `query`.
    pub async fn generate(&self, query: &str) -> Result<String> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(format!("Generate C# Revit API code for: {}", query)),
        ];
        let text = self.provider.complete(&messages).await?;
        Ok(strip_code_fences(&text))
    }

    /// Ask for corrected code given the previous attempt and Revit's error.
    pub async fn regenerate(&self, query: &str, previous_code: &str, error: &str) -> Result<String> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(system_prompt::build_regeneration_prompt(
                query,
                previous_code,
                error,
            )),
        ];
        let text = self.provider.complete(&messages).await?;
        Ok(strip_code_fences(&text))
    }

    async fn execute(&self, code: String) -> CodeAttempt {
        let response = self.transport.send(&RemoteRequest::code(code.clone())).await;
        debug!("Code execution reply: {}", response.message);
        CodeAttempt { code, response }
    }

    /// Generate, execute, and on a reported error regenerate and execute once more.
    pub async fn run(&self, query: &str) -> Result<CodegenOutcome> {
        let code = self.generate(query).await?;
        let first = self.execute(code).await;

        if !is_execution_error(&first.response.message) {
            return Ok(CodegenOutcome {
                attempts: vec![first],
            });
        }

        warn!("Generated code failed in Revit; regenerating once");
        let code = self
            .regenerate(query, &first.code, &first.response.message)
            .await?;
        let second = self.execute(code).await;

        if is_execution_error(&second.response.message) {
            info!("Regenerated code also failed; giving up");
        }

        Ok(CodegenOutcome {
            attempts: vec![first, second],
        })
    }
}
