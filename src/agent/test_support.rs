use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::providers::{LLMProvider, LLMResponse, Message, ToolSchema};

/// Provider that replays canned responses and records what it was sent.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<LLMResponse>>>,
    calls: Arc<Mutex<usize>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    tool_names: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<LLMResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            tool_names: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(LLMResponse::Text(t.to_string())))
                .collect(),
        )
    }

    pub fn calls(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.calls)
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        Arc::clone(&self.requests)
    }

    pub fn tool_names(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.tool_names)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<LLMResponse> {
        *self.calls.lock().unwrap() += 1;
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(tools) = tools {
            *self.tool_names.lock().unwrap() = tools.iter().map(|t| t.name.clone()).collect();
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
    }
}
