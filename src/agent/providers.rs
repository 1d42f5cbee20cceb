use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that carries a tool invocation.
    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            tool_calls: Some(vec![call]),
            ..Self::plain(Role::Assistant, "")
        }
    }

    /// Tool result correlated with the invocation id.
    pub fn tool_result(call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON object text as emitted by the model
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LLMResponse {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(&self, messages: &[Message], tools: Option<&[ToolSchema]>)
    -> Result<LLMResponse>;

    /// Plain completion without tools; tool calls are an error here.
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        match self.chat(messages, None).await? {
            LLMResponse::Text(text) => Ok(text),
            LLMResponse::ToolCalls(_) => anyhow::bail!("Unexpected tool call in plain completion"),
        }
    }
}

/// Sampling settings shared by every provider.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Sampling {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.agent.temperature,
            max_tokens: config.agent.max_tokens,
        }
    }
}

pub fn create_provider(model: &str, config: &Config) -> Result<Box<dyn LLMProvider>> {
    let sampling = Sampling::from_config(config);

    // Determine provider from model name
    if model.starts_with("gpt-") || is_openai_reasoning_model(model) {
        let openai_config = config.providers.openai.as_ref().ok_or_else(|| {
            anyhow::anyhow!("OpenAI provider not configured (set OPENAI_API_KEY)")
        })?;

        Ok(Box::new(OpenAIProvider::new(
            &openai_config.api_key,
            &openai_config.base_url,
            model,
            sampling,
        )?))
    } else if model.starts_with("claude-") {
        let anthropic_config = config.providers.anthropic.as_ref().ok_or_else(|| {
            anyhow::anyhow!("Anthropic provider not configured (set ANTHROPIC_API_KEY)")
        })?;

        Ok(Box::new(AnthropicProvider::new(
            &anthropic_config.api_key,
            &anthropic_config.base_url,
            model,
            sampling,
        )?))
    } else if let Some(ollama_config) = &config.providers.ollama {
        Ok(Box::new(OllamaProvider::new(
            &ollama_config.endpoint,
            model,
            sampling,
        )?))
    } else {
        anyhow::bail!("Unknown model or provider not configured: {}", model)
    }
}

/// o-series models take `max_completion_tokens` and reject `temperature`.
fn is_openai_reasoning_model(model: &str) -> bool {
    ["o1", "o3", "o4"].iter().any(|p| model.starts_with(p))
}

// OpenAI Provider
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    sampling: Sampling,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, base_url: &str, model: &str, sampling: Sampling) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            sampling,
        })
    }

    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect()
    }

    fn request_body(&self, messages: &[Message], tools: Option<&[ToolSchema]>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.format_messages(messages),
        });

        if is_openai_reasoning_model(&self.model) {
            body["max_completion_tokens"] = json!(self.sampling.max_tokens);
        } else {
            body["max_tokens"] = json!(self.sampling.max_tokens);
            body["temperature"] = json!(self.sampling.temperature);
        }

        if let Some(tools) = tools
            && !tools.is_empty()
        {
            body["tools"] = json!(self.format_tools(tools));
        }

        body
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut msg = json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::Tool => "tool",
                    },
                    "content": m.content
                });

                if let Some(ref tool_calls) = m.tool_calls {
                    msg["tool_calls"] = json!(
                        tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments
                                    }
                                })
                            })
                            .collect::<Vec<_>>()
                    );
                }

                if let Some(ref tool_call_id) = m.tool_call_id {
                    msg["tool_call_id"] = json!(tool_call_id);
                }

                msg
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<LLMResponse> {
        let body = self.request_body(messages, tools);

        debug!("OpenAI request: {}", serde_json::to_string_pretty(&body)?);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_body: Value = response.json().await?;
        debug!(
            "OpenAI response: {}",
            serde_json::to_string_pretty(&response_body)?
        );

        parse_openai_response(&response_body)
    }
}

fn parse_openai_response(response_body: &Value) -> Result<LLMResponse> {
    if let Some(error) = response_body.get("error") {
        anyhow::bail!("OpenAI API error: {}", error);
    }

    let choice = response_body["choices"]
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

    let message = &choice["message"];

    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
        let parsed_calls: Vec<ToolCall> = calls
            .iter()
            .map(|tc| ToolCall {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("{}")
                    .to_string(),
            })
            .collect();

        if !parsed_calls.is_empty() {
            return Ok(LLMResponse::ToolCalls(parsed_calls));
        }
    }

    let content = message["content"].as_str().unwrap_or("").to_string();

    Ok(LLMResponse::Text(content))
}

// Anthropic Provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    sampling: Sampling,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, base_url: &str, model: &str, sampling: Sampling) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            sampling,
        })
    }

    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect()
    }

    fn format_messages(&self, messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_prompt = None;
        let mut formatted = Vec::new();

        for m in messages {
            match m.role {
                Role::System => {
                    system_prompt = Some(m.content.clone());
                }
                Role::User => {
                    formatted.push(json!({
                        "role": "user",
                        "content": m.content
                    }));
                }
                Role::Assistant => {
                    if let Some(ref tool_calls) = m.tool_calls {
                        let mut blocks = Vec::new();
                        if !m.content.is_empty() {
                            blocks.push(json!({"type": "text", "text": m.content}));
                        }
                        blocks.extend(tool_calls.iter().map(|tc| {
                            json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": serde_json::from_str::<Value>(&tc.arguments).unwrap_or(json!({}))
                            })
                        }));
                        formatted.push(json!({
                            "role": "assistant",
                            "content": blocks
                        }));
                    } else {
                        formatted.push(json!({
                            "role": "assistant",
                            "content": m.content
                        }));
                    }
                }
                Role::Tool => {
                    if let Some(ref tool_call_id) = m.tool_call_id {
                        formatted.push(json!({
                            "role": "user",
                            "content": [{
                                "type": "tool_result",
                                "tool_use_id": tool_call_id,
                                "content": m.content
                            }]
                        }));
                    }
                }
            }
        }

        (system_prompt, formatted)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<LLMResponse> {
        let (system_prompt, formatted_messages) = self.format_messages(messages);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.sampling.max_tokens,
            "temperature": self.sampling.temperature,
            "messages": formatted_messages
        });

        if let Some(system) = system_prompt {
            body["system"] = json!(system);
        }

        if let Some(tools) = tools
            && !tools.is_empty()
        {
            body["tools"] = json!(self.format_tools(tools));
        }

        debug!(
            "Anthropic request: {}",
            serde_json::to_string_pretty(&body)?
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_body: Value = response.json().await?;
        debug!(
            "Anthropic response: {}",
            serde_json::to_string_pretty(&response_body)?
        );

        parse_anthropic_response(&response_body)
    }
}

fn parse_anthropic_response(response_body: &Value) -> Result<LLMResponse> {
    if let Some(error) = response_body.get("error") {
        anyhow::bail!("Anthropic API error: {}", error);
    }

    let content = response_body["content"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("No content in response"))?;

    let tool_calls: Vec<ToolCall> = content
        .iter()
        .filter(|c| c["type"] == "tool_use")
        .map(|c| ToolCall {
            id: c["id"].as_str().unwrap_or("").to_string(),
            name: c["name"].as_str().unwrap_or("").to_string(),
            arguments: serde_json::to_string(&c["input"]).unwrap_or("{}".to_string()),
        })
        .collect();

    if !tool_calls.is_empty() {
        return Ok(LLMResponse::ToolCalls(tool_calls));
    }

    let text = content
        .iter()
        .filter(|c| c["type"] == "text")
        .map(|c| c["text"].as_str().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("");

    Ok(LLMResponse::Text(text))
}

// Ollama Provider (for local models)
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
    sampling: Sampling,
}

impl OllamaProvider {
    pub fn new(endpoint: &str, model: &str, sampling: Sampling) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            sampling,
        })
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<LLMResponse> {
        let formatted_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let mut msg = json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::Tool => "tool",
                    },
                    "content": m.content
                });
                if let Some(ref tool_calls) = m.tool_calls {
                    msg["tool_calls"] = json!(
                        tool_calls
                            .iter()
                            .map(|tc| json!({
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::from_str::<Value>(&tc.arguments)
                                        .unwrap_or(json!({}))
                                }
                            }))
                            .collect::<Vec<_>>()
                    );
                }
                msg
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": formatted_messages,
            "stream": false,
            "options": {"temperature": self.sampling.temperature}
        });

        if let Some(tools) = tools
            && !tools.is_empty()
        {
            body["tools"] = json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    }))
                    .collect::<Vec<_>>()
            );
        }

        debug!("Ollama request: {}", serde_json::to_string_pretty(&body)?);

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_body: Value = response.json().await?;
        debug!(
            "Ollama response: {}",
            serde_json::to_string_pretty(&response_body)?
        );

        parse_ollama_response(&response_body, messages.len())
    }
}

/// `turn` is the history length at request time; it grows every step, so
/// synthesized ids stay unique within a session.
fn parse_ollama_response(response_body: &Value, turn: usize) -> Result<LLMResponse> {
    if let Some(error) = response_body.get("error") {
        anyhow::bail!("Ollama error: {}", error);
    }

    let message = &response_body["message"];

    // Ollama does not assign call ids.
    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array())
        && !calls.is_empty()
    {
        let parsed_calls = calls
            .iter()
            .enumerate()
            .map(|(i, tc)| ToolCall {
                id: format!("call_{}_{}", turn, i),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: serde_json::to_string(&tc["function"]["arguments"])
                    .unwrap_or("{}".to_string()),
            })
            .collect();
        return Ok(LLMResponse::ToolCalls(parsed_calls));
    }

    let content = message["content"].as_str().unwrap_or("").to_string();

    Ok(LLMResponse::Text(content))
}
