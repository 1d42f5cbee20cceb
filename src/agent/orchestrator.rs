//! Fixed-tool assistant loop.
//!
//! A two-state machine: `AwaitingInput` needs a user turn before the model
//! is called again; `ContinuingPlan` calls the model again on its own after
//! each tool result, one tool per step, until the assistant announces
//! completion.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::providers::{self, LLMProvider, LLMResponse, Message, ToolCall, ToolSchema};
use super::system_prompt::{self, AssistantPromptParams, is_plan_complete};
use crate::config::Config;
use crate::revit::{CapabilityRegistry, HttpTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    AwaitingInput,
    ContinuingPlan,
}

/// What happened during one step, in order, for the front end to render.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    ToolStarted { name: String, arguments: String },
    ToolFinished { name: String, output: String },
    Reply(String),
    Error(String),
}

pub struct Orchestrator {
    provider: Box<dyn LLMProvider>,
    registry: CapabilityRegistry,
    schemas: Vec<ToolSchema>,
    history: Vec<Message>,
    state: PlanState,
    plan_steps: usize,
    max_plan_steps: usize,
}

impl Orchestrator {
    pub fn new(
        provider: Box<dyn LLMProvider>,
        registry: CapabilityRegistry,
        max_plan_steps: usize,
    ) -> Self {
        let schemas = registry.schemas();
        let tool_names = schemas.iter().map(|s| s.name.as_str()).collect();
        let prompt = system_prompt::build_assistant_prompt(AssistantPromptParams { tool_names });

        Self {
            provider,
            registry,
            history: vec![Message::system(prompt)],
            schemas,
            state: PlanState::AwaitingInput,
            plan_steps: 0,
            max_plan_steps: max_plan_steps.max(1),
        }
    }

    pub fn from_config(config: &Config, model: &str) -> Result<Self> {
        let provider = providers::create_provider(model, config)?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.revit));
        let registry = CapabilityRegistry::new(transport, config.capabilities.clone());
        Ok(Self::new(provider, registry, config.agent.max_plan_steps))
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    /// True when the next step needs user text.
    pub fn needs_input(&self) -> bool {
        self.state == PlanState::AwaitingInput
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn tool_schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Run one model round trip. `input` is required in `AwaitingInput`;
    /// while a plan is running it may be `None`.
    pub async fn step(&mut self, input: Option<&str>) -> Vec<TurnEvent> {
        match input {
            Some(text) => self.history.push(Message::user(text)),
            None if self.needs_input() => {
                debug!("step() without input while awaiting input; nothing to do");
                return Vec::new();
            }
            None => {}
        }

        let response = match self
            .provider
            .chat(&self.history, Some(self.schemas.as_slice()))
            .await
        {
            Ok(response) => response,
            Err(e) => return vec![self.fail(e)],
        };

        match response {
            LLMResponse::Text(text) => self.on_text(text),
            LLMResponse::ToolCalls(calls) => self.on_tool_calls(calls).await,
        }
    }

    /// Submit user text and keep stepping until the plan hands control back.
    pub async fn run_turn(&mut self, input: &str) -> Vec<TurnEvent> {
        let mut events = self.step(Some(input)).await;
        while self.state == PlanState::ContinuingPlan {
            events.extend(self.step(None).await);
        }
        events
    }

    fn on_text(&mut self, text: String) -> Vec<TurnEvent> {
        self.history.push(Message::assistant(text.clone()));

        if self.state == PlanState::ContinuingPlan {
            if is_plan_complete(&text) {
                self.transition(PlanState::AwaitingInput);
            } else {
                self.count_plan_step();
            }
        }

        vec![TurnEvent::Reply(text)]
    }

    async fn on_tool_calls(&mut self, calls: Vec<ToolCall>) -> Vec<TurnEvent> {
        let mut calls = calls.into_iter();
        let Some(call) = calls.next() else {
            return vec![self.fail(anyhow::anyhow!("Model returned an empty tool call list"))];
        };
        let ignored: Vec<String> = calls.map(|c| c.name).collect();
        if !ignored.is_empty() {
            debug!("Executing only {}; ignoring {:?}", call.name, ignored);
        }

        let mut events = vec![TurnEvent::ToolStarted {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }];

        self.history.push(Message::assistant_tool_call(call.clone()));

        let output = match self.registry.lookup(&call.name) {
            Some(capability) => self.registry.execute(capability, &call.arguments).await,
            None => {
                warn!("Model requested unknown tool: {}", call.name);
                format!("Tool not found: {}", call.name)
            }
        };
        debug!("Tool {} returned: {}", call.name, output);

        self.history.push(Message::tool_result(&call.id, output.clone()));
        events.push(TurnEvent::ToolFinished {
            name: call.name,
            output,
        });

        self.transition(PlanState::ContinuingPlan);
        if let Some(notice) = self.count_plan_step() {
            events.push(TurnEvent::Reply(notice));
        }

        events
    }

    /// Bound a running plan; returns the notice shown when the limit is hit.
    fn count_plan_step(&mut self) -> Option<String> {
        self.plan_steps += 1;
        if self.plan_steps < self.max_plan_steps {
            return None;
        }

        warn!(
            "Plan reached {} steps without completing; returning control to the user",
            self.max_plan_steps
        );
        let notice = format!(
            "I stopped after {} steps without finishing. Tell me how to continue.",
            self.max_plan_steps
        );
        self.history.push(Message::assistant(notice.clone()));
        self.transition(PlanState::AwaitingInput);
        Some(notice)
    }

    fn fail(&mut self, error: anyhow::Error) -> TurnEvent {
        warn!("Assistant turn failed: {:#}", error);
        let message = format!("I encountered an error - {}", error);
        self.history.push(Message::assistant(message.clone()));
        self.transition(PlanState::AwaitingInput);
        TurnEvent::Error(message)
    }

    fn transition(&mut self, next: PlanState) {
        if self.state != next {
            debug!("Plan state {:?} -> {:?}", self.state, next);
            if next == PlanState::AwaitingInput {
                info!("Plan finished after {} step(s)", self.plan_steps);
            }
        }
        if next == PlanState::AwaitingInput {
            self.plan_steps = 0;
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;
    use crate::agent::test_support::ScriptedProvider;
    use crate::config::CapabilityDefaults;
    use crate::revit::{MockTransport, RemoteRequest, RemoteResponse};

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn orchestrator(
        provider: ScriptedProvider,
        transport: MockTransport,
        max_plan_steps: usize,
    ) -> Orchestrator {
        let registry = CapabilityRegistry::new(Arc::new(transport), CapabilityDefaults::default());
        Orchestrator::new(Box::new(provider), registry, max_plan_steps)
    }

    fn silent_transport() -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_send().times(0);
        transport
    }

    #[tokio::test]
    async fn plain_answer_keeps_awaiting_input() {
        let provider = ScriptedProvider::new(vec![Ok(LLMResponse::Text(
            "I don't know my guy".into(),
        ))]);
        let mut orch = orchestrator(provider, silent_transport(), 10);

        let events = orch.step(Some("what's the weather")).await;

        assert_eq!(events, vec![TurnEvent::Reply("I don't know my guy".into())]);
        assert_eq!(orch.state(), PlanState::AwaitingInput);
        let roles: Vec<Role> = orch.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn only_first_of_several_tool_calls_runs() {
        let provider = ScriptedProvider::new(vec![Ok(LLMResponse::ToolCalls(vec![
            call("call_1", "create_wall", r#"{"height": 12}"#),
            call("call_2", "get_level_names", "{}"),
        ]))]);
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .withf(|request| {
                matches!(request, RemoteRequest::Function { function, .. } if function == "create_wall")
            })
            .returning(|_| RemoteResponse {
                message: "Wall created.".into(),
                element_ids: vec!["311".into()],
                ..RemoteResponse::default()
            });
        let mut orch = orchestrator(provider, transport, 10);

        let events = orch.step(Some("make a 12 foot wall")).await;

        assert_eq!(
            events,
            vec![
                TurnEvent::ToolStarted {
                    name: "create_wall".into(),
                    arguments: r#"{"height": 12}"#.into()
                },
                TurnEvent::ToolFinished {
                    name: "create_wall".into(),
                    output: "Wall created. Created elements with IDs: 311".into()
                },
            ]
        );
        assert_eq!(orch.state(), PlanState::ContinuingPlan);

        let history = orch.history();
        let invocation = history[2].tool_calls.as_ref().unwrap();
        assert_eq!(invocation.len(), 1);
        assert_eq!(invocation[0].id, "call_1");
        assert_eq!(history[3].role, Role::Tool);
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn plan_ends_only_on_completion_marker() {
        let provider = ScriptedProvider::new(vec![
            Ok(LLMResponse::ToolCalls(vec![call("c1", "get_wall_types", "{}")])),
            Ok(LLMResponse::Text("Step 2 done.".into())),
            Ok(LLMResponse::Text("Step 2 complete.".into())),
        ]);
        let calls = provider.calls();
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| RemoteResponse::message("Basic Wall, Generic - 8\""));
        let mut orch = orchestrator(provider, transport, 10);

        orch.step(Some("swap the wall types")).await;
        assert_eq!(orch.state(), PlanState::ContinuingPlan);

        orch.step(None).await;
        assert_eq!(orch.state(), PlanState::ContinuingPlan);

        orch.step(None).await;
        assert_eq!(orch.state(), PlanState::AwaitingInput);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn run_turn_steps_until_plan_completes() {
        let provider = ScriptedProvider::new(vec![
            Ok(LLMResponse::ToolCalls(vec![call("c1", "create_wall", "{}")])),
            Ok(LLMResponse::ToolCalls(vec![call(
                "c2",
                "add_window_to_wall",
                r#"{"wall_id": "311"}"#,
            )])),
            Ok(LLMResponse::Text("Task completed: wall 311 now has a window.".into())),
        ]);
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_| RemoteResponse {
                message: "Done.".into(),
                element_ids: vec!["311".into()],
                ..RemoteResponse::default()
            });
        let mut orch = orchestrator(provider, transport, 10);

        let events = orch.run_turn("wall with a window").await;

        assert_eq!(orch.state(), PlanState::AwaitingInput);
        assert_eq!(
            events.last(),
            Some(&TurnEvent::Reply(
                "Task completed: wall 311 now has a window.".into()
            ))
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TurnEvent::ToolFinished { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn unknown_tool_becomes_tool_turn() {
        let provider = ScriptedProvider::new(vec![Ok(LLMResponse::ToolCalls(vec![call(
            "c9",
            "demolish_building",
            "{}",
        )]))]);
        let mut orch = orchestrator(provider, silent_transport(), 10);

        orch.step(Some("knock it down")).await;

        let last = orch.history().last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "Tool not found: demolish_building");
        assert_eq!(last.tool_call_id.as_deref(), Some("c9"));
    }

    #[tokio::test]
    async fn model_failure_resets_to_awaiting_input() {
        let provider = ScriptedProvider::new(vec![
            Ok(LLMResponse::ToolCalls(vec![call("c1", "get_level_names", "{}")])),
            Err(anyhow::anyhow!("connection reset")),
        ]);
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| RemoteResponse::message("Levels"));
        let mut orch = orchestrator(provider, transport, 10);

        orch.step(Some("list levels")).await;
        let events = orch.step(None).await;

        assert_eq!(
            events,
            vec![TurnEvent::Error(
                "I encountered an error - connection reset".into()
            )]
        );
        assert_eq!(orch.state(), PlanState::AwaitingInput);
        assert_eq!(orch.history().last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn step_without_input_while_idle_does_nothing() {
        let provider = ScriptedProvider::new(Vec::new());
        let calls = provider.calls();
        let mut orch = orchestrator(provider, silent_transport(), 10);

        assert!(orch.step(None).await.is_empty());
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn runaway_plan_is_cut_off() {
        let provider = ScriptedProvider::new(vec![
            Ok(LLMResponse::ToolCalls(vec![call("c1", "get_wall_types", "{}")])),
            Ok(LLMResponse::ToolCalls(vec![call("c2", "get_wall_types", "{}")])),
        ]);
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_| RemoteResponse::message("Basic Wall"));
        let mut orch = orchestrator(provider, transport, 2);

        let events = orch.run_turn("loop forever").await;

        assert_eq!(orch.state(), PlanState::AwaitingInput);
        assert!(matches!(events.last(), Some(TurnEvent::Reply(text)) if text.contains("2 steps")));
    }

    #[tokio::test]
    async fn tool_schemas_are_sent_to_the_model() {
        let provider = ScriptedProvider::new(vec![Ok(LLMResponse::Text("hi".into()))]);
        let seen = provider.tool_names();
        let mut orch = orchestrator(provider, silent_transport(), 10);

        orch.step(Some("hello")).await;

        let names = seen.lock().unwrap().clone();
        assert_eq!(names.len(), 7);
        assert!(names.contains(&"change_wall_type".to_string()));
    }
}
