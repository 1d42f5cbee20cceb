mod codegen;
mod orchestrator;
mod providers;
mod system_prompt;

#[cfg(test)]
mod test_support;

pub use codegen::{
    CodeAttempt, CodeGenerator, CodegenOutcome, is_execution_error, strip_code_fences,
};
pub use orchestrator::{Orchestrator, PlanState, TurnEvent};
pub use providers::{
    AnthropicProvider, LLMProvider, LLMResponse, Message, OllamaProvider, OpenAIProvider, Role,
    Sampling, ToolCall, ToolSchema, create_provider,
};
pub use system_prompt::{
    COMPLETION_MARKERS, EXECUTE_SIGNATURE, build_assistant_prompt, build_codegen_prompt,
    build_regeneration_prompt, is_plan_complete,
};
