//! Guardrail evaluation.
//!
//! Stateless: every decision is a function of the call count, the current
//! token estimate, and the turn's [`GuardrailConfig`].

use triage_config::GuardrailConfig;
use triage_core::message::Message;

/// How the next model call must be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Tools bound; the model may request tool calls.
    Tools,
    /// No tools bound; the model must write its final report now.
    Synthesis(SynthesisReason),
    /// The call budget is already spent. Unreachable while `should_continue`
    /// holds its invariant.
    LimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisReason {
    LastCall,
    TokenBudget,
}

impl SynthesisReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastCall => "last_call",
            Self::TokenBudget => "token_budget",
        }
    }
}

/// Decide the mode of model call number `ai_call_count` (1-based).
pub fn evaluate(ai_call_count: u32, token_est: usize, config: &GuardrailConfig) -> CallMode {
    if ai_call_count > config.max_ai_calls {
        CallMode::LimitExceeded
    } else if ai_call_count == config.max_ai_calls {
        CallMode::Synthesis(SynthesisReason::LastCall)
    } else if token_est > config.max_input_tokens {
        CallMode::Synthesis(SynthesisReason::TokenBudget)
    } else {
        CallMode::Tools
    }
}

/// Whether the turn proceeds to tool execution after a model call.
///
/// Tool requests that arrive once the budget is spent are dropped.
pub fn should_continue(last: Option<&Message>, ai_call_count: u32, config: &GuardrailConfig) -> bool {
    let has_tool_calls = last.is_some_and(Message::has_tool_calls);
    has_tool_calls && ai_call_count < config.max_ai_calls
}
