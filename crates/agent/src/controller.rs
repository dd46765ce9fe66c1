//! The turn controller.
//!
//! Drives the fixed two-node cycle: a model call, then the tool calls it
//! requested, then the next model call, until the model stops asking for
//! tools or a guardrail forces a final answer. Every transition is reported
//! through the [`Publisher`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use triage_config::GuardrailConfig;
use triage_core::error::{Error, Result, ToolError};
use triage_core::message::{Message, ToolCallRequest};
use triage_core::provider::{ModelRequest, ModelSettings, Provider, Usage};
use triage_core::service::TurnContext;
use triage_tools::ToolInvoker;

use crate::guardrail::{self, CallMode};
use crate::prompt::SYNTHESIS_DIRECTIVE;
use crate::publisher::Publisher;
use crate::token::estimate_tokens;

/// Appended when a model call is requested past the call budget.
pub const SAFETY_NET_MESSAGE: &str = "**Investigation limit reached** — see findings above. Start a follow-up conversation for deeper investigation.";

/// Substituted when a forced synthesis call returns no text.
pub const SYNTHESIS_FALLBACK: &str = "Investigation complete. See findings above.";

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced its final answer.
    Completed,
    /// The safety net closed the turn.
    LimitReached,
    /// The cancellation token fired between steps.
    Cancelled,
}

/// Everything one turn owns while it runs.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub messages: Vec<Message>,
    pub ai_call_count: u32,
    /// Recomputed before every model call
    pub total_input_tokens_est: usize,
    /// Node visits, model calls and tool executions alike
    pub steps: u32,
}

impl TurnState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, ..Self::default() }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

pub struct TurnController {
    provider: Arc<dyn Provider>,
    invoker: ToolInvoker,
    guardrails: GuardrailConfig,
    settings: ModelSettings,
    temperature: f32,
}

impl TurnController {
    pub fn new(provider: Arc<dyn Provider>, invoker: ToolInvoker, guardrails: GuardrailConfig) -> Self {
        Self {
            provider,
            invoker,
            guardrails,
            settings: ModelSettings::default(),
            temperature: 0.0,
        }
    }

    /// Per-organization overrides applied to every model call.
    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn guardrails(&self) -> &GuardrailConfig {
        &self.guardrails
    }

    /// Run the loop to completion.
    ///
    /// Tool failures are folded into tool results and never surface here.
    /// Only a failed model call or an exceeded recursion limit returns `Err`.
    pub async fn run(
        &self,
        state: &mut TurnState,
        ctx: &TurnContext,
        publisher: &mut Publisher,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        loop {
            if cancel.is_cancelled() {
                info!(ai_call = state.ai_call_count, "Turn cancelled before model call");
                return Ok(TurnOutcome::Cancelled);
            }
            self.step(state)?;

            if !self.model_call(state, publisher).await? {
                return Ok(TurnOutcome::LimitReached);
            }

            if !guardrail::should_continue(state.last_message(), state.ai_call_count, &self.guardrails) {
                if state.last_message().is_some_and(Message::has_tool_calls) {
                    warn!(
                        ai_call = state.ai_call_count,
                        max_calls = self.guardrails.max_ai_calls,
                        "Dropping tool calls requested after the call budget was spent"
                    );
                }
                return Ok(TurnOutcome::Completed);
            }

            if cancel.is_cancelled() {
                info!(ai_call = state.ai_call_count, "Turn cancelled before tool execution");
                return Ok(TurnOutcome::Cancelled);
            }
            self.step(state)?;

            if !self.execute_tools(state, ctx, publisher, cancel).await {
                return Ok(TurnOutcome::Cancelled);
            }
        }
    }

    fn step(&self, state: &mut TurnState) -> Result<()> {
        state.steps += 1;
        if state.steps > self.guardrails.recursion_limit {
            error!(
                steps = state.steps,
                recursion_limit = self.guardrails.recursion_limit,
                "Recursion limit exceeded"
            );
            return Err(Error::RunAborted {
                reason: format!("recursion limit of {} reached", self.guardrails.recursion_limit),
            });
        }
        Ok(())
    }

    /// One model call. Returns `false` when the safety net closed the turn.
    async fn model_call(&self, state: &mut TurnState, publisher: &mut Publisher) -> Result<bool> {
        let ai_call = state.ai_call_count + 1;
        let token_est = estimate_tokens(&state.messages, self.guardrails.token_estimation_divisor);

        let mode = guardrail::evaluate(ai_call, token_est, &self.guardrails);
        if mode == CallMode::LimitExceeded {
            warn!(
                ai_call,
                max_calls = self.guardrails.max_ai_calls,
                "Safety net: call budget exceeded"
            );
            state.messages.push(Message::assistant(SAFETY_NET_MESSAGE));
            return Ok(false);
        }

        state.ai_call_count = ai_call;
        state.total_input_tokens_est = token_est;
        publisher.model_started(ai_call, token_est).await;

        let response = match mode {
            CallMode::Synthesis(reason) => {
                info!(
                    ai_call,
                    max_calls = self.guardrails.max_ai_calls,
                    estimated_tokens = token_est,
                    reason = reason.as_str(),
                    "Forcing synthesis"
                );
                let mut messages = state.messages.clone();
                messages.push(Message::user(SYNTHESIS_DIRECTIVE));
                let request = self.request(messages);

                let (mut message, usage) = self.invoke_model(request, ai_call, publisher).await?;
                publisher.model_finished(&message, usage.as_ref());
                if message.has_tool_calls() {
                    debug!(ai_call, count = message.tool_calls.len(), "Discarding tool calls from synthesis call");
                    message.tool_calls.clear();
                }
                if message.text().trim().is_empty() {
                    message = Message::assistant(SYNTHESIS_FALLBACK);
                }
                message
            }
            _ => {
                info!(
                    ai_call,
                    max_calls = self.guardrails.max_ai_calls,
                    estimated_tokens = token_est,
                    "Model call"
                );
                let request = self.request(state.messages.clone()).with_tools(self.invoker.definitions());
                let (message, usage) = self.invoke_model(request, ai_call, publisher).await?;
                publisher.model_finished(&message, usage.as_ref());
                message
            }
        };

        state.messages.push(response);
        Ok(true)
    }

    fn request(&self, messages: Vec<Message>) -> ModelRequest {
        // System messages travel inside the list; the provider merges them.
        ModelRequest::new("", messages)
            .with_settings(self.settings.clone())
            .with_temperature(self.temperature)
    }

    /// Stream one completion, forwarding text as it arrives.
    async fn invoke_model(
        &self,
        request: ModelRequest,
        ai_call: u32,
        publisher: &mut Publisher,
    ) -> Result<(Message, Option<Usage>)> {
        let mut rx = self.provider.stream(request).await.map_err(|e| {
            error!(call_number = ai_call, provider = self.provider.name(), error = %e, "Model call failed");
            Error::from(e)
        })?;

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut usage = None;
        let mut stop_reason = None;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.map_err(|e| {
                error!(call_number = ai_call, provider = self.provider.name(), error = %e, "Model stream failed");
                Error::from(e)
            })?;

            if let Some(delta) = chunk.content.as_deref().filter(|d| !d.is_empty()) {
                text.push_str(delta);
                publisher.token(delta).await;
            }
            for call in chunk.tool_calls {
                match tool_calls.iter_mut().find(|c| c.id == call.id) {
                    Some(existing) => *existing = call,
                    None => tool_calls.push(call),
                }
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.stop_reason.is_some() {
                stop_reason = chunk.stop_reason;
            }
            if chunk.done {
                break;
            }
        }

        debug!(
            call_number = ai_call,
            text_len = text.chars().count(),
            tool_calls = tool_calls.len(),
            stop_reason = stop_reason.as_deref().unwrap_or("-"),
            "Model call finished"
        );
        Ok((Message::assistant_with_tool_calls(text, tool_calls), usage))
    }

    /// Run the requested calls in order. Returns `false` if cancelled part way.
    async fn execute_tools(
        &self,
        state: &mut TurnState,
        ctx: &TurnContext,
        publisher: &mut Publisher,
        cancel: &CancellationToken,
    ) -> bool {
        let calls = state
            .last_message()
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();

        for call in &calls {
            if cancel.is_cancelled() {
                info!(tool = %call.name, "Turn cancelled before tool call");
                return false;
            }

            if self.invoker.lookup(&call.name).is_none() {
                warn!(tool = %call.name, call_number = state.ai_call_count, "Model requested an unknown tool");
                let content = ToolError::Unknown(call.name.clone()).to_string();
                state.messages.push(Message::tool_result(&call.id, content, true));
                continue;
            }

            publisher.tool_started(call).await;
            let outcome = self.invoker.invoke(ctx, call).await;
            publisher.tool_finished(call, &outcome).await;
            state
                .messages
                .push(Message::tool_result(&call.id, outcome.content, outcome.is_error));
        }
        true
    }
}
