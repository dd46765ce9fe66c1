//! Turn entry point.
//!
//! A turn runs as one spawned task and reports through an event channel. The
//! per-turn service clients are built at start and closed on every exit path.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info_span};
use triage_config::{GuardrailConfig, ServicesConfig};
use triage_core::error::{Error, ToolError};
use triage_core::message::Message;
use triage_core::organization::Organization;
use triage_core::provider::Provider;
use triage_core::service::TurnContext;
use triage_core::tool::ToolRegistry;
use triage_tools::{ToolInvoker, build_turn_context};

use crate::controller::{TurnController, TurnState};
use crate::prompt::{SYSTEM_PROMPT, UserContext};
use crate::publisher::Publisher;
use crate::stream_event::TurnEvent;

/// Builds the service clients available to one organization's turn.
pub type ContextBuilder =
    Arc<dyn Fn(&Organization) -> std::result::Result<TurnContext, ToolError> + Send + Sync>;

const EVENT_BUFFER: usize = 128;

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub organization: Organization,
    /// Prior history, already compacted
    pub history: Vec<Message>,
    pub user_message: String,
    pub context: Option<UserContext>,
    pub capture_full_trace: bool,
    pub cancel: CancellationToken,
}

impl TurnRequest {
    pub fn new(organization: Organization, user_message: impl Into<String>) -> Self {
        Self {
            organization,
            history: Vec::new(),
            user_message: user_message.into(),
            context: None,
            capture_full_trace: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_context(mut self, context: Option<UserContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_trace(mut self, capture: bool) -> Self {
        self.capture_full_trace = capture;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// System prompt, optional context hint, history, then the new message.
    pub fn initial_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 3);
        messages.push(Message::system(SYSTEM_PROMPT));
        if let Some(hint) = self.context.as_ref().and_then(UserContext::hint) {
            messages.push(Message::system(hint));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.user_message.as_str()));
        messages
    }
}

/// Runs turns against one provider and tool registry.
#[derive(Clone)]
pub struct TurnRunner {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    guardrails: GuardrailConfig,
    temperature: f32,
    context_builder: ContextBuilder,
}

impl TurnRunner {
    /// Clients are built from each organization's mappings and `services`.
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        guardrails: GuardrailConfig,
        services: ServicesConfig,
    ) -> Self {
        let context_builder: ContextBuilder = Arc::new(move |org| build_turn_context(org, &services));
        Self {
            provider,
            registry,
            guardrails,
            temperature: 0.0,
            context_builder,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Replace how turn contexts are built.
    pub fn with_context_builder(mut self, builder: ContextBuilder) -> Self {
        self.context_builder = builder;
        self
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn guardrails(&self) -> &GuardrailConfig {
        &self.guardrails
    }

    /// Start a turn. Exactly one `done` or `error` event is sent before the
    /// channel closes.
    pub fn run_turn(&self, request: TurnRequest) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let runner = self.clone();
        let span = info_span!("turn", org = %request.organization.id);

        tokio::spawn(async move { runner.drive(request, tx).await }.instrument(span));
        rx
    }

    async fn drive(self, request: TurnRequest, tx: mpsc::Sender<TurnEvent>) {
        let cancel = request.cancel.clone();
        let mut publisher = Publisher::new(tx, cancel.clone(), &self.guardrails, request.capture_full_trace);
        let mut state = TurnState::new(request.initial_messages());

        let ctx = match (self.context_builder)(&request.organization) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "Failed to build turn context");
                publisher.finish(Err(Error::from(e)), &state.messages).await;
                return;
            }
        };

        let controller = TurnController::new(
            Arc::clone(&self.provider),
            ToolInvoker::new(Arc::clone(&self.registry), self.guardrails.tool_response_max_chars),
            self.guardrails.clone(),
        )
        .with_settings(request.organization.model.settings())
        .with_temperature(self.temperature);

        let result = controller.run(&mut state, &ctx, &mut publisher, &cancel).await;

        ctx.close_all().await;
        publisher.finish(result, &state.messages).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_messages_order() {
        let org = Organization { id: "org".into(), ..Default::default() };
        let request = TurnRequest::new(org, "why is checkout slow?")
            .with_history(vec![Message::user("earlier"), Message::assistant("reply")])
            .with_context(Some(UserContext { service: Some("checkout".into()), ..Default::default() }));

        let texts: Vec<_> = request.initial_messages().iter().map(Message::text).collect();
        assert_eq!(texts.len(), 5);
        assert_eq!(texts[0], SYSTEM_PROMPT);
        assert_eq!(texts[1], "User provided context:\nService: checkout");
        assert_eq!(texts[2], "earlier");
        assert_eq!(texts[4], "why is checkout slow?");
    }

    #[test]
    fn no_hint_without_context() {
        let org = Organization { id: "org".into(), ..Default::default() };
        let messages = TurnRequest::new(org, "q").initial_messages();
        assert_eq!(messages.len(), 2);
    }
}
