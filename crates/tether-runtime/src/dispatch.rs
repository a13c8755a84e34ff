//! # Protocol Dispatcher
//!
//! Routes the three streams of a [`ProtocolEnvelope`] for one turn, in order:
//!
//! 1. the reply goes to the origin context verbatim;
//! 2. each action-plan item is authorized in listed order, then the allowed
//!    ones execute (concurrently, up to `max_parallel`) with results collected
//!    back in listed order;
//! 3. each memory entry is forwarded to the memory collaborator.
//!
//! Nothing here fails the turn. Delivery and memory errors are logged, tool
//! failures become error outcomes.

use std::sync::Arc;

use futures::StreamExt;
use tether_autonomy::SecurityGate;
use tether_core::{
    Authorization, ConversationRequest, Event, EventBus, ReplyOptions, ToolErrorKind,
    ToolInvocation, ToolOutcome,
};
use tether_memory::{Memory, MemoryMetadata};
use tracing::{debug, warn};

use crate::protocol::ProtocolEnvelope;
use crate::tools::{ToolContext, ToolExecutor};

/// What dispatching one envelope did.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub reply_delivered: bool,
    /// One outcome per action-plan item, in listed order.
    pub outcomes: Vec<ToolOutcome>,
    pub memories_stored: usize,
}

impl DispatchReport {
    pub fn needs_feedback(&self) -> bool {
        self.outcomes.iter().any(|o| o.needs_feedback)
    }
}

pub struct ProtocolDispatcher {
    security: Arc<SecurityGate>,
    executor: ToolExecutor,
    memory: Arc<dyn Memory>,
    events: EventBus,
    max_parallel: usize,
}

impl ProtocolDispatcher {
    pub fn new(
        security: Arc<SecurityGate>,
        executor: ToolExecutor,
        memory: Arc<dyn Memory>,
        events: EventBus,
        max_parallel: usize,
    ) -> Self {
        Self {
            security,
            executor,
            memory,
            events,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub async fn dispatch(
        &self,
        envelope: &ProtocolEnvelope,
        request: &ConversationRequest,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        if let Some(reply) = &envelope.reply {
            match request.context.reply(reply, ReplyOptions::markdown()).await {
                Ok(()) => report.reply_delivered = true,
                Err(e) => warn!(request_id = %request.id, error = %e, "reply delivery failed"),
            }
        }

        if !envelope.actions.is_empty() {
            report.outcomes = self.run_actions(envelope, request).await;
        }

        if !envelope.memories.is_empty() {
            for imprint in &envelope.memories {
                let metadata = MemoryMetadata::from_session(request.id, imprint.tags.clone());
                match self.memory.memorize(&imprint.text, metadata).await {
                    Ok(()) => report.memories_stored += 1,
                    Err(e) => warn!(request_id = %request.id, error = %e, "memorize failed"),
                }
            }
            self.events.publish(Event::MemoryImprinted {
                request_id: request.id,
                count: report.memories_stored,
            });
        }

        report
    }

    async fn run_actions(
        &self,
        envelope: &ProtocolEnvelope,
        request: &ConversationRequest,
    ) -> Vec<ToolOutcome> {
        let registry = self.executor.registry();
        let ctx = ToolContext {
            request_id: request.id,
            origin: request.origin.clone(),
            origin_context: Arc::clone(&request.context),
        };

        // Authorization is decided up front, in listed order.
        let authorized: Vec<_> = envelope
            .actions
            .iter()
            .map(|action| {
                let spec = registry.spec(&action.tool_name);
                let verdict =
                    self.security
                        .authorize(spec.as_ref(), action, request.context.as_ref());
                let mut invocation = action.clone();
                invocation.authorization = Some(verdict.clone());
                (invocation, verdict)
            })
            .collect();

        futures::stream::iter(authorized)
            .map(|(invocation, verdict)| {
                let ctx = ctx.clone();
                async move {
                    match verdict {
                        Authorization::Allow => self.executor.execute(&invocation, &ctx).await,
                        Authorization::Deny { reason } => self.deny(&invocation, &ctx, reason),
                    }
                }
            })
            .buffered(self.max_parallel)
            .collect()
            .await
    }

    fn deny(
        &self,
        invocation: &ToolInvocation,
        ctx: &ToolContext,
        reason: String,
    ) -> ToolOutcome {
        debug!(tool = %invocation.tool_name, %reason, "invocation denied");
        self.events.publish(Event::ToolDenied {
            request_id: ctx.request_id,
            tool_name: invocation.tool_name.clone(),
            reason: reason.clone(),
        });
        ToolOutcome::error(invocation, ToolErrorKind::Permission, reason)
    }
}

/// The follow-up prompt that hands tool results back to the session.
pub fn follow_up_prompt(outcomes: &[ToolOutcome]) -> String {
    let mut prompt = String::from("[tool results]\n");
    for outcome in outcomes.iter().filter(|o| o.needs_feedback) {
        let status = if outcome.is_error { "error" } else { "ok" };
        prompt.push_str(&format!(
            "\n<result tool=\"{}\" status=\"{status}\">\n{}\n</result>\n",
            outcome.tool_name, outcome.content
        ));
    }
    prompt.push_str("\nContinue the conversation using these results.");
    prompt
}
