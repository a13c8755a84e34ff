use std::time::Duration;

use tether_core::{Event, EventBus, TetherError, ToolErrorKind, ToolInvocation, ToolOutcome};
use tracing::{debug, warn};

use super::registry::{ToolContext, ToolRegistry, check_arguments};

/// Runs one authorized invocation to a [`ToolOutcome`]. Every failure mode,
/// including a panicking handler, is scoped to the invocation.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    events: EventBus,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration, events: EventBus) -> Self {
        Self {
            registry,
            timeout,
            events,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> ToolOutcome {
        let Some(handler) = self.registry.get(&invocation.tool_name) else {
            return ToolOutcome::error(
                invocation,
                ToolErrorKind::NotFound,
                format!("unknown tool '{}'", invocation.tool_name),
            );
        };
        let spec = handler.spec();

        if let Err(reason) = check_arguments(&spec.parameters, &invocation.arguments) {
            return ToolOutcome::error(invocation, ToolErrorKind::InvalidArguments, reason)
                .with_feedback(spec.needs_feedback);
        }

        self.events.publish(Event::ToolInvoked {
            request_id: ctx.request_id,
            tool_name: invocation.tool_name.clone(),
            invocation_id: invocation.id,
        });
        debug!(tool = %invocation.tool_name, invocation_id = %invocation.id, "executing tool");

        let args = invocation.arguments.clone();
        let task_ctx = ctx.clone();
        let mut task = tokio::spawn(async move { handler.call(args, task_ctx).await });

        let outcome = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(output))) => {
                let outcome = ToolOutcome::success(invocation, output.content);
                match output.data {
                    Some(data) => outcome.with_data(data),
                    None => outcome,
                }
            }
            Ok(Ok(Err(e))) => ToolOutcome::error(invocation, error_kind(&e), e.to_string()),
            Ok(Err(join)) => {
                warn!(tool = %invocation.tool_name, error = %join, "tool task failed");
                let reason = if join.is_panic() {
                    "tool panicked"
                } else {
                    "tool task was cancelled"
                };
                ToolOutcome::error(invocation, ToolErrorKind::Execution, reason)
            }
            Err(_) => {
                task.abort();
                warn!(tool = %invocation.tool_name, timeout_secs = self.timeout.as_secs(), "tool timed out");
                ToolOutcome::error(
                    invocation,
                    ToolErrorKind::Timeout,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            }
        }
        .with_feedback(spec.needs_feedback);

        self.events.publish(Event::ToolFinished {
            request_id: ctx.request_id,
            invocation_id: invocation.id,
            is_error: outcome.is_error,
        });
        outcome
    }
}

fn error_kind(error: &TetherError) -> ToolErrorKind {
    match error {
        TetherError::ToolNotFound(_) => ToolErrorKind::NotFound,
        TetherError::ToolArguments { .. } => ToolErrorKind::InvalidArguments,
        TetherError::ToolTimeout { .. } => ToolErrorKind::Timeout,
        TetherError::PermissionDenied { .. } => ToolErrorKind::Permission,
        _ => ToolErrorKind::Execution,
    }
}
