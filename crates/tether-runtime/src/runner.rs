use std::sync::Arc;

use chrono::Utc;
use tether_core::{
    ConversationRequest, Event, EventBus, ReplyOptions, TetherError, TurnReport,
};
use tether_session::SessionGate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{ProtocolDispatcher, follow_up_prompt};
use crate::protocol;
use crate::queue::{QueueReceiver, QueuedRequest};

/// The single consumer of the request queue.
///
/// Holds the session lease for one whole turn: the originating prompt plus
/// up to `max_follow_up_hops` tool-result continuations. The lease is a drop
/// guard, so every exit path from a turn releases it.
pub struct TurnRunner {
    gate: SessionGate,
    dispatcher: Arc<ProtocolDispatcher>,
    events: EventBus,
    max_follow_up_hops: u8,
}

impl TurnRunner {
    pub fn new(
        gate: SessionGate,
        dispatcher: Arc<ProtocolDispatcher>,
        events: EventBus,
        max_follow_up_hops: u8,
    ) -> Self {
        Self {
            gate,
            dispatcher,
            events,
            max_follow_up_hops,
        }
    }

    /// Drain the queue until cancelled or every producer is gone.
    ///
    /// Cancellation is only observed between turns; an in-flight turn always
    /// runs to completion. Requests still queued at that point are dropped
    /// and their handles resolve with `QueueClosed`.
    pub async fn run(&self, mut rx: QueueReceiver, cancel: CancellationToken) {
        info!("turn runner started");
        loop {
            let QueuedRequest { request, resolver } = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };

            let result = self.run_turn(&request).await;
            match &result {
                Ok(report) => self.events.publish(Event::TurnCompleted {
                    request_id: request.id,
                    follow_ups: report.follow_ups,
                    degraded: report.degraded,
                }),
                Err(e) => self.events.publish(Event::TurnFailed {
                    request_id: request.id,
                    error: e.to_string(),
                }),
            }
            resolver.resolve(result);
        }
        info!("turn runner stopped");
    }

    /// One full turn for `request`, holding the lease throughout.
    pub async fn run_turn(&self, request: &ConversationRequest) -> tether_core::Result<TurnReport> {
        let waited_ms = (Utc::now() - request.enqueued_at).num_milliseconds().max(0) as u64;
        info!(request_id = %request.id, origin = %request.origin, waited_ms, "turn started");
        self.events.publish(Event::TurnStarted {
            request_id: request.id,
            waited_ms,
        });
        if let Err(e) = request.context.send_typing().await {
            debug!(error = %e, "typing indicator failed");
        }

        let lease = self.gate.acquire().await;
        let mut report = TurnReport {
            request_id: request.id,
            ..Default::default()
        };
        let mut replies = Vec::new();
        let mut prompt = request.prompt.clone();

        loop {
            let raw = match lease.send(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.notify_failure(request, &e).await;
                    if matches!(e, TetherError::SessionCrash(_)) {
                        if let Err(recovery) = lease.recover().await {
                            error!(error = %recovery, "session is still down after recovery");
                        }
                    }
                    return Err(e);
                }
            };

            let envelope = protocol::parse(&raw);
            report.degraded |= envelope.degraded;
            if let Some(reply) = &envelope.reply {
                replies.push(reply.clone());
            }

            let dispatched = self.dispatcher.dispatch(&envelope, request).await;
            report.memories_stored += dispatched.memories_stored;
            let next = dispatched
                .needs_feedback()
                .then(|| follow_up_prompt(&dispatched.outcomes));
            report.outcomes.extend(dispatched.outcomes);

            match next {
                Some(follow_up) if report.follow_ups < self.max_follow_up_hops => {
                    report.follow_ups += 1;
                    debug!(request_id = %request.id, hop = report.follow_ups, "tool results need feedback");
                    prompt = follow_up;
                }
                Some(_) => {
                    warn!(
                        request_id = %request.id,
                        max = self.max_follow_up_hops,
                        "follow-up limit reached, ending turn"
                    );
                    break;
                }
                None => break,
            }
        }

        if !replies.is_empty() {
            report.reply = Some(replies.join("\n\n"));
        }
        Ok(report)
    }

    async fn notify_failure(&self, request: &ConversationRequest, error: &TetherError) {
        let text = match error {
            TetherError::SessionTimeout { .. } => {
                "The session did not finish answering in time. Please try again."
            }
            TetherError::SessionCrash(_) => {
                "The session stopped responding and is being restarted. Please try again shortly."
            }
            _ => "Something went wrong while handling this message.",
        };
        warn!(request_id = %request.id, error = %error, "turn failed");
        if let Err(e) = request.context.reply(text, ReplyOptions::default()).await {
            warn!(request_id = %request.id, error = %e, "failure notice not delivered");
        }
    }
}
