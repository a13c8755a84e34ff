use tether_core::{Event, EventBus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Render every bus event as a structured tracing record. Stops after
/// logging [`Event::Shutdown`].
pub fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    log_event(&event);
                    if matches!(event, Event::Shutdown) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &Event) {
    match event {
        Event::RequestEnqueued {
            request_id,
            origin,
            depth,
        } => debug!(%request_id, %origin, depth, "event: request enqueued"),
        Event::TurnStarted {
            request_id,
            waited_ms,
        } => info!(%request_id, waited_ms, "event: turn started"),
        Event::TurnCompleted {
            request_id,
            follow_ups,
            degraded,
        } => info!(%request_id, follow_ups, degraded, "event: turn completed"),
        Event::TurnFailed { request_id, error } => {
            warn!(%request_id, %error, "event: turn failed")
        }
        Event::LeaseAcquired { lease_id } => debug!(%lease_id, "event: lease acquired"),
        Event::LeaseReleased { lease_id, held_ms } => {
            debug!(%lease_id, held_ms, "event: lease released")
        }
        Event::SessionRecovered { attempts } => info!(attempts, "event: session recovered"),
        Event::SessionRecoveryFailed { attempts, error } => {
            warn!(attempts, %error, "event: session recovery failed")
        }
        Event::ToolInvoked {
            request_id,
            tool_name,
            invocation_id,
        } => debug!(%request_id, %tool_name, %invocation_id, "event: tool invoked"),
        Event::ToolDenied {
            request_id,
            tool_name,
            reason,
        } => info!(%request_id, %tool_name, %reason, "event: tool denied"),
        Event::ToolFinished {
            request_id,
            invocation_id,
            is_error,
        } => debug!(%request_id, %invocation_id, is_error, "event: tool finished"),
        Event::MemoryImprinted { request_id, count } => {
            debug!(%request_id, count, "event: memory imprinted")
        }
        Event::WakeScheduled { at, deferred } => {
            info!(%at, deferred, "event: wake scheduled")
        }
        Event::WakeFired { action } => info!(%action, "event: wake fired"),
        Event::DueTaskEnqueued { schedule_id, task } => {
            info!(%schedule_id, %task, "event: due task enqueued")
        }
        Event::PatchProposed { patch_id, target } => {
            info!(%patch_id, %target, "event: patch proposed")
        }
        Event::PatchRejected { target, reason } => {
            info!(%target, %reason, "event: patch rejected")
        }
        Event::PatchDeployed { patch_id, target } => {
            info!(%patch_id, %target, "event: patch deployed")
        }
        Event::PatchDropped { patch_id, target } => {
            info!(%patch_id, %target, "event: patch dropped")
        }
        Event::Shutdown => info!("event: shutdown"),
    }
}
