//! # Autonomy Scheduler
//!
//! Two independent timers that turn the passage of time into
//! system-originated conversation requests:
//!
//! - **Wake timer**: sleeps a random interval between `wake_min_hours` and
//!   `wake_max_hours`, pushed past quiet hours when it would land inside them,
//!   then enqueues one weighted-random action (reflection, outreach, passive chat).
//! - **Due-task watcher**: every `due_task_interval_secs`, consumes the due
//!   schedule entries from memory and enqueues one request per entry.
//!
//! Both funnel through [`RequestSink`]; neither touches the session directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_config::schema::AutonomyConfig;
use tether_core::{
    Event, EventBus, OriginContext, RequestOrigin, RequestSink, SystemTrigger, TurnHandle,
};
use tether_memory::Memory;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Entropy, SystemClock, SystemEntropy};
use crate::quiet::QuietHours;

const REFLECTION_PROMPT: &str = "[autonomy:reflection] Look back over recent conversations \
and your own configuration. If a change to one of your configurable files would help, propose \
exactly one change with the propose_patch tool. Otherwise reply briefly with what you learned.";

const OUTREACH_PROMPT: &str = "[autonomy:outreach] Reach out to the operator with something \
timely, relevant, or helpful. Keep it short.";

const PASSIVE_PROMPT: &str = "[autonomy:passive] If something is genuinely worth saying, share \
a short casual thought. Otherwise reply with nothing but a brief acknowledgement.";

/// The action chosen when the wake timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeAction {
    Reflection,
    Outreach,
    PassiveChat,
}

impl WakeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reflection => "reflection",
            Self::Outreach => "outreach",
            Self::PassiveChat => "passive_chat",
        }
    }

    pub fn trigger(&self) -> SystemTrigger {
        match self {
            Self::Reflection => SystemTrigger::Reflection,
            Self::Outreach => SystemTrigger::Outreach,
            Self::PassiveChat => SystemTrigger::PassiveChat,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Self::Reflection => REFLECTION_PROMPT,
            Self::Outreach => OUTREACH_PROMPT,
            Self::PassiveChat => PASSIVE_PROMPT,
        }
    }
}

/// When the next wake-up fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakePlan {
    pub at: DateTime<Utc>,
    /// The random draw landed in quiet hours and was pushed to their end.
    pub deferred: bool,
}

pub struct AutonomyScheduler {
    config: AutonomyConfig,
    quiet: QuietHours,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
    sink: Arc<dyn RequestSink>,
    memory: Arc<dyn Memory>,
    context: Arc<dyn OriginContext>,
    events: EventBus,
}

impl AutonomyScheduler {
    /// `context` is the origin every system request replies through.
    pub fn new(
        config: AutonomyConfig,
        sink: Arc<dyn RequestSink>,
        memory: Arc<dyn Memory>,
        context: Arc<dyn OriginContext>,
        events: EventBus,
    ) -> Self {
        Self {
            quiet: QuietHours::from_config(&config),
            config,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(SystemEntropy),
            sink,
            memory,
            context,
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn Entropy>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn quiet_hours(&self) -> &QuietHours {
        &self.quiet
    }

    /// Draw the next wake time after `from`.
    pub fn next_wake(&self, from: DateTime<Utc>) -> WakePlan {
        let min = self.config.wake_min_hours;
        let max = self.config.wake_max_hours.max(min);
        let hours = min + self.entropy.unit() * (max - min);
        let millis = (hours * 3_600_000.0).round() as i64;
        let candidate = from + chrono::Duration::milliseconds(millis);
        let at = self.quiet.next_active(candidate);
        WakePlan {
            at,
            deferred: at != candidate,
        }
    }

    /// Weighted random choice among the three wake actions.
    pub fn choose_action(&self) -> WakeAction {
        let weighted = [
            (WakeAction::Reflection, self.config.reflection_weight.max(0.0)),
            (WakeAction::Outreach, self.config.outreach_weight.max(0.0)),
            (WakeAction::PassiveChat, self.config.passive_weight.max(0.0)),
        ];
        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return WakeAction::PassiveChat;
        }
        let mut roll = self.entropy.unit() * total;
        for (action, weight) in weighted {
            if roll < weight {
                return action;
            }
            roll -= weight;
        }
        // Floating-point remainder lands on the last non-zero weight.
        weighted
            .iter()
            .rev()
            .find(|(_, w)| *w > 0.0)
            .map(|(a, _)| *a)
            .unwrap_or(WakeAction::PassiveChat)
    }

    /// Enqueue one system request for a freshly chosen action.
    pub fn fire_wake(&self) -> tether_core::Result<(WakeAction, TurnHandle)> {
        let action = self.choose_action();
        let handle = self.sink.submit(
            Arc::clone(&self.context),
            RequestOrigin::system(action.trigger()),
            action.prompt().to_string(),
        )?;
        info!(action = action.as_str(), request_id = %handle.request_id(), "wake fired");
        self.events.publish(Event::WakeFired {
            action: action.as_str().to_string(),
        });
        Ok((action, handle))
    }

    /// Consume due schedule entries and enqueue one request per entry.
    /// Returns how many requests were enqueued.
    pub async fn check_due(&self) -> tether_core::Result<usize> {
        let due = self.memory.check_due_tasks(self.clock.now()).await?;
        let mut enqueued = 0;
        for entry in due {
            let prompt = format!(
                "[scheduled task] This task was due at {}: {}",
                entry.due_at.to_rfc3339(),
                entry.task
            );
            let origin = RequestOrigin::system(SystemTrigger::DueTask {
                schedule_id: entry.id,
                task: entry.task.clone(),
            });
            match self.sink.submit(Arc::clone(&self.context), origin, prompt) {
                Ok(handle) => {
                    debug!(schedule_id = %entry.id, request_id = %handle.request_id(), "due task enqueued");
                    self.events.publish(Event::DueTaskEnqueued {
                        schedule_id: entry.id,
                        task: entry.task,
                    });
                    enqueued += 1;
                }
                // The entry is already consumed; losing it is logged, not retried.
                Err(e) => error!(schedule_id = %entry.id, error = %e, "failed to enqueue due task"),
            }
        }
        Ok(enqueued)
    }

    /// Run the wake timer until cancelled.
    pub async fn run_wake_loop(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("autonomous wake-ups disabled");
            return;
        }
        loop {
            let plan = self.next_wake(self.clock.now());
            info!(at = %plan.at, deferred = plan.deferred, "next wake scheduled");
            self.events.publish(Event::WakeScheduled {
                at: plan.at,
                deferred: plan.deferred,
            });

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep_until(plan.at) => {}
            }

            if self.quiet.contains(self.clock.now()) {
                debug!("woke inside quiet hours, rescheduling");
                continue;
            }
            if let Err(e) = self.fire_wake() {
                warn!(error = %e, "wake request rejected");
            }
        }
        info!("wake timer stopped");
    }

    /// Run the due-task watcher until cancelled.
    pub async fn run_due_watcher(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.due_task_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(interval) => {}
            }
            match self.check_due().await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "due tasks enqueued"),
                Err(e) => warn!(error = %e, "due-task check failed"),
            }
        }
        info!("due-task watcher stopped");
    }
}
