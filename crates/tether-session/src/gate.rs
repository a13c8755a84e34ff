use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tether_config::schema::SessionConfig;
use tether_core::{Event, EventBus, LeaseId, TetherError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detector::{StabilityDetector, Verdict};
use crate::transport::SessionTransport;

/// Snapshot of who holds the session, for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub held: bool,
    pub lease_id: Option<LeaseId>,
    pub held_ms: Option<u64>,
    pub transport: String,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    lease_id: LeaseId,
    since: Instant,
}

/// Sole owner of the reasoning session.
///
/// Leases are granted one at a time in request order; waiting callers queue
/// on a fair mutex.
#[derive(Clone)]
pub struct SessionGate {
    transport: Arc<dyn SessionTransport>,
    lock: Arc<Mutex<()>>,
    holder: Arc<SyncMutex<Option<Holder>>>,
    settings: SessionConfig,
    events: EventBus,
}

impl SessionGate {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        settings: SessionConfig,
        events: EventBus,
    ) -> Self {
        Self {
            transport,
            lock: Arc::new(Mutex::new(())),
            holder: Arc::new(SyncMutex::new(None)),
            settings,
            events,
        }
    }

    /// Wait for the session and take the lease.
    pub async fn acquire(&self) -> SessionLease {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.grant(guard)
    }

    /// Take the lease only if nobody holds it.
    pub fn try_acquire(&self) -> Option<SessionLease> {
        let guard = Arc::clone(&self.lock).try_lock_owned().ok()?;
        Some(self.grant(guard))
    }

    fn grant(&self, guard: OwnedMutexGuard<()>) -> SessionLease {
        let lease_id = Uuid::new_v4();
        let since = Instant::now();
        *self.holder.lock() = Some(Holder { lease_id, since });
        debug!(%lease_id, "session lease acquired");
        self.events.publish(Event::LeaseAcquired { lease_id });
        SessionLease {
            id: lease_id,
            acquired_at: since,
            _guard: guard,
            transport: Arc::clone(&self.transport),
            holder: Arc::clone(&self.holder),
            settings: self.settings.clone(),
            events: self.events.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }

    pub fn status(&self) -> GateStatus {
        let holder = *self.holder.lock();
        GateStatus {
            held: holder.is_some(),
            lease_id: holder.map(|h| h.lease_id),
            held_ms: holder.map(|h| h.since.elapsed().as_millis() as u64),
            transport: self.transport.name().to_string(),
        }
    }
}

/// Exclusive right to talk to the session.
///
/// Released exactly once, when dropped, on every path out of a turn.
pub struct SessionLease {
    id: LeaseId,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
    transport: Arc<dyn SessionTransport>,
    holder: Arc<SyncMutex<Option<Holder>>>,
    settings: SessionConfig,
    events: EventBus,
}

fn as_crash(e: TetherError) -> TetherError {
    match e {
        TetherError::SessionCrash(_) => e,
        other => TetherError::SessionCrash(other.to_string()),
    }
}

impl SessionLease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    /// Send a prompt and wait for the reply to settle.
    ///
    /// Fails with `SessionTimeout` when the reply does not settle within
    /// `response_timeout_secs`, and with `SessionCrash` when the transport
    /// errors.
    pub async fn send(&self, prompt: &str) -> tether_core::Result<String> {
        let baseline = self.transport.snapshot().await.map_err(as_crash)?;
        let baseline_count = self.transport.message_count().await.map_err(as_crash)?;
        let mut detector = StabilityDetector::new(self.settings.min_stable_polls)
            .with_baseline(baseline.as_deref());

        self.transport.submit(prompt).await.map_err(as_crash)?;
        debug!(lease_id = %self.id, chars = prompt.len(), "prompt submitted");

        let poll = Duration::from_millis(self.settings.poll_interval_ms);
        let limit = Duration::from_secs(self.settings.response_timeout_secs);
        let started = Instant::now();
        let mut polls: u32 = 0;
        let waited =
            tokio::time::timeout(
                limit,
                self.poll_until_settled(&mut detector, baseline_count, poll, &mut polls),
            )
            .await;

        match waited {
            Ok(Ok(text)) => {
                debug!(lease_id = %self.id, polls, "reply settled");
                Ok(text)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(lease_id = %self.id, waited_ms, "session reply did not settle");
                Err(TetherError::SessionTimeout { waited_ms })
            }
        }
    }

    async fn poll_until_settled(
        &self,
        detector: &mut StabilityDetector,
        baseline_count: Option<usize>,
        poll: Duration,
        polls: &mut u32,
    ) -> tether_core::Result<String> {
        loop {
            tokio::time::sleep(poll).await;
            *polls += 1;
            let snapshot = self.transport.snapshot().await.map_err(as_crash)?;
            if let Some(before) = baseline_count {
                let now = self.transport.message_count().await.map_err(as_crash)?;
                if now.is_some_and(|n| n > before) {
                    detector.mark_new_message();
                }
            }
            if let Verdict::Complete(text) = detector.observe(snapshot.as_deref()) {
                return Ok(text);
            }
        }
    }

    /// Retry `transport.recover()` with linear backoff while still holding the
    /// lease, so queued requests wait for a usable session.
    pub async fn recover(&self) -> tether_core::Result<()> {
        let attempts = self.settings.recovery_attempts.max(1);
        let backoff = Duration::from_secs(self.settings.recovery_backoff_secs);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.transport.recover().await {
                Ok(()) => {
                    info!(attempt, "session recovered");
                    self.events.publish(Event::SessionRecovered { attempts: attempt });
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "session recovery attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff * attempt).await;
                    }
                }
            }
        }

        self.events.publish(Event::SessionRecoveryFailed {
            attempts,
            error: last_error.clone(),
        });
        Err(TetherError::SessionCrash(format!(
            "recovery failed after {attempts} attempts: {last_error}"
        )))
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        *self.holder.lock() = None;
        let held_ms = self.acquired_at.elapsed().as_millis() as u64;
        debug!(lease_id = %self.id, held_ms, "session lease released");
        self.events.publish(Event::LeaseReleased {
            lease_id: self.id,
            held_ms,
        });
    }
}
