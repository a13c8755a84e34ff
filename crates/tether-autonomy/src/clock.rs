use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time and delays for the scheduler.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Sleep until `at`; returns immediately if it has passed.
    async fn sleep_until(&self, at: DateTime<Utc>) {
        if let Ok(remaining) = (at - self.now()).to_std() {
            self.sleep(remaining).await;
        }
    }
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Uniform random numbers in `[0, 1)`.
pub trait Entropy: Send + Sync {
    fn unit(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEntropy;

impl Entropy for SystemEntropy {
    fn unit(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Replays a fixed sequence of values, cycling when exhausted.
#[derive(Debug)]
pub struct FixedEntropy {
    values: Mutex<VecDeque<f64>>,
}

impl FixedEntropy {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        let mut values: VecDeque<f64> = values
            .into_iter()
            .map(|v| v.clamp(0.0, 0.999_999))
            .collect();
        if values.is_empty() {
            values.push_back(0.0);
        }
        Self {
            values: Mutex::new(values),
        }
    }
}

impl Entropy for FixedEntropy {
    fn unit(&self) -> f64 {
        let mut values = self.values.lock();
        let v = values.pop_front().unwrap_or(0.0);
        values.push_back(v);
        v
    }
}
