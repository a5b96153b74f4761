use crate::logw;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and records every requested sleep.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FakeClock {
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut guard) = self.sleeps.lock() {
            guard.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Enough attempts at `interval` to cover `ceiling`; always at least one.
    pub fn with_ceiling(interval: Duration, ceiling: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = ceiling.as_millis().div_ceil(interval_ms).max(1);
        Self {
            interval,
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { attempts: u32 },
}

/// Runs `check` up to `policy.max_attempts` times, sleeping `policy.interval`
/// after every attempt that did not produce a value. A failing check is
/// logged and treated like a pending one.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    clock: &dyn Clock,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            Ok(Some(value)) => return PollOutcome::Ready(value),
            Ok(None) => {}
            Err(err) => logw(format!("Poll attempt {} failed: {:#}", attempt, err)),
        }
        if attempt < policy.max_attempts {
            clock.sleep(policy.interval).await;
        }
    }

    PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    }
}
