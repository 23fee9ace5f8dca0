//! Scheduled-retry wait loop
//!
//! A single polling abstraction reused by mock-rule waits and element
//! lookups: probe, sleep a fixed interval, repeat until the probe yields a
//! value or the attempt budget runs out. Each retry yields to the scheduler;
//! there is no busy-looping and no external cancellation handle.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;

/// Default number of probe attempts
pub const DEFAULT_MAX_ATTEMPTS: usize = 20;

/// Default interval between probe attempts
pub const DEFAULT_INTERVAL_MS: u64 = 50;

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("gave up waiting for {what} after {attempts} attempts ({elapsed_ms} ms)")]
    Timeout {
        what: String,
        attempts: usize,
        elapsed_ms: u64,
    },
}

pub type WaitResult<T> = Result<T, WaitError>;

/// Options for a polling wait.
///
/// The defaults tolerate the asynchronous round-trip to an interception
/// channel endpoint (roughly a one-second budget) without false timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Maximum number of probe attempts
    pub max_attempts: usize,
    /// Interval between attempts
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }
}

impl PollOptions {
    pub fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Poll `probe` until it yields a value.
///
/// The probe runs once immediately; between subsequent attempts the task
/// sleeps for `options.interval`. When the budget is exhausted the returned
/// error names `what` along with the attempt count and elapsed time, so
/// callers can surface a message like
/// `gave up waiting for rule "joke" after 20 attempts (1000 ms)`.
pub async fn poll_until<T, F>(what: &str, options: PollOptions, mut probe: F) -> WaitResult<T>
where
    F: FnMut() -> Option<T>,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        if let Some(value) = probe() {
            return Ok(value);
        }

        if attempts >= options.max_attempts {
            return Err(WaitError::Timeout {
                what: what.to_string(),
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }

        sleep(options.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn resolves_immediately_when_probe_is_ready() {
        let result = poll_until("ready value", PollOptions::default(), || Some(42)).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_probe_yields() {
        let calls = AtomicUsize::new(0);
        let options = PollOptions::new(10, Duration::from_millis(1));

        let result = poll_until("third attempt", options, || {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                Some("done")
            } else {
                None
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_after_attempt_budget() {
        let calls = AtomicUsize::new(0);
        let options = PollOptions::new(4, Duration::from_millis(1));

        let result: WaitResult<()> = poll_until("never ready", options, || {
            calls.fetch_add(1, Ordering::SeqCst);
            None
        })
        .await;

        match result {
            Err(WaitError::Timeout { what, attempts, .. }) => {
                assert_eq!(what, "never ready");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
