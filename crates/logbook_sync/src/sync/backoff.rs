//! Retry backoff for failed sync passes.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// Delays start at the initial value and double per failure up to the cap;
/// a success resets the sequence. Jitter of up to 25% of the base delay is
/// added so that instances which failed together do not retry together.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    /// Create a backoff with the given initial delay and cap.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// The base delay the next failure will use (before jitter).
    pub fn current(&self) -> Duration {
        self.next
    }

    /// Consume and return the next delay, doubling the base for the failure
    /// after this one.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (base * 2).min(self.max);
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
        base + jitter
    }

    /// Reset after a success.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
