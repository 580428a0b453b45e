//! Connect retry timing.
//!
//! Nothing here sleeps. A [`Backoff`] only remembers when the next dial is
//! due; the reactor folds that instant into its poll timeout and calls
//! [`Backoff::take_due`] after every wakeup.

use crate::options::SocketOptions;
use rand::Rng;
use std::time::{Duration, Instant};

/// Doubling limit; past 2^16 the cap has long since applied.
const MAX_SHIFT: u32 = 16;

/// Retry schedule for one outgoing endpoint.
///
/// ```
/// use ferrite_core::options::SocketOptions;
/// use ferrite_core::reconnect::Backoff;
/// use std::time::Duration;
///
/// let opts = SocketOptions::new()
///     .with_reconnect_ivl(Duration::from_millis(20))
///     .with_reconnect_ivl_max(Duration::from_millis(50));
/// let mut backoff = Backoff::new(&opts);
/// let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
/// assert_eq!(delays, [20, 40, 50, 50]);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    limit: Option<u32>,
    failures: u32,
    deadline: Option<Instant>,
}

impl Backoff {
    pub fn new(options: &SocketOptions) -> Self {
        Self {
            base: options.reconnect_ivl,
            cap: options.reconnect_ivl_max,
            // The field is public, so it may bypass `with_reconnect_jitter`.
            jitter: if options.reconnect_jitter.is_nan() {
                0.0
            } else {
                options.reconnect_jitter.clamp(0.0, 1.0)
            },
            limit: options.reconnect_max_attempts,
            failures: 0,
            deadline: None,
        }
    }

    /// Counts one failure and returns the delay that applies to it, before
    /// jitter. A zero cap keeps every delay at the base interval.
    pub fn next_delay(&mut self) -> Duration {
        let delay = if self.cap.is_zero() {
            self.base
        } else {
            let factor = 1_u32 << self.failures.min(MAX_SHIFT);
            self.base.saturating_mul(factor).min(self.cap)
        };
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Arms the next attempt after a failed one.
    ///
    /// Once `reconnect_max_attempts` failures have piled up nothing is armed
    /// and the endpoint should be reported unreachable.
    pub fn schedule(&mut self, now: Instant) -> Result<Duration, ReconnectError> {
        if let Some(limit) = self.limit {
            if self.failures.saturating_add(1) >= limit {
                self.failures = limit;
                self.deadline = None;
                return Err(ReconnectError::MaxAttemptsReached { attempts: limit });
            }
        }
        let delay = self.next_delay();
        let delay = self.spread(delay);
        self.deadline = Some(now + delay);
        Ok(delay)
    }

    fn spread(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64((1.0 + offset).max(0.0))
    }

    /// True once per armed attempt, when `now` has reached it.
    pub fn take_due(&mut self, now: Instant) -> bool {
        if self.deadline.is_some_and(|due| due <= now) {
            self.deadline = None;
            return true;
        }
        false
    }

    /// Forget past failures, e.g. after a peer greeted us.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.deadline = None;
    }

    #[inline]
    pub const fn attempt(&self) -> u32 {
        self.failures
    }

    #[inline]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    #[error("gave up after {attempts} failed connection attempts")]
    MaxAttemptsReached { attempts: u32 },
}
