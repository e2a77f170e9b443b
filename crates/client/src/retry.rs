//! Reconnect delay policies.

use std::fmt::Debug;
use std::time::Duration;

/// Decides how long to wait before each built-in reconnect attempt.
pub trait RetryPolicy: Debug + Send + Sync + 'static {
    /// Delay before reconnect attempt `attempt` (zero-based), or `None` to
    /// give up and report the connection as closed.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// A fixed, non-decreasing list of delays. Attempt `n` waits `delays[n]`;
/// once the list is exhausted reconnecting stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// Builds a schedule, raising any delay that is shorter than its
    /// predecessor so the sequence never decreases.
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        let mut floor = Duration::ZERO;
        let delays = delays
            .into_iter()
            .map(|delay| {
                floor = floor.max(delay);
                floor
            })
            .collect();
        Self { delays }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis))
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_millis(&[0, 1_000, 3_000, 8_000, 15_000, 30_000])
    }
}

impl RetryPolicy for BackoffSchedule {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        self.delays.get(attempt as usize).copied()
    }
}

/// Multiplicative backoff capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Number of reconnect attempts before giving up.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl ExponentialBackoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.delay_for_attempt(attempt))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_schedule_matches_hub_defaults() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.next_delay(0), Some(Duration::ZERO));
        assert_eq!(schedule.next_delay(2), Some(Duration::from_secs(3)));
        assert_eq!(schedule.next_delay(5), Some(Duration::from_secs(30)));
        assert_eq!(schedule.next_delay(6), None);
        assert_eq!(schedule.max_attempts(), 6);
    }

    #[test]
    fn schedule_is_made_monotonic() {
        let schedule = BackoffSchedule::from_millis(&[100, 50, 200]);
        assert_eq!(
            schedule.delays(),
            &[
                Duration::from_millis(100),
                Duration::from_millis(100),
                Duration::from_millis(200)
            ]
        );
    }

    #[test]
    fn empty_schedule_never_retries() {
        assert_eq!(BackoffSchedule::new([]).next_delay(0), None);
    }

    #[test]
    fn exponential_backoff_is_capped_and_bounded() {
        let policy = ExponentialBackoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            multiplier: 2.0,
        };
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(4), None);
    }

    proptest! {
        #[test]
        fn schedule_never_decreases(delays in proptest::collection::vec(0u64..60_000, 0..12)) {
            let schedule = BackoffSchedule::from_millis(&delays);
            for pair in schedule.delays().windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            prop_assert_eq!(schedule.next_delay(delays.len() as u32), None);
        }

        #[test]
        fn exponential_never_exceeds_max(attempt in 0u32..64, multiplier in 1.0f64..4.0) {
            let policy = ExponentialBackoff { multiplier, ..Default::default() };
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }
}
