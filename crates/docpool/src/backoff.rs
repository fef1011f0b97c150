//! Exponential backoff with a cumulative budget.

use std::time::Duration;

use crate::config::PoolConfig;

/// Backoff state for one acquire attempt.
///
/// Delays start at the base delay and double on every retry, capped at
/// the per-step maximum. The last delay is shortened to land exactly on
/// the budget; once the whole budget has been slept,
/// [`Backoff::next_delay`] returns `None`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max_delay: Duration,
    budget: Duration,
    elapsed: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff schedule.
    #[must_use]
    pub fn new(base: Duration, max_delay: Duration, budget: Duration) -> Self {
        Self {
            next: base,
            max_delay,
            budget,
            elapsed: Duration::ZERO,
            attempts: 0,
        }
    }

    /// Create the schedule described by a pool configuration.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.retry_base_delay,
            config.max_retry_delay,
            config.retry_timeout,
        )
    }

    /// Take the next delay, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.budget.checked_sub(self.elapsed)?;
        if remaining.is_zero() {
            return None;
        }
        let delay = self.next.min(self.max_delay).min(remaining);
        self.elapsed += delay;
        self.attempts += 1;
        self.next = self.next.saturating_mul(2);
        Some(delay)
    }

    /// Cumulative delay handed out so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_delays_double() {
        let mut backoff = Backoff::new(ms(5), ms(1000), ms(10_000));
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).take(5).collect();
        assert_eq!(delays, vec![ms(5), ms(10), ms(20), ms(40), ms(80)]);
        assert_eq!(backoff.elapsed(), ms(155));
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = Backoff::new(ms(100), ms(250), ms(10_000));
        assert_eq!(backoff.next_delay(), Some(ms(100)));
        assert_eq!(backoff.next_delay(), Some(ms(200)));
        assert_eq!(backoff.next_delay(), Some(ms(250)));
        assert_eq!(backoff.next_delay(), Some(ms(250)));
    }

    #[test]
    fn test_budget_exhaustion() {
        // 5 + 10 + 20 = 35; the last step is cut to the remaining 15.
        let mut backoff = Backoff::new(ms(5), ms(1000), ms(50));
        assert_eq!(backoff.next_delay(), Some(ms(5)));
        assert_eq!(backoff.next_delay(), Some(ms(10)));
        assert_eq!(backoff.next_delay(), Some(ms(20)));
        assert_eq!(backoff.next_delay(), Some(ms(15)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.elapsed(), ms(50));
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn test_whole_budget_is_slept() {
        // 5 + 10 + 20 + 40 = 75 would stop short of 100 without the final step.
        let mut backoff = Backoff::new(ms(5), ms(1000), ms(100));
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays, vec![ms(5), ms(10), ms(20), ms(40), ms(25)]);
        assert_eq!(backoff.elapsed(), ms(100));
    }

    #[test]
    fn test_zero_budget_never_sleeps() {
        let mut backoff = Backoff::new(ms(5), ms(5), Duration::ZERO);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_from_config() {
        let config = PoolConfig::new()
            .retry_base_delay(ms(1))
            .max_retry_delay(ms(2))
            .retry_timeout(ms(4));
        let mut backoff = Backoff::from_config(&config);
        assert_eq!(backoff.next_delay(), Some(ms(1)));
        assert_eq!(backoff.next_delay(), Some(ms(2)));
        assert_eq!(backoff.next_delay(), Some(ms(1)));
        assert_eq!(backoff.next_delay(), None);
    }
}
