use std::time::Duration;

use hubrelay_config::ConnectionConfig;

/// Capped exponential backoff: `min(initial * factor^(n-1), max)` for the
/// n-th consecutive failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            factor,
            max,
            failures: 0,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_factor,
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay after the given consecutive failure (1-based).
    pub fn delay_for(&self, failure: u32) -> Duration {
        let exponent = i32::try_from(failure.max(1) - 1).unwrap_or(i32::MAX);
        let millis = self.initial.as_millis() as f64 * self.factor.powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay_for(self.failures)
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::from_config(&ConnectionConfig::default())
    }

    #[test]
    fn first_delays_follow_the_factor() {
        let mut b = backoff();
        assert_eq!(b.next_delay(), Duration::from_millis(3_000));
        assert_eq!(b.next_delay(), Duration::from_millis(4_500));
        assert_eq!(b.next_delay(), Duration::from_millis(6_750));
        assert_eq!(b.failures(), 3);
    }

    #[test]
    fn delays_never_decrease_and_cap_at_max() {
        let b = backoff();
        let delays: Vec<_> = (1..=40).map(|n| b.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays.last().copied(), Some(Duration::from_millis(60_000)));
        assert_eq!(b.delay_for(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut b = backoff();
        for _ in 0..5 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.failures(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(3_000));
    }
}
