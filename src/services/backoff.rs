use std::time::Duration;

/// Exponential delay: `initial`, doubling per call to `next_delay`, never above `max`.
///
/// With jitter enabled each delay is shortened by up to a quarter so several
/// loops waiting on the same dependency drift apart.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(1.0 - 0.25 * rand::random::<f64>())
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60)).without_jitter();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8)).without_jitter();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(Duration::from_secs(40), Duration::from_secs(40));
        for _ in 0..50 {
            let d = backoff.next_delay();
            assert!(d <= Duration::from_secs(40));
            assert!(d >= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_initial_above_max_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(90), Duration::from_secs(60)).without_jitter();
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }
}
