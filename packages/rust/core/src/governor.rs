//! Adaptive request pacing.
//!
//! The governor speeds up slowly (every third consecutive success) and backs
//! off quickly (on every error). Delays handed out are jittered so request
//! timing does not look mechanical.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;

use facetharvest_shared::GovernorConfig;

const SPEEDUP_FACTOR: f64 = 0.9;
const BACKOFF_FACTOR: f64 = 1.5;
const SPEEDUP_EVERY: u32 = 3;
const JITTER: (f64, f64) = (0.8, 1.2);
const BREAK_FACTOR: (f64, f64) = (1.2, 1.5);
const LATENCY_WINDOW: usize = 10;

/// Rolling success/error state that decides the delay between shards.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    current_ms: f64,
    min_ms: f64,
    max_ms: f64,
    consecutive_successes: u32,
    latencies: VecDeque<Duration>,
    errors: u64,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let min_ms = config.min_delay_ms as f64;
        let max_ms = (config.max_delay_ms as f64).max(min_ms);
        Self {
            current_ms: (config.base_delay_ms as f64).clamp(min_ms, max_ms),
            min_ms,
            max_ms,
            consecutive_successes: 0,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            errors: 0,
        }
    }

    /// Note a successful shard, optionally with its observed latency.
    pub fn record_success(&mut self, latency: Option<Duration>) {
        self.consecutive_successes += 1;
        if let Some(latency) = latency {
            if self.latencies.len() == LATENCY_WINDOW {
                self.latencies.pop_front();
            }
            self.latencies.push_back(latency);
        }
        if self.consecutive_successes % SPEEDUP_EVERY == 0 {
            self.current_ms = (self.current_ms * SPEEDUP_FACTOR).max(self.min_ms);
        }
    }

    /// Note a failed shard: back off and reset the success streak.
    pub fn record_error(&mut self) {
        self.errors += 1;
        self.consecutive_successes = 0;
        self.current_ms = (self.current_ms * BACKOFF_FACTOR).min(self.max_ms);
    }

    /// The un-jittered delay.
    pub fn current_delay(&self) -> Duration {
        millis(self.current_ms)
    }

    /// Delay before the next shard, uniform in ±20% of the current delay.
    pub fn next_delay(&self) -> Duration {
        self.scaled(JITTER)
    }

    /// Longer pause taken on the break cadence.
    pub fn break_delay(&self) -> Duration {
        self.scaled(BREAK_FACTOR)
    }

    fn scaled(&self, (low, high): (f64, f64)) -> Duration {
        let factor = rand::thread_rng().gen_range(low..=high);
        millis(self.current_ms * factor)
    }

    /// Mean of the last ten recorded latencies.
    pub fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_micros((ms * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(base: u64, min: u64, max: u64) -> RateGovernor {
        RateGovernor::new(GovernorConfig {
            base_delay_ms: base,
            min_delay_ms: min,
            max_delay_ms: max,
        })
    }

    #[test]
    fn starts_at_base_within_bounds() {
        assert_eq!(
            governor(1000, 300, 5000).current_delay(),
            Duration::from_millis(1000)
        );
        assert_eq!(
            governor(10, 300, 5000).current_delay(),
            Duration::from_millis(300)
        );
        assert_eq!(
            governor(9000, 300, 5000).current_delay(),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn three_successes_decrease_delay() {
        let mut g = governor(1000, 300, 5000);
        g.record_success(None);
        g.record_success(None);
        assert_eq!(g.current_delay(), Duration::from_millis(1000));
        g.record_success(None);
        assert!(g.current_delay() < Duration::from_millis(1000));
        assert_eq!(g.current_delay(), Duration::from_millis(900));
    }

    #[test]
    fn speedup_is_floored_at_min() {
        let mut g = governor(310, 300, 5000);
        for _ in 0..30 {
            g.record_success(None);
        }
        assert_eq!(g.current_delay(), Duration::from_millis(300));
    }

    #[test]
    fn error_increases_delay_and_resets_streak() {
        let mut g = governor(1000, 300, 5000);
        g.record_success(None);
        g.record_success(None);
        g.record_error();
        assert_eq!(g.current_delay(), Duration::from_millis(1500));

        // Streak restarted: two more successes are not enough to speed up.
        g.record_success(None);
        g.record_success(None);
        assert_eq!(g.current_delay(), Duration::from_millis(1500));
        assert_eq!(g.errors(), 1);
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let mut g = governor(4000, 300, 5000);
        g.record_error();
        g.record_error();
        assert_eq!(g.current_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn next_delay_within_jitter_band() {
        let g = governor(1000, 300, 5000);
        for _ in 0..200 {
            let d = g.next_delay();
            assert!(d >= Duration::from_millis(800), "{d:?} below band");
            assert!(d <= Duration::from_millis(1200), "{d:?} above band");
        }
    }

    #[test]
    fn break_delay_is_longer() {
        let g = governor(1000, 300, 5000);
        for _ in 0..200 {
            let d = g.break_delay();
            assert!(d >= Duration::from_millis(1200));
            assert!(d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn keeps_last_ten_latencies() {
        let mut g = governor(1000, 300, 5000);
        assert!(g.average_latency().is_none());
        for ms in 1..=12 {
            g.record_success(Some(Duration::from_millis(ms * 100)));
        }
        // Window holds 300..=1200 ms.
        assert_eq!(g.average_latency(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn zero_bounds_give_zero_delays() {
        let mut g = governor(0, 0, 0);
        g.record_error();
        assert_eq!(g.next_delay(), Duration::ZERO);
        assert_eq!(g.break_delay(), Duration::ZERO);
    }
}
