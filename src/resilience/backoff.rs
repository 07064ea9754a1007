//! 指数退避 + 抖动
//!
//! delay = min(base * multiplier^(attempt-1) * (0.5 + rand*0.5), max)

use std::time::Duration;

use crate::config::ResilienceSection;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier: multiplier.max(1.0),
            max_ms,
        }
    }

    pub fn from_config(cfg: &ResilienceSection) -> Self {
        Self::new(
            cfg.base_retry_delay_ms,
            cfg.backoff_multiplier,
            cfg.max_retry_delay_ms,
        )
    }

    /// 第 attempt 次失败后（从 1 开始）的未抖动延迟，未截断
    pub fn unjittered_ms(&self, attempt: u32) -> f64 {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base_ms as f64 * self.multiplier.powi(exp)
    }

    /// jitter ∈ [0, 1]，抖动后落在未抖动值的 [0.5, 1.0] 倍之间，且不超过 max
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 0.5 + jitter.clamp(0.0, 1.0) * 0.5;
        let ms = (self.unjittered_ms(attempt) * factor).min(self.max_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::random::<f64>())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_never_exceeds_max() {
        let policy = BackoffPolicy::new(1000, 2.0, 30_000);
        for attempt in 1..=64 {
            for jitter in [0.0, 0.25, 0.5, 0.99, 1.0] {
                assert!(policy.delay_with_jitter(attempt, jitter) <= policy.max_delay());
            }
            assert!(policy.delay(attempt) <= policy.max_delay());
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::new(100, 2.0, 1_000_000);
        for attempt in 1..=5 {
            let raw = policy.unjittered_ms(attempt);
            let low = policy.delay_with_jitter(attempt, 0.0).as_millis() as f64;
            let high = policy.delay_with_jitter(attempt, 1.0).as_millis() as f64;
            assert!((low - raw * 0.5).abs() <= 1.0);
            assert!((high - raw).abs() <= 1.0);
        }
    }

    #[test]
    fn test_expected_delay_is_non_decreasing() {
        let policy = BackoffPolicy::new(250, 1.5, 10_000);
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let expected = policy.delay_with_jitter(attempt, 0.5);
            assert!(expected >= previous, "attempt {attempt}");
            previous = expected;
        }
    }

    #[test]
    fn test_first_attempt_uses_base() {
        let policy = BackoffPolicy::new(1000, 2.0, 30_000);
        assert_eq!(policy.unjittered_ms(1), 1000.0);
        assert_eq!(policy.unjittered_ms(3), 4000.0);
    }
}
