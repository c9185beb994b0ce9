use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with jitter, shared by the task engine (spec §4.3)
/// and every external-call client (host k8s, virtualization API, external
/// IdP). Field shape matches the teacher's `golem_common::model::RetryConfig`
/// (inferred from its call sites across the workspace, e.g.
/// `golem-worker-executor/tests/api.rs`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_jitter_factor: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // spec §4.3: base=2s, cap=5m, multiplier implied by 2^attempt,
        // max_attempts=8, jitter ±20%.
        Self {
            max_attempts: 8,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
            multiplier: 2.0,
            max_jitter_factor: Some(0.2),
        }
    }
}

impl RetryConfig {
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            min_delay: Duration::from_secs(0),
            max_delay: Duration::from_secs(0),
            multiplier: 1.0,
            max_jitter_factor: None,
        }
    }

    /// `delay = min(cap, base * multiplier^attempt) * (1 ± jitter)` — the
    /// exact formula from spec §4.3, `attempt` is 0-based (the delay before
    /// the *next* retry after `attempt` failures so far).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.min_delay.as_secs_f64();
        let capped = (base * self.multiplier.powi(attempt as i32)).min(self.max_delay.as_secs_f64());

        let jittered = match self.max_jitter_factor {
            Some(factor) if factor > 0.0 => {
                let jitter = rand::rng().random_range(-factor..=factor);
                (capped * (1.0 + jitter)).max(0.0)
            }
            _ => capped,
        };

        Duration::from_secs_f64(jittered)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn delay_grows_and_is_capped() {
        let cfg = RetryConfig {
            max_jitter_factor: None,
            ..RetryConfig::default()
        };
        let d0 = cfg.delay_for_attempt(0);
        let d1 = cfg.delay_for_attempt(1);
        let d10 = cfg.delay_for_attempt(10);

        assert_eq!(d0, Duration::from_secs(2));
        assert_eq!(d1, Duration::from_secs(4));
        assert_eq!(d10, cfg.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let cfg = RetryConfig::default();
        for _ in 0..200 {
            let d = cfg.delay_for_attempt(0);
            let secs = d.as_secs_f64();
            assert!(secs >= 2.0 * 0.8 - 0.001);
            assert!(secs <= 2.0 * 1.2 + 0.001);
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let cfg = RetryConfig::default();
        assert!(cfg.should_retry(7));
        assert!(!cfg.should_retry(8));
    }
}
