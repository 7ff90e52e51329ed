use rand::Rng;
use std::time::Duration;

use crate::jobs::error_codes::ErrorCode;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Exponent base: the n-th retry waits `unit * base^n`.
    pub base: u32,
    pub unit: Duration,
    pub max_delay: Duration,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: 2,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(15 * 60),
            jitter_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

pub fn classify_error(code: &str) -> ErrorClass {
    match ErrorCode::parse(code) {
        ErrorCode::BadPayload | ErrorCode::UnknownJobType => ErrorClass::NonRetryable,
        _ => ErrorClass::Retryable,
    }
}

/// Backoff after the `attempt_no`-th failed attempt (1-based, post-increment).
pub fn next_delay(attempt_no: u32, cfg: &RetryConfig, rng: &mut impl Rng) -> Duration {
    let attempt_no = attempt_no.max(1);

    // base^attempt_no; on overflow the cap takes over.
    let multiplier = cfg.base.max(1).checked_pow(attempt_no).unwrap_or(u32::MAX);
    let delay = cfg
        .unit
        .checked_mul(multiplier)
        .unwrap_or(cfg.max_delay)
        .min(cfg.max_delay);

    if !cfg.jitter_pct.is_finite() || cfg.jitter_pct <= 0.0 {
        return delay;
    }

    // jitter in range [-jitter_pct, +jitter_pct]
    let secs = delay.as_secs_f64();
    let jitter_range = secs * cfg.jitter_pct;
    let jittered = secs + rng.gen_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64(jittered.clamp(0.0, cfg.max_delay.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn cfg(unit_ms: u64) -> RetryConfig {
        RetryConfig {
            unit: Duration::from_millis(unit_ms),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn first_retry_waits_base_to_the_first() {
        let mut rng = StdRng::seed_from_u64(7);
        let c = cfg(1000);
        assert_eq!(next_delay(1, &c, &mut rng), Duration::from_secs(2));
        assert_eq!(next_delay(2, &c, &mut rng), Duration::from_secs(4));
        assert_eq!(next_delay(3, &c, &mut rng), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let mut rng = StdRng::seed_from_u64(7);
        let c = RetryConfig {
            max_delay: Duration::from_secs(10),
            ..cfg(1000)
        };
        assert_eq!(next_delay(4, &c, &mut rng), Duration::from_secs(10));
        assert_eq!(next_delay(200, &c, &mut rng), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(99);
        let c = RetryConfig {
            jitter_pct: 0.2,
            ..cfg(1000)
        };
        for _ in 0..100 {
            let d = next_delay(2, &c, &mut rng).as_secs_f64();
            assert!((3.2..=4.8).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn non_finite_jitter_is_ignored() {
        let mut rng = StdRng::seed_from_u64(3);
        for jitter_pct in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let c = RetryConfig {
                jitter_pct,
                ..cfg(1000)
            };
            assert_eq!(next_delay(1, &c, &mut rng), Duration::from_secs(2));
        }
    }

    #[test]
    fn payload_and_routing_errors_are_not_retried() {
        assert_eq!(classify_error("BAD_PAYLOAD"), ErrorClass::NonRetryable);
        assert_eq!(classify_error("UNKNOWN_JOB_TYPE"), ErrorClass::NonRetryable);
        assert_eq!(classify_error("TIMEOUT"), ErrorClass::Retryable);
        assert_eq!(classify_error("PANIC"), ErrorClass::Retryable);
        assert_eq!(classify_error("something new"), ErrorClass::Retryable);
    }
}
