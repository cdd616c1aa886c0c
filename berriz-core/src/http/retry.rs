use std::time::Duration;

use rand::Rng;

/// Statuses worth retrying: transient server errors plus the auth statuses,
/// which get a token refresh before the next attempt.
const RETRYABLE_STATUS: [u16; 7] = [400, 401, 403, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: f64,
    pub max_delay: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 0.25,
            max_delay: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUS.contains(&status)
    }

    /// `min(max_delay, base · 2^attempt)`, jittered ±50%.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self.base_delay * f64::powi(2.0, attempt as i32);
        let capped = exp.min(self.max_delay);
        let factor = rand::thread_rng().gen_range(0.5..=1.5);
        Duration::from_secs_f64(capped * factor)
    }

    /// Deterministic midpoint, used by tests and for logging.
    pub fn nominal_delay(&self, attempt: usize) -> Duration {
        let exp = self.base_delay * f64::powi(2.0, attempt as i32);
        Duration::from_secs_f64(exp.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_delays_follow_exponential_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_secs_f64(0.25));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs_f64(0.5));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs_f64(1.0));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs_f64(2.0));
        assert_eq!(policy.nominal_delay(9), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn jittered_delay_stays_within_half_band() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let nominal = policy.nominal_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let jittered = policy.delay_for(attempt).as_secs_f64();
                assert!(jittered >= nominal * 0.5 - f64::EPSILON);
                assert!(jittered <= nominal * 1.5 + f64::EPSILON);
            }
        }
    }

    #[test]
    fn retryable_statuses() {
        for status in [400, 401, 403, 500, 502, 503, 504] {
            assert!(RetryPolicy::is_retryable_status(status));
        }
        for status in [404, 200, 301, 418] {
            assert!(!RetryPolicy::is_retryable_status(status));
        }
    }
}
