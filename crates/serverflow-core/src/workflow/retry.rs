//! Retry policies for `try` tasks.
//!
//! A `RetryPolicy` is parsed once from its definition when the executor tree
//! is built and is immutable afterwards. It decides whether another attempt
//! is allowed and how long to wait before it.
//!
//! Attempts are 1-based: the first execution is attempt 1, so with
//! `max_attempts = 3` the policy allows retries after attempts 1 and 2.

use std::time::Duration;

use rand::Rng;
use serverflow_types::workflow::{BackoffDefinition, RetryPolicyDefinition};

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// How the base delay grows with each failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Constant,
    /// `delay + increment * (n - 1)`
    Linear { increment: Duration },
    /// `delay * multiplier^(n - 1)`, clamped to `max_delay`.
    Exponential {
        multiplier: f64,
        max_delay: Option<Duration>,
    },
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// `None` retries without bound.
    max_attempts: Option<u32>,
    delay: Duration,
    backoff: Backoff,
    jitter: Option<(Duration, Duration)>,
}

impl RetryPolicy {
    pub fn new(max_attempts: Option<u32>, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            delay,
            backoff,
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, from: Duration, to: Duration) -> Self {
        self.jitter = Some((from, to));
        self
    }

    /// Parse a definition, rejecting values no policy can honour.
    pub fn from_definition(def: &RetryPolicyDefinition) -> Result<Self, String> {
        if def.max_attempts == Some(0) {
            return Err("max_attempts must be >= 1".to_string());
        }

        let delay = def.delay.to_duration();
        let backoff = match &def.backoff {
            BackoffDefinition::Constant => Backoff::Constant,
            BackoffDefinition::Linear { increment } => Backoff::Linear {
                increment: increment.map(|i| i.to_duration()).unwrap_or(delay),
            },
            BackoffDefinition::Exponential {
                multiplier,
                max_delay,
            } => {
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(format!("exponential multiplier must be >= 1, got {multiplier}"));
                }
                Backoff::Exponential {
                    multiplier: *multiplier,
                    max_delay: max_delay.map(|d| d.to_duration()),
                }
            }
        };

        let mut policy = Self::new(def.max_attempts, delay, backoff);
        if let Some(jitter) = &def.jitter {
            let (from, to) = (jitter.from.to_duration(), jitter.to.to_duration());
            if from > to {
                return Err(format!("jitter range is empty: {from:?} > {to:?}"));
            }
            policy = policy.with_jitter(from, to);
        }
        Ok(policy)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether another attempt may follow the failed attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Delay before the attempt following failed attempt `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let n = attempt.max(1) - 1;
        match &self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear { increment } => self.delay.saturating_add(increment.saturating_mul(n)),
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let cap = max_delay.unwrap_or(Duration::MAX);
                let secs = self.delay.as_secs_f64() * multiplier.powi(n.min(i32::MAX as u32) as i32);
                Duration::try_from_secs_f64(secs)
                    .map(|d| d.min(cap))
                    .unwrap_or(cap)
            }
        }
    }

    /// Delay to sleep after failed attempt `attempt`: base delay plus an
    /// independent jitter sample, clamped to `limit`.
    pub fn delay_for(&self, attempt: u32, limit: Duration) -> Duration {
        let jitter = match self.jitter {
            Some((from, to)) if to > from => {
                let millis = rand::thread_rng()
                    .gen_range(from.as_millis() as u64..=to.as_millis() as u64);
                Duration::from_millis(millis)
            }
            Some((from, _)) => from,
            None => Duration::ZERO,
        };
        self.base_delay(attempt).saturating_add(jitter).min(limit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serverflow_types::workflow::{DurationSpec, JitterDefinition};

    const LIMIT: Duration = Duration::from_secs(3600);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // -------------------------------------------------------------------
    // should_retry
    // -------------------------------------------------------------------

    #[test]
    fn bounded_policy_allows_attempts_below_max() {
        let policy = RetryPolicy::new(Some(3), ms(10), Backoff::Constant);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn unlimited_policy_always_retries() {
        let policy = RetryPolicy::new(None, ms(10), Backoff::Constant);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(10_000));
    }

    // -------------------------------------------------------------------
    // Backoff arithmetic
    // -------------------------------------------------------------------

    #[test]
    fn constant_backoff() {
        let policy = RetryPolicy::new(Some(5), ms(100), Backoff::Constant);
        assert_eq!(policy.base_delay(1), ms(100));
        assert_eq!(policy.base_delay(4), ms(100));
    }

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy::new(Some(5), ms(100), Backoff::Linear { increment: ms(50) });
        assert_eq!(policy.base_delay(1), ms(100));
        assert_eq!(policy.base_delay(2), ms(150));
        assert_eq!(policy.base_delay(3), ms(200));
    }

    #[test]
    fn exponential_backoff_is_clamped() {
        let policy = RetryPolicy::new(
            None,
            ms(100),
            Backoff::Exponential {
                multiplier: 2.0,
                max_delay: Some(ms(500)),
            },
        );
        assert_eq!(policy.base_delay(1), ms(100));
        assert_eq!(policy.base_delay(2), ms(200));
        assert_eq!(policy.base_delay(3), ms(400));
        assert_eq!(policy.base_delay(4), ms(500));
        assert_eq!(policy.base_delay(200), ms(500));
    }

    #[test]
    fn exponential_overflow_saturates() {
        let policy = RetryPolicy::new(
            None,
            Duration::from_secs(1),
            Backoff::Exponential {
                multiplier: 10.0,
                max_delay: None,
            },
        );
        assert_eq!(policy.base_delay(1_000), Duration::MAX);
        assert_eq!(policy.delay_for(1_000, LIMIT), LIMIT);
    }

    #[test]
    fn jitter_stays_within_bounds_and_is_not_cumulative() {
        let policy =
            RetryPolicy::new(Some(10), ms(100), Backoff::Constant).with_jitter(ms(10), ms(20));
        for attempt in 1..10 {
            let delay = policy.delay_for(attempt, LIMIT);
            assert!(delay >= ms(110), "{delay:?}");
            assert!(delay <= ms(120), "{delay:?}");
        }
    }

    #[test]
    fn global_limit_clamps_delay() {
        let policy = RetryPolicy::new(Some(3), Duration::from_secs(60), Backoff::Constant);
        assert_eq!(policy.delay_for(1, ms(250)), ms(250));
    }

    // -------------------------------------------------------------------
    // from_definition
    // -------------------------------------------------------------------

    #[test]
    fn parses_definition_with_jitter() {
        let def = RetryPolicyDefinition {
            max_attempts: Some(3),
            delay: DurationSpec::from_millis(100),
            backoff: BackoffDefinition::Linear { increment: None },
            jitter: Some(JitterDefinition {
                from: DurationSpec::from_millis(1),
                to: DurationSpec::from_millis(5),
            }),
        };
        let policy = RetryPolicy::from_definition(&def).unwrap();
        assert_eq!(policy.max_attempts(), Some(3));
        // Linear increment defaults to the base delay.
        assert_eq!(policy.base_delay(2), ms(200));
    }

    #[test]
    fn rejects_zero_attempts() {
        let def = RetryPolicyDefinition {
            max_attempts: Some(0),
            ..RetryPolicyDefinition::default()
        };
        assert!(RetryPolicy::from_definition(&def).is_err());
    }

    #[test]
    fn rejects_shrinking_multiplier_and_inverted_jitter() {
        let shrinking = RetryPolicyDefinition {
            backoff: BackoffDefinition::Exponential {
                multiplier: 0.5,
                max_delay: None,
            },
            ..RetryPolicyDefinition::default()
        };
        assert!(RetryPolicy::from_definition(&shrinking).is_err());

        let inverted = RetryPolicyDefinition {
            jitter: Some(JitterDefinition {
                from: DurationSpec::from_millis(10),
                to: DurationSpec::from_millis(1),
            }),
            ..RetryPolicyDefinition::default()
        };
        assert!(RetryPolicy::from_definition(&inverted).is_err());
    }
}
