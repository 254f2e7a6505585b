use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with additive jitter and a hard ceiling.
///
/// The delay before retry `attempt` is `min(base * 2^attempt + jitter, max_delay)`
/// with `jitter` drawn from `0..max_jitter`. The attempt counter is incremented
/// before the delay is computed, so the first retry waits `2 * base + jitter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl ReconnectPolicy {
    /// Whether another retry may be scheduled after `attempts` retries already were.
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// The delay for `attempt` with an explicit jitter value.
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// The delay for `attempt` with random jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..max_jitter_ms))
        };
        self.delay_for(attempt, jitter)
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}
