//! Reconnection policy
//!
//! The default policy waits a fixed delay between consecutive attempts and
//! gives up after a bounded number of them. Exponential growth, a cap and
//! jitter are available for deployments that want them.

use std::time::Duration;

/// Default delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default number of consecutive attempts before the session is closed
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration for automatic reconnection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 keeps the delay fixed)
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
    /// Consecutive failed attempts allowed before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay between attempts
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_attempts,
            ..Default::default()
        }
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Disable reconnection; the first transport loss closes the session
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt number (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.multiplier <= 1.0 {
            return std::cmp::min(self.initial_delay, self.max_delay);
        }

        let exponent = (attempt - 1) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);

        std::cmp::min(delay, self.max_delay)
    }

    /// Apply jitter to a base delay
    pub fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 {
            return base;
        }

        let jitter_range = base.as_millis() as f64 * self.jitter;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        let adjusted_ms = (base.as_millis() as f64 + jitter).max(0.0) as u64;

        Duration::from_millis(adjusted_ms)
    }

    /// Get delay with jitter applied for a given attempt
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        self.apply_jitter(base)
    }

    /// Check whether attempt number `attempt` (1-indexed) may run
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_and_bounded() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(1), DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.delay_for_attempt(7), DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.delay_with_jitter(3), DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_exponential_delay() {
        let config = ReconnectConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));

        // Capped
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = ReconnectConfig::fixed(Duration::from_millis(1000), 3).with_jitter(0.5);
        for _ in 0..50 {
            let delay = config.delay_with_jitter(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_should_reconnect() {
        let limited = ReconnectConfig::default().with_max_attempts(3);
        assert!(limited.should_reconnect(1));
        assert!(limited.should_reconnect(3));
        assert!(!limited.should_reconnect(4));

        let disabled = ReconnectConfig::disabled();
        assert!(!disabled.should_reconnect(1));
    }
}
