//! Exponential backoff for reconnecting the push channel and retrying
//! request/response calls.

use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None, // Unlimited
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
///
/// `attempt` is 1-based.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Reconnection bookkeeping for one connection.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    /// Failed attempts since the last successful connection
    pub attempts: u32,
    /// Delay chosen for the latest attempt
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failed attempt and return how long to wait before the next.
    pub fn next_delay(&mut self, config: &ReconnectConfig) -> Duration {
        self.attempts += 1;
        self.current_delay = calculate_backoff(self.attempts, config);
        self.current_delay
    }

    /// Reset state after successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = Duration::ZERO;
    }

    /// Check if max attempts exceeded.
    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .map(|max| self.attempts >= max)
            .unwrap_or(false)
    }
}

/// Retry policy for transient request failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries per request, the first one included
    pub max_attempts: u32,
    /// Delay curve between tries
    pub backoff: ReconnectConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: ReconnectConfig {
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                backoff_factor: 2.0,
                max_attempts: None,
            },
        }
    }
}

impl RetryConfig {
    /// Fail on the first error, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the `attempt`-th failed try.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, &self.backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Backoff calculation ====================

    #[test]
    fn test_calculate_backoff_exponential() {
        let config = ReconnectConfig::default();

        // 5s, 10s, 20s, 40s, 60s (capped)
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(5));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(10));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(20));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(40));
        assert_eq!(calculate_backoff(5, &config), Duration::from_secs(60)); // Capped at max
        assert_eq!(calculate_backoff(10, &config), Duration::from_secs(60));
    }

    #[test]
    fn test_calculate_backoff_custom_config() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 3.0,
            max_attempts: None,
        };

        // 1s, 3s, 9s, 10s (capped)
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(3));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(9));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(10));
    }

    // ==================== ReconnectState ====================

    #[test]
    fn test_next_delay_grows_then_resets() {
        let mut state = ReconnectState::new();
        let config = ReconnectConfig::default();

        assert_eq!(state.next_delay(&config), Duration::from_secs(5));
        assert_eq!(state.next_delay(&config), Duration::from_secs(10));
        assert_eq!(state.attempts, 2);

        state.reset();
        assert_eq!(state.attempts, 0);
        assert_eq!(state.next_delay(&config), Duration::from_secs(5));
    }

    #[test]
    fn test_exceeded_max_attempts() {
        let state = ReconnectState {
            attempts: 5,
            current_delay: Duration::from_secs(60),
        };

        let unlimited = ReconnectConfig::default();
        assert!(!state.exceeded_max_attempts(&unlimited));

        let limited = ReconnectConfig {
            max_attempts: Some(5),
            ..Default::default()
        };
        assert!(state.exceeded_max_attempts(&limited));
    }

    // ==================== RetryConfig ====================

    #[test]
    fn test_retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_after(1), Duration::from_millis(500));
        assert_eq!(retry.delay_after(2), Duration::from_secs(1));
        assert_eq!(retry.delay_after(8), Duration::from_secs(5));
        assert_eq!(RetryConfig::none().max_attempts, 1);
    }
}
