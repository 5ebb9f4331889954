use std::time::Duration;
use svcreg_core::ReconnectConfig;

/// Delay before retry number `attempt` (0-based): exponential growth from the
/// initial backoff, capped at the maximum.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(64) as i32;
    let backoff_ms = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped_ms = backoff_ms.min(config.max_backoff_ms as f64);
    Duration::from_millis(capped_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = ReconnectConfig {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
        };

        assert_eq!(calculate_backoff(0, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(4));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(8));
        assert_eq!(calculate_backoff(10, &config), Duration::from_secs(60)); // capped
        assert_eq!(calculate_backoff(u32::MAX, &config), Duration::from_secs(60));
    }

    #[test]
    fn test_constant_backoff() {
        let config = ReconnectConfig {
            initial_backoff_ms: 50,
            max_backoff_ms: 50,
            backoff_multiplier: 1.0,
        };

        assert_eq!(calculate_backoff(0, &config), Duration::from_millis(50));
        assert_eq!(calculate_backoff(7, &config), Duration::from_millis(50));
    }
}
