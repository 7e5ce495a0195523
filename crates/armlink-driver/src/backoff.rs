//! 重试退避
//!
//! 指数退避：`delay(n) = min(base * factor^(n-1), cap)`，`n` 从 1 开始。
//! 默认 100ms / 200ms / 400ms / 800ms / 1000ms ...

use crate::config::LinkConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    factor: u32,
    cap_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, factor: u32, cap_ms: u64) -> Self {
        Self {
            base_ms,
            factor,
            cap_ms,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            config.backoff_base_ms,
            config.backoff_factor,
            config.backoff_cap_ms,
        )
    }

    /// 第 `attempt` 次失败之后的等待时间（1-based，0 表示无需等待）
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt - 1;
        let multiplier = (self.factor as u64).checked_pow(exponent).unwrap_or(u64::MAX);
        let delay_ms = self.base_ms.saturating_mul(multiplier).min(self.cap_ms);
        Duration::from_millis(delay_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay(6), Duration::from_millis(1000));
    }

    #[test]
    fn test_no_overflow_on_large_attempts() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_factor_one_is_constant() {
        let backoff = Backoff::new(50, 1, 1000);
        assert_eq!(backoff.delay(1), Duration::from_millis(50));
        assert_eq!(backoff.delay(10), Duration::from_millis(50));
    }
}
