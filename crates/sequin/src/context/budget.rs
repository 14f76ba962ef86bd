//! Budget policy: the token thresholds that govern eviction.
//!
//! A [`Budget`] is derived once per session from configuration and never
//! changes afterwards. The backend accepts at most `max_sequence` tokens in
//! total, of which `max_generated_tokens` are set aside for its reply:
//!
//! ```text
//! upper_bound          = max_sequence - max_generated_tokens
//! reserved_upper_bound = floor(upper_bound * reserve_fraction)
//! ```
//!
//! The context window keeps `offset + count(sequence) <= upper_bound`.

use crate::config::Config;
use crate::error::ConfigError;
use tracing::warn;

/// Derived token thresholds for one session.
///
/// # Example
///
/// ```
/// use sequin::context::budget::Budget;
///
/// let budget = Budget::new(100, 20, 5, 0.1).unwrap();
/// assert_eq!(budget.upper_bound(), 80);
/// assert_eq!(budget.reserved_upper_bound(), 8);
/// assert!(budget.fits(75));
/// assert!(!budget.fits(76));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    max_sequence: usize,
    max_generated_tokens: usize,
    offset: usize,
    reserve_fraction: f64,
    upper_bound: usize,
    reserved_upper_bound: usize,
}

impl Budget {
    /// Validate the inputs and derive the thresholds.
    pub fn new(
        max_sequence: usize,
        max_generated_tokens: usize,
        offset: usize,
        reserve_fraction: f64,
    ) -> Result<Self, ConfigError> {
        if max_sequence == 0 {
            return Err(ConfigError::Zero("context length"));
        }
        if max_generated_tokens == 0 {
            return Err(ConfigError::Zero("max_tokens"));
        }
        if max_generated_tokens >= max_sequence {
            return Err(ConfigError::NonPositiveUpperBound {
                length: max_sequence,
                max_tokens: max_generated_tokens,
                upper_bound: max_sequence as i64 - max_generated_tokens as i64,
            });
        }
        if !reserve_fraction.is_finite() || !(0.0..1.0).contains(&reserve_fraction) {
            return Err(ConfigError::Reserve(reserve_fraction));
        }

        let upper_bound = max_sequence - max_generated_tokens;
        let reserved_upper_bound = (upper_bound as f64 * reserve_fraction).floor() as usize;

        if offset >= upper_bound {
            warn!(
                "Context offset ({offset}) is not below the upper bound ({upper_bound}); \
                 every message will evict down to the system prompt"
            );
        }

        Ok(Self {
            max_sequence,
            max_generated_tokens,
            offset,
            reserve_fraction,
            upper_bound,
            reserved_upper_bound,
        })
    }

    /// Derive the budget from the `context` and `chat_completions` sections.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(
            config.context.length,
            config.chat_completions.max_tokens,
            config.context.offset,
            config.context.reserve,
        )
    }

    pub fn max_sequence(&self) -> usize {
        self.max_sequence
    }

    pub fn max_generated_tokens(&self) -> usize {
        self.max_generated_tokens
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reserve_fraction(&self) -> f64 {
        self.reserve_fraction
    }

    /// Most tokens the sequence (plus offset) may occupy.
    pub fn upper_bound(&self) -> usize {
        self.upper_bound
    }

    /// `floor(upper_bound * reserve_fraction)`; always below the upper bound.
    pub fn reserved_upper_bound(&self) -> usize {
        self.reserved_upper_bound
    }

    /// Whether a sequence costing `tokens` satisfies the offset-adjusted bound.
    pub fn fits(&self, tokens: usize) -> bool {
        self.offset.saturating_add(tokens) <= self.upper_bound
    }

    /// Tokens still available before the bound is reached.
    pub fn headroom(&self, used: usize) -> usize {
        self.upper_bound.saturating_sub(self.offset.saturating_add(used))
    }

    /// Snapshot of how much of the budget a sequence of `used` tokens takes.
    pub fn usage(&self, used: usize) -> BudgetUsage {
        let usage_pct = if self.upper_bound > 0 {
            self.offset.saturating_add(used) as f64 / self.upper_bound as f64
        } else {
            1.0
        };
        BudgetUsage {
            tokens: used,
            offset: self.offset,
            upper_bound: self.upper_bound,
            usage_pct,
        }
    }
}

/// Snapshot of budget usage at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct BudgetUsage {
    /// Tokens in the sequence.
    pub tokens: usize,
    pub offset: usize,
    pub upper_bound: usize,
    /// `(offset + tokens) / upper_bound`; above 1.0 only in the best-effort case.
    pub usage_pct: f64,
}

impl BudgetUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} tokens + {} offset ({:.0}% of {})",
            self.tokens,
            self.offset,
            self.usage_pct * 100.0,
            self.upper_bound,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_bounds() {
        let budget = Budget::new(100, 20, 5, 0.1).unwrap();
        assert_eq!(budget.upper_bound(), 80);
        assert_eq!(budget.reserved_upper_bound(), 8);
        assert_eq!(budget.offset(), 5);
    }

    #[test]
    fn defaults_from_config() {
        let budget = Budget::from_config(&Config::default()).unwrap();
        assert_eq!(budget.upper_bound(), 2048 - 512);
        assert_eq!(budget.reserved_upper_bound(), 153);
    }

    #[test]
    fn zero_reserve_gives_zero_reserved_bound() {
        let budget = Budget::new(100, 20, 0, 0.0).unwrap();
        assert_eq!(budget.reserved_upper_bound(), 0);
    }

    #[test]
    fn generated_tokens_at_or_above_length_is_fatal() {
        let err = Budget::new(512, 512, 0, 0.1).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonPositiveUpperBound { upper_bound: 0, .. }
        ));
        let err = Budget::new(100, 300, 0, 0.1).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonPositiveUpperBound {
                upper_bound: -200,
                ..
            }
        ));
    }

    #[test]
    fn zero_sizes_are_fatal() {
        assert!(matches!(
            Budget::new(0, 0, 0, 0.1),
            Err(ConfigError::Zero(_))
        ));
        assert!(matches!(
            Budget::new(100, 0, 0, 0.1),
            Err(ConfigError::Zero("max_tokens"))
        ));
    }

    #[test]
    fn reserve_outside_unit_interval_is_fatal() {
        for reserve in [1.0, 1.5, -0.1, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(Budget::new(100, 20, 0, reserve), Err(ConfigError::Reserve(_))),
                "reserve {reserve} should be rejected"
            );
        }
    }

    #[test]
    fn offset_above_bound_is_accepted() {
        let budget = Budget::new(100, 20, 90, 0.1).unwrap();
        assert!(!budget.fits(0));
        assert_eq!(budget.headroom(0), 0);
    }

    #[test]
    fn huge_offset_saturates() {
        let budget = Budget::new(100, 20, usize::MAX, 0.1).unwrap();
        assert!(!budget.fits(1));
        assert!(!budget.fits(usize::MAX));
        assert_eq!(budget.headroom(1), 0);
        assert!(budget.usage(1).usage_pct > 1.0);
    }

    #[test]
    fn fits_and_headroom() {
        let budget = Budget::new(100, 20, 5, 0.1).unwrap();
        assert!(budget.fits(75));
        assert!(!budget.fits(76));
        assert_eq!(budget.headroom(70), 5);
        assert_eq!(budget.headroom(100), 0);
    }

    #[test]
    fn usage_log_string_format() {
        let budget = Budget::new(100, 20, 0, 0.1).unwrap();
        let usage = budget.usage(40);
        assert!((usage.usage_pct - 0.5).abs() < f64::EPSILON);
        let log = usage.to_log_string();
        assert!(log.contains("40 tokens"));
        assert!(log.contains("50%"));
    }
}
