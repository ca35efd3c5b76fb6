//! Reclamation tuning knobs.
//!
//! Values come from the process environment and are read once, the first
//! time [`ReclaimConfig::global`] is called:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DYNAMIC_TREE_RECLAIM_THRESHOLD` | `100` | queued retirements that trigger a reclaim attempt |
//! | `DYNAMIC_TREE_RECLAIM_INTERVAL_MS` | `0` | minimum gap between two attempts (`0` = no limit) |
//!
//! Unparsable values are reported through `warn_log!` and replaced by the
//! default.

use std::env;
use std::fmt as StdFmt;
use std::sync::LazyLock;
use std::time::Duration;

use crate::tracing_helpers::warn_log;

/// Environment variable holding the retirement threshold.
pub const RECLAIM_THRESHOLD_ENV: &str = "DYNAMIC_TREE_RECLAIM_THRESHOLD";

/// Environment variable holding the minimum reclaim interval in milliseconds.
pub const RECLAIM_INTERVAL_ENV: &str = "DYNAMIC_TREE_RECLAIM_INTERVAL_MS";

/// Default number of queued retirements before a reclaim attempt.
pub const DEFAULT_RECLAIM_THRESHOLD: usize = 100;

static GLOBAL_CONFIG: LazyLock<ReclaimConfig> = LazyLock::new(ReclaimConfig::from_env);

// ============================================================================
//  ConfigError
// ============================================================================

/// Errors produced while reading configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The variable is set but is not a non-negative integer.
    InvalidNumber {
        /// Name of the offending variable.
        var: &'static str,
        /// Raw value found in the environment.
        value: String,
    },
}

impl StdFmt::Display for ConfigError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::InvalidNumber { var, value } => {
                write!(f, "{var}={value:?} is not a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
//  ReclaimConfig
// ============================================================================

/// Configuration for the epoch reclaim manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimConfig {
    /// Queue length at which `retire` triggers a reclaim attempt.
    /// Clamped to at least 1.
    pub reclaim_threshold: usize,

    /// Minimum time between two rate-limited reclaim attempts.
    pub min_reclaim_interval: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            reclaim_threshold: DEFAULT_RECLAIM_THRESHOLD,
            min_reclaim_interval: Duration::ZERO,
        }
    }
}

impl ReclaimConfig {
    /// The process-wide configuration, read from the environment once.
    #[must_use]
    pub fn global() -> Self {
        *GLOBAL_CONFIG
    }

    /// Build a config from the current environment, falling back to the
    /// default for unset or invalid variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Invalid values are logged and replaced with the default; use
    /// [`ReclaimConfig::try_from_lookup`] to observe the error instead.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let reclaim_threshold = match parse_var(RECLAIM_THRESHOLD_ENV, &lookup) {
            Ok(Some(n)) => usize::try_from(n).unwrap_or(usize::MAX),
            Ok(None) => defaults.reclaim_threshold,
            Err(_err) => {
                warn_log!(error = %_err, "ignoring invalid reclaim threshold");
                defaults.reclaim_threshold
            }
        };

        let min_reclaim_interval = match parse_var(RECLAIM_INTERVAL_ENV, &lookup) {
            Ok(Some(ms)) => Duration::from_millis(ms),
            Ok(None) => defaults.min_reclaim_interval,
            Err(_err) => {
                warn_log!(error = %_err, "ignoring invalid reclaim interval");
                defaults.min_reclaim_interval
            }
        };

        Self {
            reclaim_threshold: reclaim_threshold.max(1),
            min_reclaim_interval,
        }
    }

    /// Strict variant of [`ReclaimConfig::from_lookup`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNumber`] for the first variable that is
    /// set but not a non-negative integer.
    pub fn try_from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let reclaim_threshold = parse_var(RECLAIM_THRESHOLD_ENV, &lookup)?
            .map_or(defaults.reclaim_threshold, |n| {
                usize::try_from(n).unwrap_or(usize::MAX)
            });
        let min_reclaim_interval = parse_var(RECLAIM_INTERVAL_ENV, &lookup)?
            .map_or(defaults.min_reclaim_interval, Duration::from_millis);

        Ok(Self {
            reclaim_threshold: reclaim_threshold.max(1),
            min_reclaim_interval,
        })
    }

    /// Replace the retirement threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.reclaim_threshold = threshold.max(1);
        self
    }

    /// Replace the minimum reclaim interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.min_reclaim_interval = interval;
        self
    }
}

fn parse_var<F>(var: &'static str, lookup: &F) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };

    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber { var, value: raw })
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ReclaimConfig::from_lookup(lookup_from(&[]));

        assert_eq!(config, ReclaimConfig::default());
        assert_eq!(config.reclaim_threshold, 100);
        assert_eq!(config.min_reclaim_interval, Duration::ZERO);
    }

    #[test]
    fn test_reads_both_variables() {
        let config = ReclaimConfig::from_lookup(lookup_from(&[
            (RECLAIM_THRESHOLD_ENV, "16"),
            (RECLAIM_INTERVAL_ENV, " 250 "),
        ]));

        assert_eq!(config.reclaim_threshold, 16);
        assert_eq!(config.min_reclaim_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_value_falls_back() {
        let config =
            ReclaimConfig::from_lookup(lookup_from(&[(RECLAIM_THRESHOLD_ENV, "lots")]));

        assert_eq!(config.reclaim_threshold, DEFAULT_RECLAIM_THRESHOLD);
    }

    #[test]
    fn test_strict_lookup_reports_error() {
        let err = ReclaimConfig::try_from_lookup(lookup_from(&[(RECLAIM_INTERVAL_ENV, "-5")]))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                var: RECLAIM_INTERVAL_ENV,
                value: "-5".to_string(),
            }
        );
        assert_eq!(
            format!("{err}"),
            "DYNAMIC_TREE_RECLAIM_INTERVAL_MS=\"-5\" is not a non-negative integer"
        );
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let config = ReclaimConfig::from_lookup(lookup_from(&[(RECLAIM_THRESHOLD_ENV, "0")]));
        assert_eq!(config.reclaim_threshold, 1);

        let config = ReclaimConfig::default().with_threshold(0);
        assert_eq!(config.reclaim_threshold, 1);
    }

    #[test]
    fn test_global_is_stable() {
        assert_eq!(ReclaimConfig::global(), ReclaimConfig::global());
    }
}
