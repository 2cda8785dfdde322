//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_or_default, env_var_or_default_bool, env_var_or_default_str};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_CA_SECRET_NAME,
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_ERROR_REQUEUE_SECS, DEFAULT_RECONCILE_TIMEOUT_SECS,
    DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_SHORT_REQUEUE_SECS, DEFAULT_VALIDITY_DAYS,
    DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Requeue after a state transition or a failed write (seconds)
    pub short_requeue_secs: u64,
    /// Requeue after an unexpected error (seconds)
    pub error_requeue_secs: u64,
    /// Requeue after a no-op reconciliation so expiry is noticed without
    /// external events (seconds). Zero waits for the next watch event instead.
    pub resync_interval_secs: u64,
    /// Upper bound on one reconciliation invocation (seconds)
    pub reconcile_timeout_secs: u64,
    /// Validity window for the root and for leaves that request none (days)
    pub default_validity_days: i64,
    /// Name of the Secret holding the persisted root CA
    pub ca_secret_name: String,
    /// Persist the root CA and reload it on restart
    pub ca_persist: bool,
    /// Namespace where the controller is deployed (root CA Secret lives here)
    pub controller_namespace: String,
    /// Exponential backoff starting value for watch stream errors (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch stream errors (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: u16,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            short_requeue_secs: DEFAULT_SHORT_REQUEUE_SECS,
            error_requeue_secs: DEFAULT_ERROR_REQUEUE_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            default_validity_days: DEFAULT_VALIDITY_DAYS,
            ca_secret_name: DEFAULT_CA_SECRET_NAME.to_string(),
            ca_persist: true,
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: 10,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let default_validity_days =
            env_var_or_default("DEFAULT_VALIDITY_DAYS", DEFAULT_VALIDITY_DAYS);

        Self {
            short_requeue_secs: env_var_or_default(
                "SHORT_REQUEUE_SECS",
                DEFAULT_SHORT_REQUEUE_SECS,
            ),
            error_requeue_secs: env_var_or_default(
                "ERROR_REQUEUE_SECS",
                DEFAULT_ERROR_REQUEUE_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            // A non-positive window would produce certificates that are born expired
            default_validity_days: if default_validity_days > 0 {
                default_validity_days
            } else {
                DEFAULT_VALIDITY_DAYS
            },
            ca_secret_name: env_var_or_default_str("CA_SECRET_NAME", DEFAULT_CA_SECRET_NAME),
            ca_persist: env_var_or_default_bool("CA_PERSIST", true),
            controller_namespace: env_var_or_default_str(
                "POD_NAMESPACE",
                DEFAULT_CONTROLLER_NAMESPACE,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                10,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get short requeue duration
    #[must_use]
    pub fn short_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.short_requeue_secs)
    }

    /// Get error requeue duration
    #[must_use]
    pub fn error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Get resync interval, `None` when disabled
    #[must_use]
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    /// Get reconcile timeout duration
    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Whether logs should be emitted as JSON lines
    #[must_use]
    pub fn json_logs(&self) -> bool {
        !self.log_format.eq_ignore_ascii_case("text")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_backoffs() {
        let config = ControllerConfig::default();
        assert_eq!(config.short_requeue_duration(), Duration::from_secs(5));
        assert_eq!(config.error_requeue_duration(), Duration::from_secs(60));
        assert_eq!(config.default_validity_days, 365);
        assert!(config.ca_persist);
        assert!(config.json_logs());
    }

    #[test]
    fn test_resync_interval_zero_disables_resync() {
        let config = ControllerConfig {
            resync_interval_secs: 0,
            ..ControllerConfig::default()
        };
        assert_eq!(config.resync_interval(), None);

        let config = ControllerConfig {
            resync_interval_secs: 120,
            ..ControllerConfig::default()
        };
        assert_eq!(config.resync_interval(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_text_log_format() {
        let config = ControllerConfig {
            log_format: "TEXT".to_string(),
            ..ControllerConfig::default()
        };
        assert!(!config.json_logs());
    }
}
