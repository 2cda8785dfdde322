//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Requeue interval after a persistence failure or a state transition (seconds)
pub const DEFAULT_SHORT_REQUEUE_SECS: u64 = 5;

/// Requeue interval for unexpected reconciliation errors (seconds)
pub const DEFAULT_ERROR_REQUEUE_SECS: u64 = 60;

/// Periodic resync after a no-op reconciliation (seconds), 0 disables it
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 3600;

/// Upper bound on a single reconciliation invocation (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default validity window for the root and for leaves that request none (days)
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// Default for `spec.validForDays`
pub const DEFAULT_VALID_FOR_DAYS: i64 = 365;

/// Default for `spec.renewBeforeDays`
pub const DEFAULT_RENEW_BEFORE_DAYS: i64 = 15;

/// Organization placed in the root certificate subject
pub const ROOT_ORGANIZATION: &str = "certificate-manager";

/// Common name placed in the root certificate subject
pub const ROOT_COMMON_NAME: &str = "certificate-manager-ca";

/// Country codes accepted for certificate subjects; the first one is embedded
pub const SUBJECT_COUNTRIES: [&str; 3] = ["DE", "IN", "US"];

/// Secret holding the persisted root CA
pub const DEFAULT_CA_SECRET_NAME: &str = "certificate-manager-ca";

/// Namespace the controller runs in when `POD_NAMESPACE` is unset
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "certificate-manager-system";

/// Secret data key for the PEM private key
pub const TLS_KEY: &str = "tls.key";

/// Secret data key for the PEM certificate
pub const TLS_CERT: &str = "tls.crt";

/// Secret type written for issued credentials
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Field manager and `app.kubernetes.io/managed-by` value
pub const MANAGER_NAME: &str = "certificate-manager";

/// Label marking Secrets owned by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Annotation never propagated from a Certificate to its Secret
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";
