//! # Constants
//!
//! Shared constants used throughout the operator.

/// Finalizer attached to MaskinportenClient resources.
/// Blocks cluster-side garbage collection until the authority record is gone.
pub const FINALIZER: &str = "machine-identity.microscaler.io/finalizer";

/// Data key inside the app Secret that the operator owns.
/// Workload pods mount this file and sign token grants with the JWKS inside.
pub const SECRET_DATA_KEY: &str = "maskinporten-client.json";

/// Label key used to locate the per-app Secret.
pub const APP_LABEL_KEY: &str = "app";

/// Prefix on every client name this operator owns at the authority.
/// Full client names are `<prefix>-<environment>-<app-id>`.
pub const CLIENT_NAME_PREFIX: &str = "op";

/// Discovery document cache TTL (seconds)
pub const WELL_KNOWN_TTL_SECS: i64 = 300;

/// Access token cache TTL (seconds)
pub const ACCESS_TOKEN_TTL_SECS: i64 = 60;

/// Lifetime of the self-signed JWT grant sent to the token endpoint (seconds)
pub const GRANT_LIFETIME_SECS: i64 = 60;

/// Validity of generated X.509 certificates (days)
pub const CERT_VALIDITY_DAYS: i64 = 30;

/// Keys are rotated when the active certificate expires within this window (days)
pub const CERT_ROTATION_THRESHOLD_DAYS: i64 = 7;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default reconcile interval (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 600;

/// Requeue interval after reconciliation errors (seconds)
pub const ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue jitter as a fraction of the reconcile interval (applied as +/-)
pub const REQUEUE_JITTER_FRACTION: f64 = 0.10;

/// Authority retry: initial backoff interval (milliseconds)
pub const BACKOFF_INITIAL_MS: u64 = 1000;

/// Authority retry: backoff growth factor per attempt
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Authority retry: maximum single backoff interval (milliseconds)
pub const BACKOFF_MAX_INTERVAL_MS: u64 = 30_000;

/// Authority retry: maximum elapsed time across attempts (milliseconds)
pub const BACKOFF_MAX_ELAPSED_MS: u64 = 120_000;

/// Correlation header carried on every authority request
pub const RUN_ID_HEADER: &str = "X-Run-Id";
