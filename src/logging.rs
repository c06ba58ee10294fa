use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,keyed_ratelimit=trace
pub fn init() {
    init_with_default("info");
}

/// Same as [`init`] but with a caller-chosen fallback directive when
/// RUST_LOG is unset.
pub fn init_with_default(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true) // eviction runs on its own task
                    .with_line_number(true),
            )
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging admission verdicts
#[macro_export]
macro_rules! rate_limit_event {
    ($limiter:expr, $key:expr, $status:expr) => {
        if $status.allowed {
            tracing::debug!(
                limiter = $limiter,
                key = $key,
                allowed = true,
                "Rate limit check"
            )
        } else {
            tracing::info!(
                limiter = $limiter,
                key = $key,
                allowed = false,
                retry_after_ms = $status.retry_after.as_millis() as u64,
                "Rate limit check"
            )
        }
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
