//! Logging and tracing infrastructure for pepatch.
//!
//! Structured logging through the tracing crate, filtered by `RUST_LOG`
//! (default `info`), in either human-readable or JSON form.

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// This should be called once at program startup.
/// Subsequent calls are ignored.
pub fn init_tracing() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(false);

        // A subscriber installed by an embedding application wins.
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        info!("pepatch tracing initialized");
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        info!("pepatch tracing initialized (JSON mode)");
    });
}

/// Macro for logging and returning errors
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!(error = %e, "Operation failed");
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, message = $msg, "Operation failed");
        e
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, warn};

    #[test]
    fn test_init_tracing_once() {
        // Should be callable multiple times without panic
        init_tracing();
        init_tracing();
        init_tracing_json();
    }

    #[test]
    fn test_structured_logging() {
        init_tracing();
        debug!(offset = 0x1000u64, "Scanning");
        warn!(path = %"target.dll", "Unexpected number of signatures");
    }

    #[test]
    fn test_log_error_returns_value() {
        init_tracing();
        let err = log_error!(crate::error::PatchError::Signing("boom".into()));
        assert_eq!(err.to_string(), "Signing failed: boom");
        let err = log_error!(std::io::Error::other("disk"), "writing word");
        assert_eq!(err.to_string(), "disk");
    }
}
