//! Logging front-end shared by the migration metadata crates.
//!
//! Output goes to stderr through `emit_term` and is controlled by the
//! `MMA_META_LOG` environment variable:
//! - `off` (default): nothing is emitted
//! - `error`, `warn`, `info`, `debug`: minimum level to emit
//!
//! Call sites use the re-exported macros with emit's structured syntax,
//! e.g. `diagnostics::info!("job {key} reset", key: key.to_string())`.

use std::sync::Once;

// Re-export emit so the macros resolve from dependent crates
pub use emit;

/// Name of the environment variable that selects the log level.
pub const LOG_ENV_VAR: &str = "MMA_META_LOG";

static INIT: Once = Once::new();

/// Parse a `MMA_META_LOG` value. `None` means logging is disabled.
///
/// Unknown values fall back to `Info`; the second element reports whether
/// the fallback was taken so the caller can complain about it.
#[must_use]
pub fn parse_level(value: &str) -> (Option<emit::Level>, bool) {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => (None, false),
        "error" => (Some(emit::Level::Error), false),
        "warn" => (Some(emit::Level::Warn), false),
        "info" => (Some(emit::Level::Info), false),
        "debug" => (Some(emit::Level::Debug), false),
        _ => (Some(emit::Level::Info), true),
    }
}

/// Initialize diagnostics from `MMA_META_LOG`.
///
/// Safe to call any number of times; only the first call has an effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV_VAR).unwrap_or_default();
        let (level, unknown) = parse_level(&raw);
        let Some(level) = level else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if unknown {
            emit::warn!("unknown {var} value {value}, using info", var: LOG_ENV_VAR, value: raw);
        }

        // The runtime lives for the rest of the process
        std::mem::forget(rt);
    });
}

/// Routine operations: jobs created, restarted, removed.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Internal detail: record writes, lock acquisition, transitions.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Something odd but recoverable, e.g. ignored input.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures surfaced to the caller.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
