//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide tracing/logging.
///
/// Output format follows `LOG_FORMAT` (`json` by default, `pretty` for humans).
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;
