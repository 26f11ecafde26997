//! Tracing subscriber setup for the broker and tunnel commands.
//!
//! Level conventions:
//! - ERROR: the command cannot continue (bind failure, broker unreachable)
//! - WARN: a single stream or request failed and was dropped
//! - INFO: channel lifecycle and listener start/stop
//! - DEBUG: per-message traffic and stream open/close
//!
//! `RUST_LOG` picks the filter, `info` when unset.

use rendezvous_config::LogFormat;
use tracing_subscriber::EnvFilter;

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Human readable output on stderr.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter("info"))
        .with_writer(std::io::stderr)
        .init();
}

/// One JSON object per event, for log collectors.
pub fn init_json() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(default_filter("info"))
        .with_writer(std::io::stderr)
        .init();
}

/// Safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(default_filter("debug"))
        .with_test_writer()
        .try_init();
}

/// Pick the format: an explicit choice wins, then `RUST_LOG_FORMAT=json`,
/// then the configured one.
pub fn resolve_format(explicit: Option<LogFormat>, configured: LogFormat) -> LogFormat {
    if let Some(format) = explicit {
        return format;
    }
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        return LogFormat::Json;
    }
    configured
}

pub fn init_with(format: LogFormat) {
    match format {
        LogFormat::Text => init(),
        LogFormat::Json => init_json(),
    }
}
