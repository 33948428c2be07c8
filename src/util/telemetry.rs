//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Initialize tracing. Callers may install their own subscriber; this helper
/// installs an env-filtered `fmt` subscriber if none is set. `LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
}

/// Trim an error message to its first line, capped for breadcrumbs and logs.
#[must_use]
pub fn human_error(err: &dyn std::fmt::Display) -> String {
    let text = err.to_string();
    let first = text.lines().next().unwrap_or_default().trim();
    first.chars().take(220).collect()
}
