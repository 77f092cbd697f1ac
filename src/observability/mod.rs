use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::stream::TerminationCause;

/// Map a configured log level onto a tracing filter directive.
///
/// - "DISABLED" -> `None` (no subscriber installed)
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, WARN, ERROR)
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level and format.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Log the outcome of a relayed stream.
pub fn log_stream_finished(cause: TerminationCause, relayed_bytes: u64, elapsed: Duration) {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    match cause {
        TerminationCause::InactivityTimeout | TerminationCause::UpstreamError => {
            tracing::warn!(
                cause = %cause,
                relayed_bytes,
                elapsed_ms,
                "stream force-terminated"
            );
        }
        TerminationCause::SentinelFound | TerminationCause::UpstreamClosed => {
            tracing::info!(cause = %cause, relayed_bytes, elapsed_ms, "stream finished");
        }
    }
}
