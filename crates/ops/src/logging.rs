//! Common logging setup shared by every worker process.

/// The format for logs.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Logs are written to stderr in jsonl format, which downstream log
    /// shippers forward with the proper level and field structure.
    Json,
    /// Plain text with no colors.
    Text,
}

/// Initializes logging with the given env-filter directive (for example
/// "info" or "warn,pipeline=debug"). Panics if called twice.
pub fn init_logging(filter: &str, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        // CLOSE span events give one line per span, carrying timing and
        // final field values. Emit flushes and SQL statements are spans,
        // so this is where their durations surface.
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match format {
        LogFormat::Json => {
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        LogFormat::Text => {
            builder.compact().with_ansi(false).init();
        }
    }
}
