use slog::{o, Drain};
use slog_envlogger::LogBuilder;

/// Terminal logger filtered at debug level, overridable through `RUST_LOG`.
pub fn build_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    let mut builder = LogBuilder::new(drain);
    builder = builder.filter(None, slog::FilterLevel::Debug);

    if let Ok(s) = std::env::var("RUST_LOG") {
        builder = builder.parse(&s);
    }
    let drain = builder.build();

    slog::Logger::root(drain, o!("component" => "podquorum"))
}

/// Logger that drops every record.
pub fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}
