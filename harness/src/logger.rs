use slog::{o, Drain, Logger};
use slog_envlogger::LogBuilder;

/// Compact synchronous logger; quiet unless `RUST_LOG` asks for more.
pub fn build_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::CompactFormat::new(decorator).build();
    let drain = std::sync::Mutex::new(drain).fuse();

    let mut builder = LogBuilder::new(drain);
    builder = builder.filter(None, slog::FilterLevel::Warning);

    if let Ok(s) = std::env::var("RUST_LOG") {
        builder = builder.parse(&s);
    }
    let drain = builder.build();

    Logger::root(drain, o!())
}
