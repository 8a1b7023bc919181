//! Logger constructors.

use slog::{o, Drain, Logger};
use slog_async::OverflowStrategy;

/// Creates a logger printing to the terminal.
///
/// Records are formatted on a background thread. The caller blocks when that thread falls
/// behind, so no record is dropped.
pub fn term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .overflow_strategy(OverflowStrategy::Block)
        .build()
        .fuse();
    Logger::root(drain, o!("crate" => "rubeam"))
}

/// Creates a logger printing to standard error without a background thread.
pub fn stderr_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!("crate" => "rubeam"))
}
