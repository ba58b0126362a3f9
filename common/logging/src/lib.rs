//! Logging setup, consistent in shape with other lighthouse binaries: a terminal-decorated
//! `slog` drain, wrapped in `slog-async` so logging never blocks the duty runner or the
//! slashing-protection write path (§1 non-goals: "logging setup" is ambient, not redesigned).

use slog::{o, Drain, Level, Logger};

/// Builds the root logger for a binary, filtered to `level`.
///
/// `debug_level` mirrors the CLI's `--debug-level` flag (§6 CLI surface is core-relevant; the
/// concrete flag parsing lives in the binary's `cli` module).
pub fn root_logger(debug_level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, debug_level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// A logger that discards everything, for tests that don't want terminal noise.
pub fn test_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_logger_can_be_built() {
        let log = root_logger(Level::Info);
        slog::info!(log, "logger smoke test");
    }
}
