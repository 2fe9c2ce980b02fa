//! Logger installation for the `ctxprof` binary and the test suites
//!
//! The binary starts from `[log] level` in `ctxprof.toml` (Warn when
//! absent) and raises it one step per `-v`. `RUST_LOG` directives are
//! applied on top, so single modules can still be opened up:
//!
//! ```bash
//! ctxprof -vv check perf.prof
//! RUST_LOG=tracker::context_trie=trace ctxprof inline perf.prof ...
//! ```
//!
//! What goes where:
//!
//! - `warn!` - skipped records and other input problems
//! - `info!` - load summaries, written files
//! - `debug!` - tree construction, resolver hits, inline and promote steps
//! - `trace!` - individual node moves and merges

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

use crate::config::LogSection;

const LEVELS: [LevelFilter; 6] = [
    LevelFilter::Off,
    LevelFilter::Error,
    LevelFilter::Warn,
    LevelFilter::Info,
    LevelFilter::Debug,
    LevelFilter::Trace,
];

/// Configured level raised by `verbose` steps, capped at Trace
pub fn effective_level(section: &LogSection, verbose: u8) -> LevelFilter {
    let base = section.level.filter();
    let start = LEVELS.iter().position(|level| *level == base).unwrap_or(2);
    LEVELS[(start + verbose as usize).min(LEVELS.len() - 1)]
}

/// Install the process logger at `level`, with `RUST_LOG` directives on
/// top. Returns false when a logger was already installed.
pub fn init(level: LevelFilter) -> bool {
    let mut builder = Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(buf, "[{:5}] {}: {}", record.level(), record.target(), record.args())
    });
    if let Ok(directives) = std::env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }
    builder.try_init().is_ok()
}

/// Logger for tests; safe to call from every test.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}
