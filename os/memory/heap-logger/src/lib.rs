//! A `log` backend that writes one line per record to standard error.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::{self, Write};
use std::sync::OnceLock;

/// Environment variable holding the maximum level, e.g. `HEAP_LOG=debug`.
pub const LEVEL_VAR: &str = "HEAP_LOG";

pub struct StderrLogger {
    max_level: LevelFilter,
}

impl StderrLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Uses the level from [`LEVEL_VAR`], or `default` if it is unset or
    /// not a level name.
    #[must_use]
    pub fn from_env(default: LevelFilter) -> Self {
        Self::new(parse_level(std::env::var(LEVEL_VAR).ok().as_deref(), default))
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Call this once during startup.
    ///
    /// # Errors
    /// If a logger was already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

        let max_level = self.max_level;
        log::set_logger(LOGGER.get_or_init(|| self))?;
        log::set_max_level(max_level);
        Ok(())
    }

    /// Format: `[LEVEL] target: message`
    fn write_record(out: &mut impl Write, record: &Record) -> io::Result<()> {
        writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Nowhere to report a failed write to stderr.
        let _ = Self::write_record(&mut io::stderr().lock(), record);
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Parses a level name (`off`, `error` .. `trace`, any case), falling back
/// to `default`.
#[must_use]
pub fn parse_level(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
