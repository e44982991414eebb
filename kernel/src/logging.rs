//! `log` facade backed by the serial collaborator.
//!
//! Installed once via [`log::set_logger`] during early boot, before the
//! frame allocator or scheduler come up, so their own `init()` calls have
//! somewhere to log to. Every record is written straight to COM1 through
//! [`crate::serial_println`] -- there's no in-memory ring buffer or
//! deferred draining to worry about losing on a panic.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::serial_println!("[{}] {}", level, record.args());
    }

    fn flush(&self) {}
}

/// `Trace` in debug builds so subsystem bring-up is fully visible while
/// working on the kernel, `Info` in release so routine operation doesn't
/// flood COM1.
#[cfg(debug_assertions)]
fn max_level() -> LevelFilter {
    LevelFilter::Trace
}

#[cfg(not(debug_assertions))]
fn max_level() -> LevelFilter {
    LevelFilter::Info
}

/// Install the serial logger. Must run once, before any other subsystem's
/// `init()` so their log lines aren't silently dropped.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(max_level()))
        .expect("logging::init() called more than once");
}
