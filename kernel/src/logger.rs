//! Serial-backed implementation of the `log` facade.
//!
//! The teacher depends on `log` but primarily prints through `println!`; this
//! core makes `log` the single front end for diagnostics, with every
//! subsystem tagged the way `original_source/`'s `serial_puts("[tag] ...")`
//! convention tags its own output, so log lines read the same as the
//! original's serial trace.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::serial_println;

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial_println!("[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the serial logger as the global `log` backend. Idempotent: a
/// second call is a harmless no-op error from `log::set_logger`, swallowed
/// since bring-up only ever calls this once.
pub fn init() {
    log::set_logger(&LOGGER).ok();
    log::set_max_level(LevelFilter::Trace);
}
