use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record, set_logger, set_max_level};

use crate::time::get_millis;

pub struct Logger;

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let (color, letter) = match record.level() {
            Level::Error => (31, 'E'), // Red
            Level::Warn => (93, 'W'),  // BrightYellow
            Level::Info => (32, 'I'),  // Green
            Level::Debug => (36, 'D'), // Cyan
            Level::Trace => (90, 'V'), // BrightBlack
        };
        let mut stderr = std::io::stderr().lock();
        // nowhere left to report a failed write
        let _ = writeln!(
            stderr,
            "\u{1B}[{}m{} ({}) {}: {}\u{1B}[0m",
            color,
            letter,
            get_millis(),
            record.target(),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the kernel logger. Later calls keep the logger that is already installed.
pub fn init() {
    static LOGGER: Logger = Logger;
    if set_logger(&LOGGER).is_ok() {
        set_max_level(if cfg!(debug_assertions) { LevelFilter::Debug } else { LevelFilter::Info });
    }
}

/// Improved debug macro,
/// only compiled in debug mode.
#[macro_export]
macro_rules! debug_ex {
    // debug!(target: "my_target", key1 = 42, key2 = true; "a {} event", "log")
    // debug!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            use log::{log,Level};
            log!(target: $target, Level::Debug, $($arg)+)
        }
    };

    // debug!("a {} event", "log")
    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            use log::{log,Level};
            log!(Level::Debug, $($arg)+)
        }
    }
}
