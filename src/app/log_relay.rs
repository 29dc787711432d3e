//! Log relay: carries log lines from any thread to the loop.
//!
//! The logger calls [`LogRelay::offer`] for every record. Until the
//! maintenance service subscribes, lines are discarded; afterwards they
//! are buffered in a small bounded channel and the controller drains them
//! once per tick. Lines that do not fit are dropped silently (logging the
//! drop would feed the relay again).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

/// Buffered lines between two ticks.
pub const LOG_RELAY_DEPTH: usize = 8;

/// Numeric severity used on the wire (0 = none … 7 = very verbose).
pub fn level_number(level: log::Level) -> u8 {
    match level {
        log::Level::Error => 1,
        log::Level::Warn => 2,
        log::Level::Info => 3,
        log::Level::Debug => 5,
        log::Level::Trace => 6,
    }
}

/// Most verbose `log` filter needed to produce lines at wire level `level`.
pub fn level_filter(level: u8) -> log::LevelFilter {
    match level {
        0 => log::LevelFilter::Off,
        1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 | 4 => log::LevelFilter::Info,
        5 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Single-letter tag used in relayed lines.
pub fn level_letter(level: log::Level) -> char {
    match level {
        log::Level::Error => 'E',
        log::Level::Warn => 'W',
        log::Level::Info => 'I',
        log::Level::Debug => 'D',
        log::Level::Trace => 'V',
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: u8,
    pub text: String,
}

pub struct LogRelay {
    lines: Channel<CriticalSectionRawMutex, LogLine, LOG_RELAY_DEPTH>,
    subscribed: AtomicBool,
    dropped: AtomicU32,
}

impl LogRelay {
    pub const fn new() -> Self {
        Self {
            lines: Channel::new(),
            subscribed: AtomicBool::new(false),
            dropped: AtomicU32::new(0),
        }
    }

    /// Start buffering lines.
    pub fn subscribe(&self) {
        self.subscribed.store(true, Ordering::Release);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Hand a line over. Safe from any thread; never blocks.
    pub fn offer(&self, level: u8, text: String) {
        if !self.is_subscribed() {
            return;
        }
        if self.lines.try_send(LogLine { level, text }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Next buffered line. Loop thread only.
    pub fn next_line(&self) -> Option<LogLine> {
        self.lines.try_receive().ok()
    }

    /// Lines lost to a full buffer since start.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for LogRelay {
    fn default() -> Self {
        Self::new()
    }
}
