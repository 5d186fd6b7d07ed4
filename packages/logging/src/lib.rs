//! Structured, leveled, per-subsystem logging, grounded in the teacher's
//! `zwave-logging` crate (`Logger`/`ImmutableLogger` traits, `termcolor`
//! rendering, one logger struct per subsystem) but trimmed to the
//! subsystems this gateway actually has: serial, security (S0/nonce),
//! the resource directory, and the netif/Z-IP bridge.

mod channel;
mod format;

pub use channel::*;
pub use format::*;
pub use zwip_core::log::{LogPayload, Loglevel};

use std::sync::{Arc, Mutex};
use termcolor::{ColorChoice, StandardStream, WriteColor};

/// A single log record, analogous to the teacher's `LogInfo`.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub channel: Channel,
    pub level: Loglevel,
    pub payload: LogPayload,
}

/// A trait for components that can be logged to without requiring
/// exclusive access — mirrors the teacher's `ImmutableLogger`, since most
/// of our subsystems are shared across tasks behind an `Arc`.
pub trait ImmutableLogger: Send + Sync {
    fn log(&self, entry: LogEntry);
    fn log_level(&self) -> Loglevel;
}

/// The concrete sink: formats and writes to a color-capable stream behind
/// a mutex, the way the teacher's `BaseLogger` wraps a `Box<dyn WriteColor>`.
pub struct TermLogger {
    level: Loglevel,
    writer: Mutex<Box<dyn WriteColor + Send>>,
}

impl TermLogger {
    pub fn stderr(level: Loglevel) -> Arc<Self> {
        Arc::new(Self {
            level,
            writer: Mutex::new(Box::new(StandardStream::stderr(ColorChoice::Auto))),
        })
    }
}

impl ImmutableLogger for TermLogger {
    fn log(&self, entry: LogEntry) {
        if entry.level > self.level {
            return;
        }
        let rendered = format_entry(&entry);
        if let Ok(mut w) = self.writer.lock() {
            for line in rendered {
                let _ = w.set_color(&line.color);
                let _ = std::io::Write::write_all(&mut *w, line.text.as_bytes());
                let _ = std::io::Write::write_all(&mut *w, b"\n");
            }
            let _ = w.reset();
        }
    }

    fn log_level(&self) -> Loglevel {
        self.level
    }
}

/// A no-op sink, used in tests where log output would just be noise.
pub struct NullLogger;

impl ImmutableLogger for NullLogger {
    fn log(&self, _entry: LogEntry) {}
    fn log_level(&self) -> Loglevel {
        Loglevel::Error
    }
}
