//! Logging capability handed to builder engines

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Severity of a builder log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Diagnostic detail
    Debug,
    /// Regular progress output
    Info,
    /// Something the user should look at
    Warn,
    /// The build is failing
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where a builder engine sends its output.
///
/// Engines receive a logger for the duration of one call. Every method is a
/// single emission; implementations decide whether it is buffered, printed or
/// forwarded to a remote caller.
pub trait Logger: Send + Sync {
    /// Emit one formatted line.
    fn fprintln(&self, level: Level, args: fmt::Arguments<'_>);

    /// Emit one formatted line on the logger's default output.
    fn println(&self, level: Level, args: fmt::Arguments<'_>) {
        self.fprintln(level, args);
    }

    /// Emit a line verbatim.
    fn unformatted_fprintln(&self, line: &str);

    /// Emit raw bytes verbatim, without adding a newline.
    fn unformatted_write(&self, data: &[u8]);

    /// Return whatever was buffered since the last flush.
    fn flush(&self) -> String;

    /// Short identifier, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Accumulates output in memory until flushed.
#[derive(Debug, Default)]
pub struct BufferLogger {
    buffer: Mutex<String>,
}

impl BufferLogger {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, f: impl FnOnce(&mut String)) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut buffer);
    }
}

impl Logger for BufferLogger {
    fn fprintln(&self, _level: Level, args: fmt::Arguments<'_>) {
        self.append(|buf| {
            let _ = fmt::Write::write_fmt(buf, args);
            buf.push('\n');
        });
    }

    fn unformatted_fprintln(&self, line: &str) {
        self.append(|buf| {
            buf.push_str(line);
            buf.push('\n');
        });
    }

    fn unformatted_write(&self, data: &[u8]) {
        self.append(|buf| buf.push_str(&String::from_utf8_lossy(data)));
    }

    fn flush(&self) -> String {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffer)
    }

    fn name(&self) -> &'static str {
        "bufferlogger"
    }
}

/// Forwards builder output to the process log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn fprintln(&self, level: Level, args: fmt::Arguments<'_>) {
        match level {
            Level::Debug => tracing::debug!(target: "builder", "{}", args),
            Level::Info => tracing::info!(target: "builder", "{}", args),
            Level::Warn => tracing::warn!(target: "builder", "{}", args),
            Level::Error => tracing::error!(target: "builder", "{}", args),
        }
    }

    fn unformatted_fprintln(&self, line: &str) {
        tracing::info!(target: "builder", "{}", line);
    }

    fn unformatted_write(&self, data: &[u8]) {
        tracing::info!(target: "builder", "{}", String::from_utf8_lossy(data).trim_end());
    }

    fn flush(&self) -> String {
        String::new()
    }

    fn name(&self) -> &'static str {
        "consolelogger"
    }
}

/// Sends every emission to a primary logger and a mirror.
///
/// `flush` returns the primary's buffer; the mirror is never flushed.
pub struct TeeLogger<M> {
    primary: Arc<dyn Logger>,
    mirror: M,
}

impl<M> TeeLogger<M> {
    /// Mirror everything `primary` receives into `mirror`.
    pub fn new(primary: Arc<dyn Logger>, mirror: M) -> Self {
        Self { primary, mirror }
    }
}

impl<M: fmt::Debug> fmt::Debug for TeeLogger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeLogger")
            .field("primary", &self.primary.name())
            .field("mirror", &self.mirror)
            .finish()
    }
}

impl<M: Logger> Logger for TeeLogger<M> {
    fn fprintln(&self, level: Level, args: fmt::Arguments<'_>) {
        self.primary.fprintln(level, args);
        self.mirror.fprintln(level, args);
    }

    fn unformatted_fprintln(&self, line: &str) {
        self.primary.unformatted_fprintln(line);
        self.mirror.unformatted_fprintln(line);
    }

    fn unformatted_write(&self, data: &[u8]) {
        self.primary.unformatted_write(data);
        self.mirror.unformatted_write(data);
    }

    fn flush(&self) -> String {
        self.primary.flush()
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}
