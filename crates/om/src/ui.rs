//! Console sinks for command output.
//!
//! Commands never print directly. Everything goes through a [`Console`]:
//! the *output* sink (stdout) carries the command's result (tables, JSON,
//! YAML) and the *log* sink (stderr) carries progress chatter and errors.
//! Tests swap both for in-memory buffers with [`Console::buffered`].

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};

use colored::Colorize;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Shared handle to the process output streams.
#[derive(Clone)]
pub struct Console {
    out: Sink,
    err: Sink,
    color: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").field("color", &self.color).finish()
    }
}

impl Console {
    /// Console bound to the real stdout and stderr.
    #[must_use]
    pub fn stdio() -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(io::stdout()))),
            err: Arc::new(Mutex::new(Box::new(io::stderr()))),
            color: io::stderr().is_terminal(),
        }
    }

    /// Console writing into memory, plus a handle to read what was written.
    #[must_use]
    pub fn buffered() -> (Self, Captured) {
        let captured = Captured::default();
        let console = Self {
            out: Arc::new(Mutex::new(Box::new(SharedBuffer(captured.out.clone())))),
            err: Arc::new(Mutex::new(Box::new(SharedBuffer(captured.err.clone())))),
            color: false,
        };
        (console, captured)
    }

    /// Write a line to the log sink.
    pub fn log(&self, message: impl AsRef<str>) {
        write_line(&self.err, message.as_ref());
    }

    /// Write a warning to the log sink.
    pub fn warn(&self, message: impl AsRef<str>) {
        if self.color {
            write_line(&self.err, &message.as_ref().yellow().to_string());
        } else {
            write_line(&self.err, message.as_ref());
        }
    }

    /// Write an error to the log sink.
    pub fn error(&self, message: impl AsRef<str>) {
        if self.color {
            write_line(&self.err, &message.as_ref().red().to_string());
        } else {
            write_line(&self.err, message.as_ref());
        }
    }

    /// Write a line to the output sink.
    pub fn println(&self, message: impl AsRef<str>) {
        write_line(&self.out, message.as_ref());
    }

    /// Write raw text to the output sink without a trailing newline.
    pub fn print(&self, message: impl AsRef<str>) {
        let mut sink = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sink.write_all(message.as_ref().as_bytes());
        let _ = sink.flush();
    }

    /// Write raw bytes to the log sink.
    pub fn log_bytes(&self, bytes: &[u8]) {
        let mut sink = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sink.write_all(bytes);
        let _ = sink.flush();
    }

    /// `io::Write` adapter over the output sink, for renderers.
    #[must_use]
    pub fn output(&self) -> ConsoleWriter {
        ConsoleWriter(self.out.clone())
    }

    /// `io::Write` adapter over the log sink.
    #[must_use]
    pub fn diagnostics(&self) -> ConsoleWriter {
        ConsoleWriter(self.err.clone())
    }

    /// `text` painted red when the console is colored.
    #[must_use]
    pub fn red(&self, text: &str) -> String {
        if self.color {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    /// `text` painted green when the console is colored.
    #[must_use]
    pub fn green(&self, text: &str) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    /// Whether the log sink is an interactive terminal.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.color
    }
}

fn write_line(sink: &Sink, message: &str) {
    let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writeln!(sink, "{message}");
    let _ = sink.flush();
}

/// `io::Write` over one of the console sinks.
pub struct ConsoleWriter(Sink);

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// In-memory copies of what a buffered console received.
#[derive(Clone, Default)]
pub struct Captured {
    out: Arc<Mutex<Vec<u8>>>,
    err: Arc<Mutex<Vec<u8>>>,
}

impl Captured {
    /// Everything written to the output sink.
    #[must_use]
    pub fn stdout(&self) -> String {
        let bytes = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Everything written to the log sink.
    #[must_use]
    pub fn stderr(&self) -> String {
        let bytes = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
