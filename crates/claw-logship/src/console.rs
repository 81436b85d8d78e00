//! The decorated console stream a build writes to.
//!
//! [`ConsoleTee`] forwards raw bytes to the real console and, in parallel,
//! frames them into lines, masks secrets and ships the lines.

use std::io::{self, Write};

use crate::framer::{LineFramer, LineSink};
use crate::redact::{Redactor, RedactingSink};
use crate::writer::ShippingWriter;

/// Prefix put on shipped stderr lines unless configured otherwise.
pub const DEFAULT_STDERR_PREFIX: &str = "ERROR: ";

/// Which build stream a tee decorates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error; shipped lines carry the stderr prefix.
    Stderr,
    /// A single merged stream.
    #[default]
    Combined,
}

#[derive(Debug)]
struct TeeSink<W> {
    console: W,
    mask_console: bool,
    prefix: Option<String>,
    writer: ShippingWriter,
}

impl<W: Write> LineSink for TeeSink<W> {
    fn accept_line(&mut self, line: &str) -> io::Result<()> {
        if self.mask_console {
            self.console.write_all(line.as_bytes())?;
            self.console.write_all(b"\n")?;
        }
        match &self.prefix {
            Some(prefix) if !line.is_empty() => self.writer.write(&format!("{prefix}{line}")),
            _ => self.writer.write(line),
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()
    }
}

/// Console stream that also ships every line.
///
/// Console write errors are returned to the caller; shipping errors never are.
/// Dropping the tee ships a trailing unterminated line.
#[derive(Debug)]
pub struct ConsoleTee<W: Write> {
    framer: LineFramer<RedactingSink<TeeSink<W>>>,
}

impl<W: Write> ConsoleTee<W> {
    /// Decorates `console` for the given stream.
    pub fn new(console: W, writer: ShippingWriter, redactor: Redactor, stream: StreamKind) -> Self {
        let prefix = (stream == StreamKind::Stderr).then(|| DEFAULT_STDERR_PREFIX.to_string());
        let sink = TeeSink {
            console,
            mask_console: false,
            prefix,
            writer,
        };
        Self {
            framer: LineFramer::new(RedactingSink::new(redactor, sink)),
        }
    }

    /// Sends masked lines to the console instead of the raw bytes.
    #[must_use]
    pub fn with_mask_console(mut self, mask_console: bool) -> Self {
        self.tee_mut().mask_console = mask_console;
        self
    }

    /// Replaces the stderr prefix. Has no effect on other streams.
    #[must_use]
    pub fn with_stderr_prefix(mut self, prefix: impl Into<String>) -> Self {
        let tee = self.tee_mut();
        if tee.prefix.is_some() {
            let prefix = prefix.into();
            tee.prefix = (!prefix.is_empty()).then_some(prefix);
        }
        self
    }

    /// Returns the shipping writer.
    pub fn writer(&self) -> &ShippingWriter {
        &self.framer.sink().inner().writer
    }

    /// Returns true if the console receives masked lines.
    pub fn masks_console(&self) -> bool {
        self.framer.sink().inner().mask_console
    }

    /// Emits the trailing partial line and flushes the console.
    ///
    /// # Errors
    ///
    /// Returns an error if the console rejects the final write.
    pub fn finish(&mut self) -> io::Result<()> {
        self.framer.finish()
    }

    /// Finishes the stream and returns the console and the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the console rejects the final write.
    pub fn into_parts(self) -> io::Result<(W, ShippingWriter)> {
        let tee = self.framer.into_inner()?.into_inner();
        Ok((tee.console, tee.writer))
    }

    fn tee_mut(&mut self) -> &mut TeeSink<W> {
        self.framer.sink_mut().inner_mut()
    }
}

impl<W: Write> Write for ConsoleTee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tee = self.tee_mut();
        if !tee.mask_console {
            tee.console.write_all(buf)?;
        }
        self.framer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.framer.flush()
    }
}
