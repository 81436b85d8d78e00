//! Turns arbitrary byte writes into discrete text lines.
//!
//! [`LineFramer`] is an [`io::Write`] adapter. Every complete line found in
//! the buffered-plus-new bytes is handed to a [`LineSink`] with its terminator
//! removed; an incomplete trailing fragment is kept until more bytes arrive or
//! the framer is finished.

use std::borrow::Cow;
use std::io::{self, Write};

use once_cell::sync::Lazy;
use regex::Regex;

/// Hidden console annotations: `ESC[8mha:<payload>ESC[0m`.
static CONSOLE_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[8mha:[^\x1b]*\x1b\[0m").unwrap_or_else(|_| unreachable!()));

/// Removes embedded console annotations from a line.
#[must_use]
pub fn strip_console_notes(line: &str) -> Cow<'_, str> {
    if !line.contains('\x1b') {
        return Cow::Borrowed(line);
    }
    CONSOLE_NOTE.replace_all(line, "")
}

/// Downstream consumer of framed lines.
pub trait LineSink {
    /// Accepts one complete line, terminator removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be forwarded.
    fn accept_line(&mut self, line: &str) -> io::Result<()>;

    /// Flushes anything the sink buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LineSink + ?Sized> LineSink for &mut S {
    fn accept_line(&mut self, line: &str) -> io::Result<()> {
        (**self).accept_line(line)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<S: LineSink + ?Sized> LineSink for Box<S> {
    fn accept_line(&mut self, line: &str) -> io::Result<()> {
        (**self).accept_line(line)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Collects lines in memory.
impl LineSink for Vec<String> {
    fn accept_line(&mut self, line: &str) -> io::Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}

/// Splits a byte stream on `\n`, `\r\n` and bare `\r`.
///
/// Dropping the framer finishes it, so a trailing fragment is never lost.
#[derive(Debug)]
pub struct LineFramer<S: LineSink> {
    /// Always `Some` until `into_inner` takes it.
    sink: Option<S>,
    pending: Vec<u8>,
    /// Last byte seen was `\r`; a following `\n` belongs to it.
    after_cr: bool,
    finished: bool,
}

impl<S: LineSink> LineFramer<S> {
    /// Creates a framer feeding `sink`.
    pub const fn new(sink: S) -> Self {
        Self {
            sink: Some(sink),
            pending: Vec::new(),
            after_cr: false,
            finished: false,
        }
    }

    /// Returns the downstream sink.
    pub fn sink(&self) -> &S {
        self.sink.as_ref().unwrap_or_else(|| unreachable!())
    }

    /// Returns the downstream sink mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        self.sink.as_mut().unwrap_or_else(|| unreachable!())
    }

    /// Returns the bytes of the incomplete trailing line.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Emits the trailing fragment, if any, and flushes the sink.
    ///
    /// Further calls are no-ops until more bytes are written.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink rejects the final line.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.pending.is_empty() {
            self.emit()?;
        }
        self.sink_mut().flush()
    }

    /// Finishes the framer and returns the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink rejects the final line.
    pub fn into_inner(mut self) -> io::Result<S> {
        self.finish()?;
        Ok(self.sink.take().unwrap_or_else(|| unreachable!()))
    }

    fn emit(&mut self) -> io::Result<()> {
        let bytes = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&bytes);
        let line = strip_console_notes(&text);
        self.sink_mut().accept_line(&line)
    }
}

impl<S: LineSink> Write for LineFramer<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        if !rest.is_empty() {
            self.finished = false;
        }

        if self.after_cr && !rest.is_empty() {
            self.after_cr = false;
            if rest[0] == b'\n' {
                rest = &rest[1..];
            }
        }

        while let Some(pos) = rest.iter().position(|&b| b == b'\n' || b == b'\r') {
            self.pending.extend_from_slice(&rest[..pos]);
            self.emit()?;

            let is_cr = rest[pos] == b'\r';
            rest = &rest[pos + 1..];
            if is_cr {
                match rest.first() {
                    Some(b'\n') => rest = &rest[1..],
                    Some(_) => {}
                    None => {
                        self.after_cr = true;
                        break;
                    }
                }
            }
        }

        self.pending.extend_from_slice(rest);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink_mut().flush()
    }
}

impl<S: LineSink> Drop for LineFramer<S> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            let _ = self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn frame(chunks: &[&[u8]]) -> Vec<String> {
        let mut framer = LineFramer::new(Vec::new());
        for chunk in chunks {
            framer.write_all(chunk).expect("write");
        }
        framer.into_inner().expect("finish")
    }

    #[test_case(b"a\nb\n", &["a", "b"] ; "lf")]
    #[test_case(b"a\r\nb\r\n", &["a", "b"] ; "crlf")]
    #[test_case(b"a\rb\r", &["a", "b"] ; "bare cr")]
    #[test_case(b"a\n\nb\n", &["a", "", "b"] ; "empty line kept")]
    #[test_case(b"tail", &["tail"] ; "fragment emitted on finish")]
    #[test_case(b"", &[] ; "nothing")]
    fn frames_single_write(input: &[u8], expected: &[&str]) {
        assert_eq!(frame(&[input]), expected);
    }

    #[test]
    fn line_split_across_writes_emitted_once() {
        assert_eq!(frame(&[b"hel", b"lo\nwor", b"ld\n"]), vec!["hello", "world"]);
    }

    #[test]
    fn crlf_split_across_writes_is_one_terminator() {
        assert_eq!(frame(&[b"one\r", b"\ntwo\r", b"\n"]), vec!["one", "two"]);
    }

    #[test]
    fn lone_lf_after_cr_consumed_once() {
        assert_eq!(frame(&[b"one\r", b"\n", b"\ntwo"]), vec!["one", "", "two"]);
    }

    #[test]
    fn cr_then_empty_write_then_lf() {
        assert_eq!(frame(&[b"one\r", b"", b"\ntwo"]), vec!["one", "two"]);
    }

    #[test]
    fn flush_does_not_emit_fragment() {
        let mut framer = LineFramer::new(Vec::new());
        framer.write_all(b"partial").expect("write");
        framer.flush().expect("flush");
        assert!(framer.sink().is_empty());
        assert_eq!(framer.pending(), b"partial");

        framer.finish().expect("finish");
        assert_eq!(framer.sink(), &vec!["partial".to_string()]);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut framer = LineFramer::new(Vec::new());
        framer.write_all(b"x").expect("write");
        framer.finish().expect("finish");
        framer.finish().expect("finish again");
        assert_eq!(framer.sink().len(), 1);
    }

    #[test]
    fn bytes_after_finish_are_emitted_by_next_finish() {
        let mut framer = LineFramer::new(Vec::new());
        framer.write_all(b"first").expect("write");
        framer.finish().expect("finish");
        framer.write_all(b"late").expect("write after finish");
        framer.finish().expect("finish again");
        assert_eq!(framer.sink(), &vec!["first".to_string(), "late".to_string()]);
    }

    #[derive(Clone, Default)]
    struct SharedLines(std::rc::Rc<std::cell::RefCell<Vec<String>>>);

    impl LineSink for SharedLines {
        fn accept_line(&mut self, line: &str) -> io::Result<()> {
            self.0.borrow_mut().push(line.to_string());
            Ok(())
        }
    }

    #[test]
    fn drop_emits_trailing_fragment() {
        let lines = SharedLines::default();
        {
            let mut framer = LineFramer::new(lines.clone());
            framer.write_all(b"first\nBUILD FAILED").expect("write");
        }
        assert_eq!(*lines.0.borrow(), vec!["first", "BUILD FAILED"]);
    }

    #[test]
    fn drop_after_into_inner_emits_nothing_twice() {
        let lines = SharedLines::default();
        let mut framer = LineFramer::new(lines.clone());
        framer.write_all(b"tail").expect("write");
        drop(framer.into_inner().expect("finish"));
        assert_eq!(*lines.0.borrow(), vec!["tail"]);
    }

    #[test]
    fn strips_console_notes() {
        let line = "before\x1b[8mha:AAAAdB+LCAAAAAAAAP9b\x1b[0mafter";
        assert_eq!(frame(&[format!("{line}\n").as_bytes()]), vec!["beforeafter"]);
    }

    #[test]
    fn keeps_plain_ansi_colors() {
        let line = "\x1b[31mred\x1b[0m";
        assert_eq!(strip_console_notes(line), line);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let lines = frame(&[b"ok \xff\xfe bytes\n"]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[test]
    fn multibyte_char_split_across_writes() {
        let bytes = "héllo\n".as_bytes();
        assert_eq!(frame(&[&bytes[..2], &bytes[2..]]), vec!["héllo"]);
    }

    fn expected_lines(input: &str) -> Vec<String> {
        let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
        let mut lines: Vec<String> = normalized.split('\n').map(str::to_string).collect();
        if lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        lines
    }

    proptest! {
        #[test]
        fn prop_chunking_never_loses_or_duplicates(
            input in "[a-cé \r\n]{0,64}",
            cuts in proptest::collection::vec(0usize..128, 0..6),
        ) {
            let bytes = input.as_bytes();
            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
            points.sort_unstable();

            let mut framer = LineFramer::new(Vec::new());
            let mut start = 0;
            for point in points {
                framer.write_all(&bytes[start..point]).expect("write");
                start = point;
            }
            framer.write_all(&bytes[start..]).expect("write");
            let lines = framer.into_inner().expect("finish");

            prop_assert_eq!(lines, expected_lines(&input));
        }
    }
}
