use std::cmp::max;
use std::fmt;

#[cfg(feature = "unicode")]
use unicode_width::UnicodeWidthStr;

use crate::program::Handle;
use crate::span::Span;

/// A convenient type alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while rendering or revalidating a program.
#[derive(Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    location: Option<Location>,
    listing: Option<(String, Span)>,
}

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The program is malformed: an unknown opcode, a truncated operand, a
    /// constant of the wrong kind, an unbalanced region. These point at a bug
    /// in whatever produced the program.
    Program,

    /// A binding failed while rendering, e.g. a getter or helper returned an
    /// error. Recoverable by the nearest error boundary.
    Render,

    /// A tracked cache was read while it was still computing.
    Cycle,

    /// A transaction was started while another one was still open, or
    /// committed without being started.
    Transaction,
}

/// The place in the program heap where an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// The handle of the region containing the faulting opcode.
    pub handle: Handle,
    /// The offset of the faulting opcode relative to the region start.
    pub offset: usize,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            location: None,
            listing: None,
        }
    }

    pub(crate) fn program(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Program, msg)
    }

    /// Construct a recoverable render error.
    ///
    /// This is the error that helpers, getters and error handlers should
    /// return.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Render, msg)
    }

    pub(crate) fn cycle(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle, msg)
    }

    pub(crate) fn transaction(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, msg)
    }

    pub(crate) fn format(err: crate::fmt::Error) -> Self {
        let msg = err
            .message()
            .unwrap_or_else(|| String::from("failed to format value"));
        Self::render(msg)
    }

    /// Attach a heap location, unless the error already has one.
    pub(crate) fn at(mut self, location: Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }

    /// Attach a disassembly listing and the span of the faulting opcode in
    /// it, used for the pretty `{:#}` output.
    pub(crate) fn with_listing(mut self, listing: String, span: Span) -> Self {
        if self.listing.is_none() && !listing.is_empty() {
            self.listing = Some((listing, span));
        }
        self
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message without location information.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns where in the program the error was raised, if known.
    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Whether the error must abort the render.
    ///
    /// Only [`ErrorKind::Render`] errors are routed to error boundaries.
    pub fn is_fatal(&self) -> bool {
        self.kind != ErrorKind::Render
    }
}

impl std::error::Error for Error {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.listing {
            Some((listing, span)) => fmt_pretty(&self.msg, listing, *span, f),
            None => fmt::Display::fmt(self, f),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.listing, self.location) {
            (Some((listing, span)), _) if f.alternate() => fmt_pretty(&self.msg, listing, *span, f),
            (_, Some(Location { handle, offset })) => {
                write!(
                    f,
                    "{} at offset {} of handle {}",
                    self.msg,
                    offset,
                    handle.index()
                )
            }
            _ => write!(f, "{}", self.msg),
        }
    }
}

impl From<crate::fmt::Error> for Error {
    fn from(err: crate::fmt::Error) -> Self {
        Self::format(err)
    }
}

fn fmt_pretty(msg: &str, source: &str, span: Span, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let lines: Vec<_> = source.split_terminator('\n').collect();
    let (line, col) = to_line_col(&lines, span.m);
    let width = max(1, width(&source[span]));
    let code = lines
        .get(line)
        .or_else(|| lines.last())
        .copied()
        .unwrap_or_default();

    let num = (line + 1).to_string();
    let pad = num.len();
    let pipe = "|";
    let underline = "^".repeat(width);

    write!(
        f,
        "\n \
        {0:pad$} {pipe}\n \
        {num:>} {pipe} {code}\n \
        {0:pad$} {pipe} {underline:>width$} {msg}\n",
        "",
        pad = pad,
        pipe = pipe,
        num = num,
        code = code,
        underline = underline,
        width = col + width,
        msg = msg
    )
}

fn to_line_col(lines: &[&str], offset: usize) -> (usize, usize) {
    let mut n = 0;
    for (i, line) in lines.iter().enumerate() {
        let len = line.len() + 1;
        if n + len > offset {
            return (i, width(&line[..offset - n]));
        }
        n += len;
    }
    (lines.len(), lines.last().map(|l| width(l)).unwrap_or(0))
}

#[cfg(feature = "unicode")]
fn width(s: &str) -> usize {
    s.width()
}

#[cfg(not(feature = "unicode"))]
fn width(s: &str) -> usize {
    s.chars().count()
}
