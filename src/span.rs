//! Defines a [`Span`] which is used to represent a region of a program
//! listing.

use std::ops::{Index, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub m: usize,
    pub n: usize,
}

impl Span {
    pub fn new(m: usize, n: usize) -> Self {
        Self { m, n }
    }

    pub fn len(self) -> usize {
        self.n - self.m
    }

    /// Shifts the span right by the given number of bytes.
    pub fn offset(self, by: usize) -> Self {
        Self {
            m: self.m + by,
            n: self.n + by,
        }
    }
}

impl Index<Span> for str {
    type Output = str;

    fn index(&self, span: Span) -> &Self::Output {
        let Span { m, n } = span;
        &self[m..n]
    }
}

impl From<Range<usize>> for Span {
    fn from(r: Range<usize>) -> Self {
        Self {
            m: r.start,
            n: r.end,
        }
    }
}
