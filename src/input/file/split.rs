// SPDX-License-Identifier: Apache-2.0

//! Splitting a byte range into ordered records.
//!
//! A splitter only ever reports *complete* records. Whatever trails the last
//! boundary is left unconsumed and the reader picks it up again next cycle.

/// A complete record found at the start of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Bytes consumed from the buffer, boundary included
    pub advance: usize,
    /// Length of the record body, boundary excluded
    pub len: usize,
}

/// Boundary rule for records within a file
pub trait Splitter: Send + Sync {
    /// Locate the first complete record in `data`, or `None` if `data` holds
    /// only a partial record.
    fn next_record(&self, data: &[u8]) -> Option<Token>;
}

/// Newline-terminated records. A `\r` before the newline is not part of the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineSplitter;

impl Splitter for LineSplitter {
    fn next_record(&self, data: &[u8]) -> Option<Token> {
        let pos = data.iter().position(|&b| b == b'\n')?;
        let len = if pos > 0 && data[pos - 1] == b'\r' {
            pos - 1
        } else {
            pos
        };
        Some(Token {
            advance: pos + 1,
            len,
        })
    }
}

/// Records terminated by an arbitrary, non-empty byte sequence
#[derive(Debug, Clone)]
pub struct DelimiterSplitter {
    delimiter: Vec<u8>,
}

impl DelimiterSplitter {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Option<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return None;
        }
        Some(Self { delimiter })
    }
}

impl Splitter for DelimiterSplitter {
    fn next_record(&self, data: &[u8]) -> Option<Token> {
        let pos = data
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice())?;
        Some(Token {
            advance: pos + self.delimiter.len(),
            len: pos,
        })
    }
}

/// Iterator over the complete records of a buffer, yielding each record's
/// starting position within the buffer and its body.
pub struct Records<'a> {
    splitter: &'a dyn Splitter,
    data: &'a [u8],
    consumed: usize,
}

impl<'a> Records<'a> {
    pub fn new(splitter: &'a dyn Splitter, data: &'a [u8]) -> Self {
        Self {
            splitter,
            data,
            consumed: 0,
        }
    }

    /// Bytes covered by the records yielded so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.consumed..];
        let token = self.splitter.next_record(rest)?;
        // Guard against a splitter that makes no progress
        if token.advance == 0 {
            return None;
        }
        let start = self.consumed;
        self.consumed += token.advance;
        Some((start, &rest[..token.len]))
    }
}
