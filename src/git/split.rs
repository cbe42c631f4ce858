//! Delimiter-based segmentation of raw git output
//!
//! Used for null-separated records (`-z` output, trampoline messages).
//! Segments are returned as offsets into the source buffer; nothing is decoded.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SplitError {
    #[error("Delimiter must not be empty")]
    EmptyDelimiter,
}

/// A view into a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: usize,
    pub length: usize,
}

impl ByteRange {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Borrow the bytes this range covers from `buffer`.
    ///
    /// `buffer` must be the buffer the range was produced from.
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.offset..self.end()]
    }
}

/// Split `buffer` on every non-overlapping occurrence of `delimiter`.
///
/// A trailing segment is always emitted, so `a\0b\0` yields `["a", "b", ""]`
/// and a buffer without the delimiter yields a single range covering all of it.
pub fn split_buffer(buffer: &[u8], delimiter: &[u8]) -> Result<Vec<ByteRange>, SplitError> {
    if delimiter.is_empty() {
        return Err(SplitError::EmptyDelimiter);
    }

    let mut ranges = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + delimiter.len() <= buffer.len() {
        if &buffer[i..i + delimiter.len()] == delimiter {
            ranges.push(ByteRange {
                offset: start,
                length: i - start,
            });
            i += delimiter.len();
            start = i;
        } else {
            i += 1;
        }
    }

    ranges.push(ByteRange {
        offset: start,
        length: buffer.len() - start,
    });

    Ok(ranges)
}

/// Split null-terminated records (`git ... -z`), dropping the empty segment
/// produced by the final terminator.
pub fn split_null_records(buffer: &[u8]) -> Vec<&[u8]> {
    let mut ranges = match split_buffer(buffer, b"\0") {
        Ok(r) => r,
        Err(_) => return vec![],
    };
    if ranges.last().map(|r| r.is_empty()).unwrap_or(false) {
        ranges.pop();
    }
    ranges.iter().map(|r| r.slice(buffer)).collect()
}
