//! Byte-stream to delimited-record framer.
//!
//! A [`Framer`] is a mutable byte accumulator belonging to exactly one
//! TCPSession's read loop — there is no concurrent writer. It has no
//! opinion about record contents; it only finds delimiter boundaries.

use wits_core::Delimiter;

/// Splits an inbound byte stream into delimiter-terminated records,
/// retaining the trailing partial record across calls.
pub struct Framer {
    delimiter: Delimiter,
    buffer_size: usize,
    buf: Vec<u8>,
}

impl Framer {
    pub fn new(delimiter: Delimiter, buffer_size: usize) -> Self {
        Self {
            delimiter,
            buffer_size,
            buf: Vec::new(),
        }
    }

    /// Append `bytes` and return every complete record extracted, in
    /// order, delimiter excluded. Empty records (two consecutive
    /// delimiters) are dropped. If the carry-over buffer would exceed
    /// `buffer_size` without a delimiter ever appearing, the oldest half
    /// is discarded and a warning is logged; no record is produced for
    /// the discarded bytes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let delim = self.delimiter.as_bytes();
        let mut records = Vec::new();
        while let Some(pos) = find(&self.buf, delim) {
            let record = self.buf[..pos].to_vec();
            self.buf.drain(..pos + delim.len());
            if !record.is_empty() {
                records.push(record);
            }
        }

        if self.buf.len() >= self.buffer_size {
            let keep = self.buffer_size / 2;
            let discard_from = self.buf.len() - keep;
            tracing::warn!(
                buffered = self.buf.len(),
                buffer_size = self.buffer_size,
                retained = keep,
                "framer buffer overflow, discarding oldest half"
            );
            self.buf.drain(..discard_from);
        }

        records
    }

    /// Clear the carry-over buffer.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Bytes currently buffered without a completing delimiter.
    pub fn residual(&self) -> &[u8] {
        &self.buf
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
