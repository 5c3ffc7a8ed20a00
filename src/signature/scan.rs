//! Scanning of byte buffers for signature matches

use super::Signature;

/// Location of one signature match inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchSpan {
    /// Offset of the first matched byte
    pub start: usize,
    /// Number of matched bytes (the signature length)
    pub len: usize,
}
impl MatchSpan {
    /// Offset one past the last matched byte
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

impl Signature {
    /// Finds every non-overlapping occurrence of the signature in `buffer`, in ascending offset order.
    ///
    /// After a match the scan resumes at the end of the matched span.
    /// An empty result means the signature is not present.
    pub fn scan(&self, buffer: &[u8]) -> Vec<MatchSpan> {
        let len = self.len();
        let mut spans = Vec::new();
        if buffer.len() < len {
            return spans;
        }

        // the first position is checked on its own so most offsets are rejected with one compare
        let first = &self.positions()[0];
        let last_start = buffer.len() - len;
        let mut offset = 0;
        while offset <= last_start {
            if first.matches(buffer[offset]) && self.matches_at(&buffer[offset..offset + len]) {
                spans.push(MatchSpan { start: offset, len });
                offset += len;
            } else {
                offset += 1;
            }
        }

        spans
    }
}
