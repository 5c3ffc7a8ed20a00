//! Reads and writes the mutable field of a matched record

use thiserror::Error;

use super::TableDescriptor;
use crate::signature::MatchSpan;

/// Errors when decoding or encoding a record field
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The field of a match lies past the end of the buffer, e.g. a record truncated by the end of the file
    #[error("field at 0x{offset:08x} (width {width}) is outside the {len} byte buffer")]
    OutOfBounds {
        /// Absolute offset of the field
        offset: usize,
        /// Field width
        width: usize,
        /// Buffer length
        len: usize,
    },
    /// The value has bits beyond the field width
    #[error("value 0x{value:x} does not fit in a {width} byte field")]
    Overflow {
        /// Value that was encoded
        value: u64,
        /// Field width
        width: usize,
    },
}

/// Computes the in-bounds byte range of the field belonging to `span`
fn field_range(
    len: usize,
    span: &MatchSpan,
    table: &TableDescriptor,
) -> Result<std::ops::Range<usize>, CodecError> {
    let offset = table.field_offset(span);
    let width = table.field_width();
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(CodecError::OutOfBounds { offset, width, len }),
    }
}

/// Reads the field of the record at `span` as a little-endian integer
pub fn decode_field(
    buffer: &[u8],
    span: &MatchSpan,
    table: &TableDescriptor,
) -> Result<u64, CodecError> {
    let range = field_range(buffer.len(), span, table)?;
    let mut bytes = [0u8; 8];
    bytes[..range.len()].copy_from_slice(&buffer[range]);
    Ok(u64::from_le_bytes(bytes))
}

/// Encodes `value` as the little-endian bytes of the field
pub fn encode_field(value: u64, table: &TableDescriptor) -> Result<Vec<u8>, CodecError> {
    let width = table.field_width();
    if width < 8 && value >> (width * 8) != 0 {
        return Err(CodecError::Overflow { value, width });
    }
    Ok(value.to_le_bytes()[..width].to_vec())
}

/// Overwrites the field of the record at `span` with `value`. No other byte of `buffer` changes.
pub fn write_field(
    buffer: &mut [u8],
    span: &MatchSpan,
    table: &TableDescriptor,
    value: u64,
) -> Result<(), CodecError> {
    let range = field_range(buffer.len(), span, table)?;
    let bytes = encode_field(value, table)?;
    buffer[range].copy_from_slice(&bytes);
    Ok(())
}
