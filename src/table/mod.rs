//! # Table
//!
//! This module covers table descriptors, the static description of one family of check records embedded in a binary

use std::fmt;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::signature::{MatchSpan, Signature};

pub mod codec;

pub use codec::CodecError;

/// Patch state of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// The flag bit is clear
    Unpatched,
    /// The flag bit is set
    Patched,
}

/// Describes one table family: how to find its records and how to flip their flag
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    /// Human readable name used in logs and errors
    name: &'static str,
    /// Signature of the record header
    signature: Signature,
    /// Offset of the mutable field, relative to the start of a match
    field_offset: usize,
    /// Width of the mutable field in bytes (little-endian)
    field_width: usize,
    /// Bit of the field which is set by the patch
    flag_bit: u32,
    /// Field values the vendor ships for this family, before patching
    originals: &'static [u64],
}
impl TableDescriptor {
    /// Creates a new descriptor
    ///
    /// # Panics
    ///
    /// Panics if `field_width` is not in `1..=8` or `flag_bit` does not fit in the field.
    /// Descriptors are static data, so this is a programming error.
    pub fn new(
        name: &'static str,
        signature: Signature,
        field_offset: usize,
        field_width: usize,
        flag_bit: u32,
        originals: &'static [u64],
    ) -> Self {
        assert!(
            (1..=8).contains(&field_width),
            "field width {field_width} of table {name} must be 1..=8 bytes"
        );
        assert!(
            flag_bit < (field_width as u32) * 8,
            "flag bit {flag_bit} of table {name} is outside its {field_width} byte field"
        );
        Self {
            name,
            signature,
            field_offset,
            field_width,
            flag_bit,
            originals,
        }
    }

    /// Name of the table family
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signature of the record header
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Width of the mutable field in bytes
    pub fn field_width(&self) -> usize {
        self.field_width
    }

    /// Absolute offset of the field belonging to `span`
    pub fn field_offset(&self, span: &MatchSpan) -> usize {
        span.start + self.field_offset
    }

    /// Sets the flag bit, leaving every other bit untouched. Applying it twice is the same as applying it once.
    pub fn set_transform(&self, value: u64) -> u64 {
        value | (1 << self.flag_bit)
    }

    /// Classifies a field value
    pub fn check(&self, value: u64) -> FieldState {
        if value & (1 << self.flag_bit) != 0 {
            FieldState::Patched
        } else {
            FieldState::Unpatched
        }
    }

    /// Checks that `value` is a shipped value or the patched form of one.
    /// Anything else is a false positive of the signature.
    pub fn is_known(&self, value: u64) -> bool {
        self.originals
            .iter()
            .any(|&orig| orig == value || self.set_transform(orig) == value)
    }
}

/// Header of a guest OS table record
const GOS_SIGNATURE: &str = concat!(
    "10 00 00 00 [10|20] 00 00 00 [01|02] ",
    "00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00",
);

/// Header of the `KPST` key record: reversed key, data length, reversed `ui8 ` type, attributes
const VMX_SIGNATURE: &str = "54 53 50 4b 01 20 38 69 75 [80|90] 00 00 00 00 00 00";

lazy_static! {
    /// Guest OS table: one record per guest OS family, the field holds the capability flags
    ///
    /// 0xBE -> 0xBF (WKS 12/13), 0x3E -> 0x3F (WKS 14+)
    pub static ref GOS_TABLE: TableDescriptor = TableDescriptor::new(
        "guest OS table",
        GOS_SIGNATURE
            .parse::<Signature>()
            .unwrap_or_else(|e| panic!("guest OS signature: {e}")),
        32,
        1,
        0,
        &[0xBE, 0x3E],
    );

    /// vmx check table: the `KPST` key record of the virtual SMC, the field holds the check status
    pub static ref VMX_TABLE: TableDescriptor = TableDescriptor::new(
        "vmx check table",
        VMX_SIGNATURE
            .parse::<Signature>()
            .unwrap_or_else(|e| panic!("vmx signature: {e}")),
        16,
        1,
        0,
        &[0x00],
    );
}

/// Table families known to the unlocker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// See [`GOS_TABLE`]
    Gos,
    /// See [`VMX_TABLE`]
    Vmx,
}
impl TableKind {
    /// Descriptor of the family
    pub fn descriptor(self) -> &'static TableDescriptor {
        match self {
            Self::Gos => &GOS_TABLE,
            Self::Vmx => &VMX_TABLE,
        }
    }

    /// Whether a missing table means the product version is incompatible
    pub fn is_essential(self) -> bool {
        matches!(self, Self::Vmx)
    }
}
impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().name())
    }
}
