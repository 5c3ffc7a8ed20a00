//! # Signature
//!
//! This module covers byte signatures, which describe the fixed shape of a table record inside an arbitrary binary

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub mod scan;

pub use scan::MatchSpan;

/// One position of a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigByte {
    /// The buffer must hold exactly this byte
    Exact(u8),
    /// The buffer must hold any one of these bytes
    OneOf(Vec<u8>),
}
impl SigByte {
    /// Checks whether `byte` satisfies this position
    #[inline]
    pub fn matches(&self, byte: u8) -> bool {
        match self {
            Self::Exact(b) => *b == byte,
            Self::OneOf(set) => set.contains(&byte),
        }
    }
}

/// Errors when parsing a signature from its text form
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    /// The pattern has no positions at all
    #[error("signature is empty")]
    Empty,
    /// A token is not a two-digit hex byte
    #[error("invalid byte `{0}` in signature")]
    InvalidByte(String),
    /// An alternation group has no members
    #[error("empty alternation group in signature")]
    EmptyGroup,
    /// An alternation group was opened but never closed
    #[error("unterminated alternation group in signature")]
    Unterminated,
}

/// A fixed-width byte pattern made of literal bytes and small alternation sets.
///
/// The text form is a whitespace separated list of hex bytes, where `[aa|bb]` allows either byte at that position:
///
/// ```text
/// 10 00 00 00 [10|20] 00 00 00 [01|02] 00 00 ...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Positions of the signature, in order
    positions: Vec<SigByte>,
}
impl Signature {
    /// Creates a signature from its positions
    pub fn new(positions: Vec<SigByte>) -> Result<Self, PatternError> {
        if positions.is_empty() {
            return Err(PatternError::Empty);
        }
        if positions
            .iter()
            .any(|p| matches!(p, SigByte::OneOf(set) if set.is_empty()))
        {
            return Err(PatternError::EmptyGroup);
        }
        Ok(Self { positions })
    }

    /// Creates a signature that only matches `bytes` literally
    pub fn literal(bytes: &[u8]) -> Result<Self, PatternError> {
        Self::new(bytes.iter().copied().map(SigByte::Exact).collect())
    }

    /// Number of bytes covered by a match
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Positions of the signature
    pub fn positions(&self) -> &[SigByte] {
        &self.positions
    }

    /// Checks whether the signature matches `window`, which must be exactly [`Signature::len`] bytes
    #[inline]
    pub fn matches_at(&self, window: &[u8]) -> bool {
        window.len() == self.positions.len()
            && self
                .positions
                .iter()
                .zip(window)
                .all(|(pos, &byte)| pos.matches(byte))
    }
}

/// Parses a single hex byte token
fn parse_byte(token: &str) -> Result<u8, PatternError> {
    if token.len() != 2 {
        return Err(PatternError::InvalidByte(token.to_owned()));
    }
    u8::from_str_radix(token, 16).map_err(|_| PatternError::InvalidByte(token.to_owned()))
}

impl FromStr for Signature {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut positions = Vec::new();
        let mut rest = s.trim_start();

        while !rest.is_empty() {
            if let Some(group) = rest.strip_prefix('[') {
                let end = group.find(']').ok_or(PatternError::Unterminated)?;
                let set = group[..end]
                    .split('|')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(parse_byte)
                    .collect::<Result<Vec<_>, _>>()?;
                if set.is_empty() {
                    return Err(PatternError::EmptyGroup);
                }
                positions.push(SigByte::OneOf(set));
                rest = group[end + 1..].trim_start();
            } else {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '[')
                    .unwrap_or(rest.len());
                positions.push(SigByte::Exact(parse_byte(&rest[..end])?));
                rest = rest[end..].trim_start();
            }
        }

        Self::new(positions)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pos) in self.positions.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match pos {
                SigByte::Exact(b) => write!(f, "{b:02x}")?,
                SigByte::OneOf(set) => {
                    f.write_str("[")?;
                    for (j, b) in set.iter().enumerate() {
                        if j > 0 {
                            f.write_str("|")?;
                        }
                        write!(f, "{b:02x}")?;
                    }
                    f.write_str("]")?;
                }
            }
        }
        Ok(())
    }
}
