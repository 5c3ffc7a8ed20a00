//! # Patcher
//!
//! This module covers the patch engine, which finds every record of a table family in a file and sets its flag in place

use std::fs::File;
use std::path::Path;

use log::{debug, info, warn};
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::signature::MatchSpan;
use crate::table::codec::{decode_field, write_field};
use crate::table::{CodecError, FieldState, TableDescriptor};

pub mod map;

pub use map::MappedFile;

/// Record counts of one file for one table family.
///
/// After [`PatchEngine::patch`], `unpatched` counts the records that were changed and `patched` the ones that were already set.
/// `unpatched + patched == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchResult {
    /// Records found
    pub total: usize,
    /// Records with the flag clear
    pub unpatched: usize,
    /// Records with the flag set
    pub patched: usize,
}
impl PatchResult {
    /// Overall state of the records, `None` when there are none
    pub fn status(&self) -> Option<Status> {
        match (self.unpatched, self.patched) {
            (0, 0) => None,
            (_, 0) => Some(Status::Unpatched),
            (0, _) => Some(Status::Patched),
            _ => Some(Status::Mixed),
        }
    }

    /// Counts one record
    fn count(&mut self, state: FieldState) {
        self.total += 1;
        match state {
            FieldState::Unpatched => self.unpatched += 1,
            FieldState::Patched => self.patched += 1,
        }
    }
}

/// Patch state of a file or a set of files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Every record has its flag clear
    Unpatched,
    /// Every record has its flag set
    Patched,
    /// Some records are set and some are not
    Mixed,
}

/// Applies one table descriptor to buffers or files
#[derive(Debug, Clone, Copy)]
pub struct PatchEngine<'a> {
    /// Table family being patched
    table: &'a TableDescriptor,
}
impl<'a> PatchEngine<'a> {
    /// Creates a new engine for `table`
    pub fn new(table: &'a TableDescriptor) -> Self {
        Self { table }
    }

    /// Finds the records of the table in `buffer` along with their field values.
    ///
    /// Matches whose field is cut off by the end of the buffer, or holds a value this family never ships, are skipped.
    fn records(&self, buffer: &[u8]) -> Vec<(MatchSpan, u64)> {
        self.table
            .signature()
            .scan(buffer)
            .into_iter()
            .filter_map(|span| match decode_field(buffer, &span, self.table) {
                Ok(value) if self.table.is_known(value) => Some((span, value)),
                Ok(value) => {
                    debug!(
                        "skipping {} match @ 0x{:08x}: unknown flag 0x{value:x}",
                        self.table.name(),
                        span.start
                    );
                    None
                }
                Err(e) => {
                    debug!("skipping {} match @ 0x{:08x}: {e}", self.table.name(), span.start);
                    None
                }
            })
            .collect()
    }

    /// Counts the records in `buffer` without changing it
    pub fn scan(&self, buffer: &[u8]) -> PatchResult {
        let mut result = PatchResult::default();
        for (_, value) in self.records(buffer) {
            result.count(self.table.check(value));
        }
        result
    }

    /// Sets the flag of every unpatched record in `buffer`. Only the field bytes of those records are written.
    pub fn patch(&self, buffer: &mut [u8]) -> std::result::Result<PatchResult, CodecError> {
        let mut result = PatchResult::default();
        for (span, old) in self.records(buffer) {
            let state = self.table.check(old);
            result.count(state);
            if state == FieldState::Patched {
                continue;
            }

            let new = self.table.set_transform(old);
            write_field(buffer, &span, self.table, new)?;
            info!(
                "Flag patched @ offset: 0x{:08x}  Flag: 0x{old:x} -> 0x{new:x}",
                self.table.field_offset(&span)
            );
        }
        Ok(result)
    }

    /// Counts the records in the file at `path`, reading it from disk
    pub fn scan_file(&self, path: impl AsRef<Path>) -> Result<PatchResult> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::io(path))?;
        if file.metadata().map_err(Error::io(path))?.len() == 0 {
            return Ok(PatchResult::default());
        }

        // Safety: the map is read-only and dropped before returning
        let map = unsafe { Mmap::map(&file) }.map_err(Error::io(path))?;
        Ok(self.scan(&map))
    }

    /// Patches the file at `path` in place, flushing it to disk before returning
    pub fn patch_file(&self, path: impl AsRef<Path>) -> Result<PatchResult> {
        let path = path.as_ref();
        info!("File: {}", path.display());

        let mut file = MappedFile::open(path)?;
        let result = self.patch(file.bytes_mut())?;
        file.flush()?;

        if result.total == 0 {
            warn!("{} not found in {}", self.table.name(), path.display());
        } else {
            info!(
                "{}: {} records, {} patched, {} already patched",
                self.table.name(),
                result.total,
                result.unpatched,
                result.patched
            );
        }
        Ok(result)
    }
}
