//! This module contains a scoped, writable memory map of a target file

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::warn;
use memmap2::MmapMut;

use crate::error::{Error, Result};

/// Exclusive writable view over the bytes of a file.
///
/// The mapping is flushed when the guard goes out of scope, so a half-finished pass still reaches the disk.
/// Call [`MappedFile::flush`] on the success path to see flush errors.
pub struct MappedFile {
    /// Path of the mapped file, for errors and logs
    path: PathBuf,
    /// Handle the mapping was created from
    file: File,
    /// The mapping itself. `None` for empty files, which cannot be mapped, and once flushed
    map: Option<MmapMut>,
    /// Whether the bytes were handed out mutably
    dirty: bool,
}
impl MappedFile {
    /// Opens `path` for reading and writing and maps its full contents
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Error::io(&path))?;
        let len = file.metadata().map_err(Error::io(&path))?.len();

        let map = if len == 0 {
            None
        } else {
            // Safety: the caller guarantees no other process modifies the file while it is patched.
            // The map is only reachable through this guard and does not outlive `file`.
            Some(unsafe { MmapMut::map_mut(&file) }.map_err(Error::io(&path))?)
        };

        Ok(Self {
            path,
            file,
            map,
            dirty: false,
        })
    }

    /// Contents of the file
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }

    /// Mutable contents of the file. Writes go straight to the mapping.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        match self.map.as_mut() {
            Some(map) => &mut map[..],
            None => &mut [],
        }
    }

    /// Flushes the mapping to stable storage and releases it
    pub fn flush(mut self) -> Result<()> {
        if let Some(map) = self.map.take() {
            if self.dirty {
                map.flush().map_err(Error::io(&self.path))?;
            }
        }
        if self.dirty {
            self.file.sync_all().map_err(Error::io(&self.path))?;
        }
        self.dirty = false;
        Ok(())
    }
}
impl Drop for MappedFile {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some(map) = self.map.take() {
            if let Err(e) = map.flush() {
                warn!("failed to flush {}: {e}", self.path.display());
            }
        }
    }
}
