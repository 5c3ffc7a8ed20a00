//! Error types for the unlocker

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::table::{CodecError, TableKind};

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors when checking, patching or restoring a product
#[derive(Debug, Error)]
pub enum Error {
    /// Install requested but the files are already patched
    #[error("files are already patched")]
    AlreadyPatched,
    /// Uninstall requested but the files are not patched
    #[error("files are not patched")]
    NotPatched,
    /// Some records or files are patched and others are not
    #[error("files are in a mixed patch state, restore or reinstall the product first")]
    MixedState,
    /// Install requested but a backup already exists
    #[error("backup already exists at {}", .0.display())]
    BackupPresent(PathBuf),
    /// Uninstall requested but there is no backup to restore from
    #[error("no backup found at {}", .0.display())]
    BackupMissing(PathBuf),
    /// A virtual machine is running
    #[error("a virtual machine is running, shut it down first")]
    TargetRunning,
    /// The caller may not modify the product files
    #[error("insufficient privileges, re-run with admin/root privileges")]
    PermissionDenied,
    /// An essential table has no records in a target
    #[error("{table} not found in {}, this version is not supported", .path.display())]
    SignatureNotFound {
        /// Target file
        path: PathBuf,
        /// Table family that was searched for
        table: TableKind,
    },
    /// A file could not be opened, mapped, read, written or flushed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// A file does not have the content recorded for it
    #[error("integrity check failed for {}: expected {expected}, got {actual}", .path.display())]
    IntegrityMismatch {
        /// File that failed the check
        path: PathBuf,
        /// Hash recorded in the manifest
        expected: String,
        /// Hash of the file on disk
        actual: String,
    },
    /// The hash manifest could not be read or written
    #[error("invalid manifest {}: {source}", .path.display())]
    Manifest {
        /// Manifest file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
    /// A record field could not be decoded or encoded. This is a bug in a table descriptor.
    #[error("internal codec error: {0}")]
    Codec(#[from] CodecError),
}
impl Error {
    /// Returns a closure wrapping an [`io::Error`] with the path it happened on, for use with `map_err`
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| Self::Io { path, source }
    }
}
