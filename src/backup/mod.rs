//! # Backup
//!
//! This module covers the backup store, which keeps unpatched copies of the targets and restores them on command.
//! The presence of the store is what marks a product as installed.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::product::Target;

pub mod manifest;

pub use manifest::{BackupRecord, Digest, HashManifest};

/// File name of the manifest inside the backup directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Copies `from` over `to` and flushes the copy to disk
fn copy_synced(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(Error::io(to))?;
    OpenOptions::new()
        .write(true)
        .open(to)
        .and_then(|f| f.sync_all())
        .map_err(Error::io(to))
}

/// Side directory holding unpatched copies of the targets and their [`HashManifest`]
#[derive(Debug, Clone)]
pub struct BackupStore {
    /// Backup directory
    dir: PathBuf,
}
impl BackupStore {
    /// Creates a store rooted at `dir`. Nothing is touched on disk.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backup directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Whether a backup exists
    pub fn exists(&self) -> bool {
        self.dir.exists()
    }

    /// Reads the manifest of an existing backup
    pub fn load(&self) -> Result<HashManifest> {
        let path = self.manifest_path();
        if !path.is_file() {
            return Err(Error::BackupMissing(path));
        }
        HashManifest::load(path)
    }

    /// Copies every target into the store and persists a manifest of their hashes.
    ///
    /// Either every target is backed up and the manifest written, or the store is removed again.
    pub fn backup(&self, targets: &[Target]) -> Result<HashManifest> {
        if self.exists() {
            return Err(Error::BackupPresent(self.dir.clone()));
        }
        fs::create_dir_all(&self.dir).map_err(Error::io(&self.dir))?;

        let mut copied = Vec::new();
        let result = self.backup_all(targets, &mut copied).and_then(|manifest| {
            manifest.save(self.manifest_path())?;
            Ok(manifest)
        });

        if result.is_err() {
            for path in &copied {
                if let Err(e) = fs::remove_file(path) {
                    warn!("failed to remove partial backup {}: {e}", path.display());
                }
            }
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!("failed to remove {}: {e}", self.dir.display());
            }
        }
        result
    }

    /// Copies each target, recording every copy made in `copied`
    fn backup_all(&self, targets: &[Target], copied: &mut Vec<PathBuf>) -> Result<HashManifest> {
        let mut records = Vec::with_capacity(targets.len());
        for target in targets {
            info!("{} -> {}", target.path.display(), target.backup.display());
            let pre_hash = Digest::of_file(&target.path)?;

            if let Some(parent) = target.backup.parent() {
                fs::create_dir_all(parent).map_err(Error::io(parent))?;
            }
            copy_synced(&target.path, &target.backup)?;
            copied.push(target.backup.clone());

            let actual = Digest::of_file(&target.backup)?;
            if actual != pre_hash {
                return Err(Error::IntegrityMismatch {
                    path: target.backup.clone(),
                    expected: pre_hash.to_string(),
                    actual: actual.to_string(),
                });
            }

            records.push(BackupRecord {
                target: target.path.clone(),
                backup: target.backup.clone(),
                table: target.table,
                pre_hash,
                post_hash: None,
            });
        }
        Ok(HashManifest::new(records))
    }

    /// Hashes the patched targets and records the hashes in the manifest
    pub fn record_post_hashes(&self, manifest: &mut HashManifest) -> Result<()> {
        for record in &mut manifest.records {
            record.post_hash = Some(Digest::of_file(&record.target)?);
        }
        manifest.save(self.manifest_path())
    }

    /// Copies every backup over its target, checking it against the recorded hash, then removes the store.
    ///
    /// Every backup copy is checked before any file is copied back, so a damaged backup leaves the product
    /// untouched and the manifest as it was. An error while copying stops the restore and keeps the failing
    /// file and everything after it in the manifest for a retry.
    pub fn restore(&self, manifest: HashManifest) -> Result<()> {
        for record in &manifest.records {
            if let Err(e) = Self::verify_backup(record) {
                error!("{e}");
                return Err(e);
            }
        }

        let mut records = manifest.records.into_iter();
        while let Some(record) = records.next() {
            if let Err(e) = self.restore_one(&record) {
                error!("{e}");
                let retained = std::iter::once(record).chain(records).collect();
                HashManifest::new(retained).save(self.manifest_path())?;
                return Err(e);
            }
            if let Err(e) = fs::remove_file(&record.backup) {
                warn!("failed to remove {}: {e}", record.backup.display());
            }
        }

        fs::remove_dir_all(&self.dir).map_err(Error::io(&self.dir))
    }

    /// Checks that the backup copy still has the content recorded before patching
    fn verify_backup(record: &BackupRecord) -> Result<()> {
        let backup_hash = Digest::of_file(&record.backup)?;
        if backup_hash != record.pre_hash {
            return Err(Error::IntegrityMismatch {
                path: record.backup.clone(),
                expected: record.pre_hash.to_string(),
                actual: backup_hash.to_string(),
            });
        }
        Ok(())
    }

    /// Restores one file
    fn restore_one(&self, record: &BackupRecord) -> Result<()> {
        info!("{} -> {}", record.backup.display(), record.target.display());

        if let Some(post_hash) = &record.post_hash {
            match Digest::of_file(&record.target) {
                Ok(live) if &live == post_hash => {}
                Ok(_) => warn!(
                    "{} changed since it was patched, restoring the backup anyway",
                    record.target.display()
                ),
                Err(Error::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    warn!("{} is missing, restoring the backup", record.target.display())
                }
                Err(e) => return Err(e),
            }
        }

        copy_synced(&record.backup, &record.target)?;

        let restored = Digest::of_file(&record.target)?;
        if restored != record.pre_hash {
            return Err(Error::IntegrityMismatch {
                path: record.target.clone(),
                expected: record.pre_hash.to_string(),
                actual: restored.to_string(),
            });
        }
        Ok(())
    }
}
