//! The hash manifest: which files were backed up, where to, and what their contents hashed to

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::table::TableKind;

/// Version written to new manifests
pub const MANIFEST_VERSION: u32 = 1;

/// BLAKE3 hash of a file's contents, as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);
impl Digest {
    /// Hashes `bytes`
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Hashes the contents of the file at `path`
    pub fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(Error::io(path))?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher).map_err(Error::io(path))?;
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Hex form of the hash
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One backed up target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Live file that gets patched
    pub target: PathBuf,
    /// Copy of the unpatched file
    pub backup: PathBuf,
    /// Table family patched in the target
    pub table: TableKind,
    /// Hash of the target before patching
    pub pre_hash: Digest,
    /// Hash of the target after patching, once known
    #[serde(default)]
    pub post_hash: Option<Digest>,
}

/// Every backed up file of one product installation, in patch order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashManifest {
    /// Format version
    pub version: u32,
    /// Backed up files
    pub records: Vec<BackupRecord>,
}
impl HashManifest {
    /// Creates a manifest over `records`
    pub fn new(records: Vec<BackupRecord>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            records,
        }
    }

    /// Reads a manifest from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(Error::io(path))?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the manifest to `path`. The file is replaced in one rename, so readers never see half a manifest.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self).map_err(|source| Error::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(Error::io(&tmp))?;
        file.write_all(&json).map_err(Error::io(&tmp))?;
        file.sync_all().map_err(Error::io(&tmp))?;
        drop(file);

        fs::rename(&tmp, path).map_err(Error::io(path))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{BackupRecord, Digest, HashManifest, MANIFEST_VERSION};
    use crate::error::Error;
    use crate::table::TableKind;

    #[test]
    /// File and byte hashes agree
    fn test_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        fs::write(&path, b"\0\x01binary\xff").unwrap();

        let digest = Digest::of_file(&path).unwrap();
        assert_eq!(digest, Digest::of_bytes(b"\0\x01binary\xff"));
        assert_ne!(digest, Digest::of_bytes(b"\0\x01binary\xfe"));
        assert_eq!(digest.as_str().len(), 64);
    }

    #[test]
    /// A saved manifest loads back unchanged and leaves no temp file behind
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let mut manifest = HashManifest::new(vec![BackupRecord {
            target: "/usr/lib/vmware/bin/vmware-vmx".into(),
            backup: "/tmp/backup/vmware-vmx".into(),
            table: TableKind::Vmx,
            pre_hash: Digest::of_bytes(b"before"),
            post_hash: None,
        }]);
        manifest.records[0].post_hash = Some(Digest::of_bytes(b"after"));
        manifest.save(&path).unwrap();

        let loaded = HashManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.version, MANIFEST_VERSION);
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    /// Garbage in the manifest is reported, not guessed at
    fn test_load_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            HashManifest::load(&path),
            Err(Error::Manifest { .. })
        ));
    }
}
