//! # Product
//!
//! This module covers the installed product: where it lives and which of its files carry check tables

use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::table::TableKind;

/// One file of the product that gets patched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Live file
    pub path: PathBuf,
    /// Where the unpatched copy goes
    pub backup: PathBuf,
    /// Table family patched in this file
    pub table: TableKind,
}

/// An installed product and its patch targets
#[derive(Debug, Clone)]
pub struct Product {
    /// Installation directory
    pub install_dir: PathBuf,
    /// Directory holding the backups and hash manifest
    pub backup_dir: PathBuf,
    /// Files to patch, in patch order
    pub targets: Vec<Target>,
}

/// Files carrying check tables, relative to the install directory
#[cfg(windows)]
const LAYOUT: &[(&str, TableKind)] = &[
    ("x64/vmware-vmx.exe", TableKind::Vmx),
    ("x64/vmware-vmx-debug.exe", TableKind::Vmx),
    ("x64/vmware-vmx-stats.exe", TableKind::Vmx),
    ("vmwarebase.dll", TableKind::Gos),
];

/// Files carrying check tables, relative to the install directory
#[cfg(not(windows))]
const LAYOUT: &[(&str, TableKind)] = &[
    ("bin/vmware-vmx", TableKind::Vmx),
    ("bin/vmware-vmx-debug", TableKind::Vmx),
    ("bin/vmware-vmx-stats", TableKind::Vmx),
    ("lib/libvmwarebase.so/libvmwarebase.so", TableKind::Gos),
];

/// Default installation directory
#[cfg(windows)]
pub const DEFAULT_INSTALL_DIR: &str = r"C:\Program Files (x86)\VMware\VMware Workstation";

/// Default installation directory
#[cfg(not(windows))]
pub const DEFAULT_INSTALL_DIR: &str = "/usr/lib/vmware";

impl Product {
    /// Creates a product from explicit targets
    pub fn new(
        install_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        targets: Vec<Target>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            backup_dir: backup_dir.into(),
            targets,
        }
    }

    /// Finds the known target files under `install_dir`.
    ///
    /// Files missing from this build are skipped, as long as a file of every essential table family is found.
    /// Each backup is named after its target's file name.
    pub fn discover(install_dir: impl AsRef<Path>, backup_dir: impl AsRef<Path>) -> Result<Self> {
        let install_dir = install_dir.as_ref();
        let backup_dir = backup_dir.as_ref();

        let mut targets = Vec::new();
        for &(relative, table) in LAYOUT {
            let path = install_dir.join(relative);
            if !path.is_file() {
                warn!("{} not found, skipping", path.display());
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            debug!("found {} ({table})", path.display());
            targets.push(Target {
                backup: backup_dir.join(name),
                path,
                table,
            });
        }

        if targets.is_empty() {
            return Err(Error::Io {
                path: install_dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no patchable files found"),
            });
        }

        let missing = LAYOUT.iter().find(|&&(_, table)| {
            table.is_essential() && !targets.iter().any(|t| t.table == table)
        });
        if let Some(&(relative, table)) = missing {
            let message = format!("no binary with the {table} found");
            return Err(Error::Io {
                path: install_dir.join(relative),
                source: io::Error::new(io::ErrorKind::NotFound, message),
            });
        }

        Ok(Self::new(install_dir, backup_dir, targets))
    }
}
