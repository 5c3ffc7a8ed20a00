//! Guest tools images shipped next to the unlocker and copied into the product on install

use std::fs;
use std::io;
use std::path::PathBuf;

use log::{info, warn};

/// Tools images, copied under the same name
pub const TOOLS_ISOS: &[&str] = &["darwinPre15.iso", "darwin.iso"];

/// Where the tools images come from and go to
#[derive(Debug, Clone)]
pub struct ToolsAssets {
    /// Directory holding the images to install
    source_dir: PathBuf,
    /// Product directory receiving the images
    install_dir: PathBuf,
}
impl ToolsAssets {
    /// Creates a new asset set
    pub fn new(source_dir: impl Into<PathBuf>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            install_dir: install_dir.into(),
        }
    }

    /// Installed location of `name`
    fn installed(&self, name: &str) -> PathBuf {
        self.install_dir.join(name)
    }

    /// Copies every image into the product. Images that fail to copy are skipped with a warning.
    pub fn install(&self) -> usize {
        let mut copied = 0;
        for name in TOOLS_ISOS {
            let from = self.source_dir.join(name);
            let to = self.installed(name);
            match fs::copy(&from, &to) {
                Ok(_) => {
                    info!("{} -> {}", from.display(), to.display());
                    copied += 1;
                }
                Err(e) => warn!("not copying {}: {e}", from.display()),
            }
        }
        copied
    }

    /// Removes the images from the product. Images that are not there are ignored.
    pub fn remove(&self) -> usize {
        let mut removed = 0;
        for name in TOOLS_ISOS {
            let path = self.installed(name);
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("removed {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove {}: {e}", path.display()),
            }
        }
        removed
    }
}
