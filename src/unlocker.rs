//! # Unlocker
//!
//! This module ties the pieces together into the install, uninstall and status workflows.
//!
//! Both workflows check every precondition before touching a file: privileges, running VMs, the patch status of the
//! targets and the presence of the backup. The backup directory doubles as the install marker, so at most one
//! install or uninstall can be in effect for a product.

use log::{info, warn};

use crate::assets::ToolsAssets;
use crate::backup::BackupStore;
use crate::error::{Error, Result};
use crate::patcher::{PatchEngine, PatchResult, Status};
use crate::platform::{Platform, ServiceGuard};
use crate::product::{Product, Target};

/// Patch status of every target of a product
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Combined status. Targets without records do not count, and a product without any records is unpatched.
    pub status: Status,
    /// Record counts per target
    pub files: Vec<(Target, PatchResult)>,
}

/// Rescans every target on disk and combines their status
pub fn check_status(targets: &[Target]) -> Result<StatusReport> {
    let mut combined: Option<Status> = None;
    let mut files = Vec::with_capacity(targets.len());

    for target in targets {
        let result = PatchEngine::new(target.table.descriptor()).scan_file(&target.path)?;
        combined = match (combined, result.status()) {
            (current, None) => current,
            (None, Some(status)) => Some(status),
            (Some(current), Some(status)) if current == status => Some(current),
            _ => Some(Status::Mixed),
        };
        files.push((target.clone(), result));
    }

    Ok(StatusReport {
        status: combined.unwrap_or(Status::Unpatched),
        files,
    })
}

/// Installs and uninstalls the patch on one product
pub struct Unlocker<'a, P: Platform + ?Sized> {
    /// Product being patched
    product: &'a Product,
    /// Host capabilities
    platform: &'a P,
    /// Backups of the product's targets
    store: BackupStore,
    /// Tools images to add alongside the patch
    assets: Option<ToolsAssets>,
}
impl<'a, P: Platform + ?Sized> Unlocker<'a, P> {
    /// Creates a new unlocker for `product`
    pub fn new(product: &'a Product, platform: &'a P) -> Self {
        Self {
            product,
            platform,
            store: BackupStore::new(&product.backup_dir),
            assets: None,
        }
    }

    /// Also installs and removes the tools images in `assets`
    pub fn with_assets(mut self, assets: ToolsAssets) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Current patch status of the product
    pub fn status(&self) -> Result<StatusReport> {
        check_status(&self.product.targets)
    }

    /// Checks privileges and running VMs, then the patch status
    fn preflight(&self) -> Result<StatusReport> {
        if !self.platform.is_elevated()? {
            return Err(Error::PermissionDenied);
        }
        if self.platform.is_target_running()? {
            return Err(Error::TargetRunning);
        }

        info!("Checking patch status of files...");
        self.status()
    }

    /// Patches the targets in order, stopping at the first one that fails.
    ///
    /// Targets before the failing one stay patched and the ones after it are not touched, the backup taken by
    /// the caller covers both.
    fn patch_targets(&self) -> Result<Vec<PatchResult>> {
        let mut results = Vec::with_capacity(self.product.targets.len());
        for target in &self.product.targets {
            let result = PatchEngine::new(target.table.descriptor()).patch_file(&target.path)?;
            if result.total == 0 {
                if target.table.is_essential() {
                    return Err(Error::SignatureNotFound {
                        path: target.path.clone(),
                        table: target.table,
                    });
                }
                warn!("continuing without {} in {}", target.table, target.path.display());
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Backs up and patches every target, returning the record counts per target
    pub fn install(&self) -> Result<Vec<PatchResult>> {
        info!("Installing unlocker");
        let report = self.preflight()?;
        match report.status {
            Status::Unpatched => {}
            Status::Patched => return Err(Error::AlreadyPatched),
            Status::Mixed => return Err(Error::MixedState),
        }
        if self.store.exists() {
            return Err(Error::BackupPresent(self.store.dir().to_path_buf()));
        }
        for (target, result) in &report.files {
            if target.table.is_essential() && result.total == 0 {
                return Err(Error::SignatureNotFound {
                    path: target.path.clone(),
                    table: target.table,
                });
            }
        }

        let services = ServiceGuard::stop(self.platform)?;

        info!("Backing up files...");
        let mut manifest = self.store.backup(&self.product.targets)?;

        info!("Patching...");
        let results = self.patch_targets()?;
        self.store.record_post_hashes(&mut manifest)?;

        if let Some(assets) = &self.assets {
            info!("Copying VMware Tools...");
            assets.install();
        }

        services.start();
        Ok(results)
    }

    /// Restores every target from the backup and removes it
    pub fn uninstall(&self) -> Result<()> {
        info!("Uninstalling unlocker");
        let report = self.preflight()?;
        match report.status {
            Status::Patched => {}
            Status::Unpatched => return Err(Error::NotPatched),
            Status::Mixed => return Err(Error::MixedState),
        }
        if !self.store.exists() {
            return Err(Error::BackupMissing(self.store.dir().to_path_buf()));
        }
        let manifest = self.store.load()?;

        let services = ServiceGuard::stop(self.platform)?;

        info!("Restoring files...");
        self.store.restore(manifest)?;

        if let Some(assets) = &self.assets {
            info!("Removing VMware Tools...");
            assets.remove();
        }

        services.start();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{check_status, Unlocker};
    use crate::assets::ToolsAssets;
    use crate::backup::BackupStore;
    use crate::error::Error;
    use crate::patcher::tests::{blob, gos_record, vmx_record};
    use crate::patcher::{PatchEngine, Status};
    use crate::platform::tests::FakePlatform;
    use crate::product::{Product, Target};
    use crate::table::{TableKind, VMX_TABLE};

    /// Lays out a product with two vmx binaries and a base library
    fn product(dir: &Path) -> Product {
        let install = dir.join("install");
        let backup = dir.join("backup");
        fs::create_dir_all(&install).unwrap();

        let files = [
            ("vmware-vmx", TableKind::Vmx, blob(&[vmx_record(0)])),
            ("vmware-vmx-debug", TableKind::Vmx, blob(&[vmx_record(0), vmx_record(0)])),
            (
                "libvmwarebase.so",
                TableKind::Gos,
                blob(&[gos_record(0xBE), gos_record(0x3E), gos_record(0xBE)]),
            ),
        ];
        let targets = files
            .into_iter()
            .map(|(name, table, contents)| {
                let path = install.join(name);
                fs::write(&path, contents).unwrap();
                Target {
                    path,
                    backup: backup.join(name),
                    table,
                }
            })
            .collect();
        Product::new(install, backup, targets)
    }

    /// Reads every target of `product`
    fn contents(product: &Product) -> Vec<Vec<u8>> {
        product
            .targets
            .iter()
            .map(|t| fs::read(&t.path).unwrap())
            .collect()
    }

    #[test]
    /// Install patches everything, uninstall gives back the exact original bytes
    fn test_install_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let original = contents(&product);
        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);

        assert_eq!(unlocker.status().unwrap().status, Status::Unpatched);

        let results = unlocker.install().unwrap();
        assert_eq!(
            results.iter().map(|r| r.unpatched).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert_eq!(unlocker.status().unwrap().status, Status::Patched);
        assert_ne!(contents(&product), original);
        assert!(product.backup_dir.join("manifest.json").is_file());

        unlocker.uninstall().unwrap();
        assert_eq!(contents(&product), original);
        assert_eq!(unlocker.status().unwrap().status, Status::Unpatched);
        assert!(!product.backup_dir.exists());

        assert_eq!(
            *platform.calls.borrow(),
            ["stop", "start", "stop", "start"]
        );
    }

    #[test]
    /// A failure halfway through patching keeps the backup and restarts services
    fn test_install_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let original = contents(&product);

        // the debug binary loses its table once services are down
        let platform = FakePlatform::default();
        let emptied = product.targets[1].path.clone();
        let hook = move || fs::write(emptied, blob(&[])).unwrap();
        *platform.on_stop.borrow_mut() = Some(Box::new(hook));

        let unlocker = Unlocker::new(&product, &platform);
        assert!(matches!(
            unlocker.install(),
            Err(Error::SignatureNotFound {
                table: TableKind::Vmx,
                ..
            })
        ));

        assert_eq!(
            check_status(&product.targets[..1]).unwrap().status,
            Status::Patched
        );
        assert_eq!(fs::read(&product.targets[2].path).unwrap(), original[2]);

        let manifest = BackupStore::new(&product.backup_dir).load().unwrap();
        assert_eq!(manifest.records.len(), 3);
        assert!(manifest.records.iter().all(|r| r.post_hash.is_none()));
        assert_eq!(*platform.calls.borrow(), ["stop", "start"]);
    }

    #[test]
    /// A target that cannot be written stops the patch loop, the files after it stay as they were
    fn test_patch_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let original = contents(&product);
        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);
        let store = BackupStore::new(&product.backup_dir);
        store.backup(&product.targets).unwrap();

        // a directory cannot be opened for writing, whatever the privileges
        let broken = &product.targets[1].path;
        fs::remove_file(broken).unwrap();
        fs::create_dir(broken).unwrap();

        assert!(matches!(unlocker.patch_targets(), Err(Error::Io { .. })));
        assert_eq!(
            check_status(&product.targets[..1]).unwrap().status,
            Status::Patched
        );
        assert_eq!(fs::read(&product.targets[2].path).unwrap(), original[2]);

        // the backup still brings everything back
        fs::remove_dir(broken).unwrap();
        store.restore(store.load().unwrap()).unwrap();
        assert_eq!(contents(&product), original);
        assert!(!store.exists());
    }

    #[test]
    /// A tampered backup stops uninstall with the product still patched, a repaired one lets it through
    fn test_uninstall_tampered_backup() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let original = contents(&product);
        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);

        unlocker.install().unwrap();
        let patched = contents(&product);
        fs::write(&product.targets[2].backup, b"tampered").unwrap();

        assert!(matches!(
            unlocker.uninstall(),
            Err(Error::IntegrityMismatch { .. })
        ));
        assert_eq!(contents(&product), patched);
        assert_eq!(unlocker.status().unwrap().status, Status::Patched);
        assert!(product.backup_dir.exists());

        fs::write(&product.targets[2].backup, &original[2]).unwrap();
        unlocker.uninstall().unwrap();
        assert_eq!(contents(&product), original);
        assert_eq!(
            *platform.calls.borrow(),
            ["stop", "start", "stop", "start", "stop", "start"]
        );
    }

    #[test]
    /// A second install is refused before anything is written
    fn test_install_twice() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);

        unlocker.install().unwrap();
        let patched = contents(&product);

        assert!(matches!(unlocker.install(), Err(Error::AlreadyPatched)));
        assert_eq!(contents(&product), patched);
    }

    #[test]
    /// A leftover backup blocks install
    fn test_install_backup_present() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        fs::create_dir_all(&product.backup_dir).unwrap();
        let platform = FakePlatform::default();

        assert!(matches!(
            Unlocker::new(&product, &platform).install(),
            Err(Error::BackupPresent(_))
        ));
        assert!(platform.calls.borrow().is_empty());
    }

    #[test]
    /// One patched file among unpatched ones blocks both directions
    fn test_mixed_state() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        PatchEngine::new(&VMX_TABLE)
            .patch_file(&product.targets[0].path)
            .unwrap();

        assert_eq!(
            check_status(&product.targets).unwrap().status,
            Status::Mixed
        );

        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);
        let before = contents(&product);
        assert!(matches!(unlocker.install(), Err(Error::MixedState)));
        assert!(matches!(unlocker.uninstall(), Err(Error::MixedState)));
        assert_eq!(contents(&product), before);
        assert!(!product.backup_dir.exists());
    }

    #[test]
    /// Uninstall needs a patched product and its backup
    fn test_uninstall_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);

        assert!(matches!(unlocker.uninstall(), Err(Error::NotPatched)));

        unlocker.install().unwrap();
        fs::remove_dir_all(&product.backup_dir).unwrap();
        assert!(matches!(
            unlocker.uninstall(),
            Err(Error::BackupMissing(_))
        ));
    }

    #[test]
    /// Running VMs and missing privileges stop everything up front
    fn test_platform_checks() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let before = contents(&product);

        let platform = FakePlatform::default();
        platform.running.set(true);
        let unlocker = Unlocker::new(&product, &platform);
        assert!(matches!(unlocker.install(), Err(Error::TargetRunning)));

        platform.running.set(false);
        platform.denied.set(true);
        assert!(matches!(unlocker.install(), Err(Error::PermissionDenied)));
        assert!(matches!(unlocker.uninstall(), Err(Error::PermissionDenied)));

        assert_eq!(contents(&product), before);
        assert!(platform.calls.borrow().is_empty());
    }

    #[test]
    /// A vmx binary without its table means an unsupported version
    fn test_essential_table_missing() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        fs::write(&product.targets[1].path, blob(&[])).unwrap();
        let before = contents(&product);

        let platform = FakePlatform::default();
        let err = Unlocker::new(&product, &platform).install().unwrap_err();
        assert!(matches!(
            err,
            Error::SignatureNotFound {
                table: TableKind::Vmx,
                ..
            }
        ));
        assert_eq!(contents(&product), before);
        assert!(!product.backup_dir.exists());
    }

    #[test]
    /// A base library without the guest OS table is patched around with a warning
    fn test_optional_table_missing() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        fs::write(&product.targets[2].path, blob(&[])).unwrap();

        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform);
        let results = unlocker.install().unwrap();
        assert_eq!(results[2].total, 0);

        let report = unlocker.status().unwrap();
        assert_eq!(report.status, Status::Patched);
        assert_eq!(report.files[2].1.total, 0);
    }

    #[test]
    /// A product without any records reads as unpatched
    fn test_status_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.bin");
        fs::write(&path, b"fresh").unwrap();
        let targets = [Target {
            path,
            backup: dir.path().join("backup").join("fresh.bin"),
            table: TableKind::Gos,
        }];

        let report = check_status(&targets).unwrap();
        assert_eq!(report.status, Status::Unpatched);
        assert_eq!(report.files[0].1.total, 0);
    }

    #[test]
    /// Tools images follow the patch in and out
    fn test_assets() {
        let dir = tempfile::tempdir().unwrap();
        let product = product(dir.path());
        let iso = dir.path().join("iso");
        fs::create_dir_all(&iso).unwrap();
        fs::write(iso.join("darwin.iso"), b"iso").unwrap();

        let platform = FakePlatform::default();
        let unlocker = Unlocker::new(&product, &platform)
            .with_assets(ToolsAssets::new(&iso, &product.install_dir));

        unlocker.install().unwrap();
        assert!(product.install_dir.join("darwin.iso").is_file());

        unlocker.uninstall().unwrap();
        assert!(!product.install_dir.join("darwin.iso").exists());
    }
}
