//! # Platform
//!
//! This module covers the host capabilities the unlocker needs around a patch: privileges, running VMs and services

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use log::{debug, info, warn};
use sysinfo::System;

use crate::error::{Error, Result};

/// Host capabilities consumed by the install and uninstall workflows
pub trait Platform {
    /// Whether the caller may modify the product files
    fn is_elevated(&self) -> Result<bool>;
    /// Whether a virtual machine of the product is running
    fn is_target_running(&self) -> Result<bool>;
    /// Stops the product's services and background tasks
    fn stop_services(&self) -> Result<()>;
    /// Starts the product's services and background tasks again
    fn start_services(&self) -> Result<()>;
}

/// Guard that starts the platform's services again when dropped.
///
/// Created by [`ServiceGuard::stop`], so services are restarted on every exit path once they were stopped.
pub struct ServiceGuard<'a, P: Platform + ?Sized> {
    /// Platform whose services were stopped
    platform: &'a P,
}
impl<'a, P: Platform + ?Sized> ServiceGuard<'a, P> {
    /// Stops the services, returning a guard which restarts them
    pub fn stop(platform: &'a P) -> Result<Self> {
        platform.stop_services()?;
        Ok(Self { platform })
    }

    /// Manually restarts the services rather than letting the guard go out of scope
    pub fn start(self) {
        // restarting happens in [`Drop::drop`]
    }
}
impl<P: Platform + ?Sized> Drop for ServiceGuard<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.platform.start_services() {
            warn!("failed to restart services: {e}");
        }
    }
}

/// Process name prefix of running virtual machines
const VMX_PROCESS: &str = "vmware-vmx";

/// Whether a process called `name` is a running virtual machine
fn is_vmx_process(name: &str) -> bool {
    name.starts_with(VMX_PROCESS)
}

/// The machine the unlocker runs on.
///
/// Service control is left to the operator, so stopping and starting services only logs.
#[derive(Debug, Clone)]
pub struct HostPlatform {
    /// File whose write access stands in for elevation
    probe: PathBuf,
}
impl HostPlatform {
    /// Creates a platform which checks privileges by opening `probe` for writing
    pub fn new(probe: impl Into<PathBuf>) -> Self {
        Self {
            probe: probe.into(),
        }
    }
}
impl Platform for HostPlatform {
    fn is_elevated(&self) -> Result<bool> {
        match OpenOptions::new().write(true).open(&self.probe) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(false),
            Err(e) => Err(Error::io(&self.probe)(e)),
        }
    }

    fn is_target_running(&self) -> Result<bool> {
        let sys = System::new_all();
        let running = sys
            .processes()
            .values()
            .find(|process| is_vmx_process(process.name()));
        if let Some(process) = running {
            info!("found running {} (pid {})", process.name(), process.pid());
        }
        Ok(running.is_some())
    }

    fn stop_services(&self) -> Result<()> {
        debug!("stop services");
        Ok(())
    }

    fn start_services(&self) -> Result<()> {
        debug!("start services");
        Ok(())
    }
}
