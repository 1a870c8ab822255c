// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module responsible for communicating with the kernel hypervisor.
//!
//! Responsible for issuing commands to the KVM control device to create VMs,
//! and contains a wrapper struct ([`VmmHdl`]) encapsulating commands to the
//! underlying kernel object which represents a single VM.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use kvm_api::{ApiVersion, KvmCtlFd, VcpuFd};

use crate::error::Error;

/// Creates a new virtual machine.
///
/// Opens the KVM control device, validates the kernel interface version, and
/// only then asks for a VM.  A version mismatch aborts before any further
/// kernel call: every structure layout this crate moves across the boundary
/// is pinned to the expected version.
pub(crate) fn create_vm() -> Result<VmmHdl, Error> {
    let ctl = KvmCtlFd::open().map_err(Error::Device)?;

    let vers = ctl.api_version().map_err(Error::Device)?;
    check_api_version(vers, ApiVersion::current().into())?;

    let inner = ctl.create_vm().map_err(Error::VmCreate)?;

    Ok(VmmHdl {
        ctl,
        inner,
        #[cfg(test)]
        is_test_hdl: false,
    })
}

fn check_api_version(actual: u32, expected: u32) -> Result<(), Error> {
    if actual != expected {
        Err(Error::ApiVersion(actual, expected))
    } else {
        Ok(())
    }
}

/// A handle to an existing virtual machine.
///
/// Retains the control handle it was created from: the run-page size query
/// needed when vCPUs are built is system-scoped, not VM-scoped.
pub struct VmmHdl {
    ctl: KvmCtlFd,
    inner: kvm_api::VmFd,

    #[cfg(test)]
    /// Track if this VmmHdl belongs to a wholly fictitious Machine.
    is_test_hdl: bool,
}
impl VmmHdl {
    /// Accesses the raw file descriptor behind the VM.
    pub fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Sends an ioctl to the underlying VM fd.
    pub unsafe fn ioctl<T>(&self, cmd: u64, data: *mut T) -> io::Result<()> {
        #[cfg(test)]
        if self.is_test_hdl {
            // Lie about all ioctl results, since there is no real VM
            // underlying this handle.
            return Ok(());
        }

        self.inner.ioctl(cmd, data)?;
        Ok(())
    }

    /// Query the size of the shared run page to map over each vCPU fd.
    pub fn vcpu_mmap_size(&self) -> io::Result<usize> {
        #[cfg(test)]
        if self.is_test_hdl {
            return Ok(crate::common::PAGE_SIZE);
        }

        self.ctl.vcpu_mmap_size()
    }

    /// Installs host memory as guest-physical address space.
    ///
    /// The kernel retains `userspace_addr` after this call: the backing
    /// buffer must stay allocated, at a fixed host address, for as long as
    /// this handle lives.
    pub fn set_user_memory_region(
        &self,
        slot: u32,
        guest_phys_addr: u64,
        memory_size: u64,
        userspace_addr: u64,
    ) -> io::Result<()> {
        let mut region = kvm_api::kvm_userspace_memory_region {
            slot,
            flags: 0,
            guest_phys_addr,
            memory_size,
            userspace_addr,
        };
        unsafe {
            self.ioctl(kvm_api::ioctls::KVM_SET_USER_MEMORY_REGION, &mut region)
        }
    }

    /// Create a vCPU within this VM, identified by logical index `id`.
    pub fn create_vcpu(&self, id: i32) -> io::Result<VcpuFd> {
        self.inner.create_vcpu(id)
    }
}

#[cfg(test)]
impl VmmHdl {
    /// Build a VmmHdl instance suitable for unit tests, but nothing else,
    /// since it will not be backed by any real kernel VM.
    pub(crate) fn new_test(mem_size: usize) -> io::Result<Self> {
        use tempfile::tempfile;
        let fp = tempfile()?;
        fp.set_len(mem_size as u64)?;
        let ctl = unsafe { KvmCtlFd::new_raw(tempfile()?) };
        let inner = unsafe { kvm_api::VmFd::new_raw(fp) };
        Ok(Self { ctl, inner, is_test_hdl: true })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_gate() {
        let expect: u32 = ApiVersion::current().into();
        assert!(check_api_version(expect, expect).is_ok());

        match check_api_version(expect + 1, expect) {
            Err(Error::ApiVersion(actual, expected)) => {
                assert_eq!(actual, expect + 1);
                assert_eq!(expected, expect);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }
}
