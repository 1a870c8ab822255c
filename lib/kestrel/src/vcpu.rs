// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual CPU functionality.

use std::os::unix::io::AsRawFd;

use kvm_api::{ioctls, kvm_regs, kvm_run, kvm_sregs, VcpuFd};

use crate::common::GuestAddr;
use crate::error::Error;
use crate::exits::VmExitKind;
use crate::vmm::{Mapping, Prot, VmmHdl};
use crate::Result;

/// Reserved bit 1 of RFLAGS, the only bit architecturally required to be set.
const RFLAGS_RESERVED: u64 = 1 << 1;

/// A handle to a virtual CPU.
pub struct Vcpu {
    fd: VcpuFd,
    pub id: i32,

    /// The kernel-shared run page, mapped over the vCPU fd with the size the
    /// kernel reported.  Written by the kernel on every exit; only consulted
    /// between runs.
    run_page: Mapping,
}

impl Vcpu {
    /// Creates a virtual CPU within the VM and maps its run page.
    ///
    /// The mapping size comes from a query against the control handle; the
    /// kernel stores transient data beyond the `kvm_run` head there, so a
    /// guessed size is never acceptable.
    pub(crate) fn new(hdl: &VmmHdl, id: i32) -> Result<Self> {
        let fd =
            hdl.create_vcpu(id).map_err(|e| Error::VcpuCreate(id, e))?;

        let size = hdl.vcpu_mmap_size().map_err(Error::RunPageMap)?;
        let run_page =
            Mapping::new_shared(size, Prot::RW, fd.as_raw_fd(), 0)
                .map_err(Error::RunPageMap)?;

        Ok(Self { fd, id, run_page })
    }

    /// Gets the general-purpose register file.
    pub fn get_regs(&self) -> Result<kvm_regs> {
        let mut regs = kvm_regs::default();
        unsafe { self.fd.ioctl(ioctls::KVM_GET_REGS, &mut regs) }
            .map_err(Error::RegisterState)?;
        Ok(regs)
    }

    /// Sets the general-purpose register file.
    pub fn set_regs(&self, regs: &kvm_regs) -> Result<()> {
        let mut regs = *regs;
        unsafe { self.fd.ioctl(ioctls::KVM_SET_REGS, &mut regs) }
            .map_err(Error::RegisterState)?;
        Ok(())
    }

    /// Gets the special (segment/control) register file.
    pub fn get_sregs(&self) -> Result<kvm_sregs> {
        let mut sregs = kvm_sregs::default();
        unsafe { self.fd.ioctl(ioctls::KVM_GET_SREGS, &mut sregs) }
            .map_err(Error::RegisterState)?;
        Ok(sregs)
    }

    /// Sets the special (segment/control) register file.
    ///
    /// The contents are caller-determined; nothing here assumes the flat
    /// model that [`Vcpu::setup_flat_mode`] happens to install.
    pub fn set_sregs(&self, sregs: &kvm_sregs) -> Result<()> {
        let mut sregs = *sregs;
        unsafe { self.fd.ioctl(ioctls::KVM_SET_SREGS, &mut sregs) }
            .map_err(Error::RegisterState)?;
        Ok(())
    }

    /// Establish flat, unpaged addressing and aim the vCPU at its first
    /// instruction.
    ///
    /// All segment bases and selectors are zeroed, so guest linear addresses
    /// equal guest physical addresses within the registered region -- no
    /// guest page tables required.  The special registers are committed
    /// first; the general registers written afterwards (`rip = entry`,
    /// `rsp = stack`, remaining GPRs zero) are interpreted under that
    /// addressing mode.  Both must land before the first run.
    pub fn setup_flat_mode(
        &self,
        entry: GuestAddr,
        stack: GuestAddr,
    ) -> Result<()> {
        let mut sregs = self.get_sregs()?;
        flatten_segments(&mut sregs);
        self.set_sregs(&sregs)?;

        let mut regs = kvm_regs::default();
        regs.rip = entry.0;
        regs.rsp = stack.0;
        regs.rflags = RFLAGS_RESERVED;
        self.set_regs(&regs)
    }

    /// Executes the guest by running the virtual CPU.
    ///
    /// Blocks the calling thread until the vCPU returns execution, and
    /// decodes the reason for exiting from the shared run page.  This is the
    /// monitor's only suspension point, and it is not cancellable.
    pub fn run(&self) -> Result<VmExitKind> {
        self.fd.ioctl_usize(ioctls::KVM_RUN, 0).map_err(Error::Run)?;

        let head: kvm_run =
            self.run_page.read(0).map_err(Error::Run)?;
        // Safety: the VM entry above has returned, so the kernel is not
        // concurrently writing the run page.
        let page = unsafe { self.run_page.as_bytes() };
        Ok(VmExitKind::parse(&head, page))
    }
}

/// Zero the base and selector of every addressable segment, leaving the
/// remaining mode bits as the kernel initialized them.
fn flatten_segments(sregs: &mut kvm_sregs) {
    for seg in [
        &mut sregs.cs,
        &mut sregs.ds,
        &mut sregs.es,
        &mut sregs.fs,
        &mut sregs.gs,
        &mut sregs.ss,
    ] {
        seg.base = 0;
        seg.selector = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// With every segment flattened, translation over the region is the
    /// identity: a guest-linear address A lands at host offset A - base.
    #[test]
    fn flat_segments_are_identity() {
        let mut sregs = kvm_sregs::default();
        sregs.cs.base = 0xffff_0000;
        sregs.cs.selector = 0xf000;
        sregs.ds.base = 0x1000;
        sregs.ss.selector = 0x10;

        flatten_segments(&mut sregs);

        for seg in
            [&sregs.cs, &sregs.ds, &sregs.es, &sregs.fs, &sregs.gs, &sregs.ss]
        {
            assert_eq!(seg.base, 0);
            assert_eq!(seg.selector, 0);
        }
    }
}
