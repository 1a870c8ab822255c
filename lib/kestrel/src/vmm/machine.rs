// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Representation of a virtual machine's hardware.

use crate::common::GuestAddr;
use crate::error::Error;
use crate::vcpu::Vcpu;
use crate::vmm::{create_vm, GuestRam, VmmHdl};
use crate::Result;

/// The aggregate representation of a virtual machine: kernel handle, vCPU,
/// and registered guest memory.
pub struct Machine {
    pub hdl: VmmHdl,
    pub vcpus: Vec<Vcpu>,

    // Declared last: the kernel retains the backing buffer's host address,
    // so the RAM must outlive every handle above.
    pub ram: GuestRam,
}

impl Machine {
    /// The sole vCPU of this single-CPU machine.
    pub fn vcpu0(&self) -> &Vcpu {
        &self.vcpus[0]
    }
}

/// Builder object used to initialize a [`Machine`].
///
/// The construction order is fixed and deliberate: the control device is
/// opened and its API version validated, the VM created, guest memory
/// registered, and only then the vCPU brought up -- so no vCPU can ever run
/// against unregistered addresses.
///
/// # Example
///
/// ```no_run
/// use kestrel::common::GuestAddr;
/// use kestrel::vmm::Builder;
///
/// let machine = Builder::new().unwrap()
///     .add_mem_region(GuestAddr(0), 0x1000).unwrap()
///     .finalize().unwrap();
/// ```
pub struct Builder {
    inner_hdl: Option<VmmHdl>,
    ram: Option<GuestRam>,
}

impl Builder {
    /// Constructs a new builder object which may be used to produce a VM.
    ///
    /// Accesses the hypervisor control device and issues the commands to
    /// begin construction of the VM.
    pub fn new() -> Result<Self> {
        let hdl = create_vm()?;
        Ok(Self { inner_hdl: Some(hdl), ram: None })
    }

    /// Allocates and registers the guest's memory region at `[base,
    /// base + size)`, slot 0.  Exactly one region is supported.
    pub fn add_mem_region(
        mut self,
        base: GuestAddr,
        size: usize,
    ) -> Result<Self> {
        if self.ram.is_some() {
            return Err(Error::MemRegion("only one region is supported"));
        }
        let ram = GuestRam::new(base, size, 0)?;
        ram.register(self.inner_hdl.as_ref().unwrap())?;
        self.ram = Some(ram);
        Ok(self)
    }

    /// Consumes `self` and creates a new [`Machine`] with its single vCPU.
    pub fn finalize(mut self) -> Result<Machine> {
        let hdl = self.inner_hdl.take().unwrap();
        let ram = self
            .ram
            .take()
            .ok_or(Error::MemRegion("no memory region was added"))?;

        let vcpus = vec![Vcpu::new(&hdl, 0)?];

        Ok(Machine { hdl, vcpus, ram })
    }
}
