// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Failure taxonomy for VM setup and execution.
//!
//! Every setup-phase variant is terminal: a half-initialized VM has no
//! recovery state, so callers are expected to abort rather than retry.

use std::io;

use crate::exits::VmExitKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The hypervisor control device could not be opened (absent, no
    /// permission, or virtualization disabled on the host).
    #[error("unable to open the KVM control device")]
    Device(#[source] io::Error),

    /// The kernel speaks a different interface version than the one all of
    /// our structure layouts are pinned against.  Nothing after this check
    /// is safe to attempt.
    #[error("KVM API version {0} did not match expectation {1}")]
    ApiVersion(u32, u32),

    #[error("VM creation failed")]
    VmCreate(#[source] io::Error),

    #[error("vCPU {0} creation failed")]
    VcpuCreate(i32, #[source] io::Error),

    /// A guest memory region violated a precondition (alignment, zero size).
    /// Raised before any kernel call is made.
    #[error("invalid guest memory region: {0}")]
    MemRegion(&'static str),

    /// Allocating the backing buffer or the kernel registration call itself
    /// failed.
    #[error("guest memory allocation or registration failed")]
    MemRegistration(#[source] io::Error),

    /// The run-page size query or the shared mapping over the vCPU failed.
    #[error("vCPU run page mapping failed")]
    RunPageMap(#[source] io::Error),

    /// The kernel rejected a written register file (e.g. an inconsistent
    /// segment/control-register combination).
    #[error("kernel rejected vCPU register state")]
    RegisterState(#[source] io::Error),

    #[error(
        "guest program of {len:#x} bytes at offset {offset:#x} \
         exceeds region size {size:#x}"
    )]
    ProgramTooLarge { offset: u64, len: usize, size: usize },

    /// The guest exited for a reason this monitor does not service.  The
    /// decoded (or raw) exit reason is preserved for diagnosis.
    #[error("fatal VM exit: {0:?}")]
    FatalExit(VmExitKind),

    /// The VM entry ioctl itself failed.
    #[error("VM entry failed")]
    Run(#[source] io::Error),
}
