// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel-shared KVM structures.
//!
//! These mirror the `<linux/kvm.h>` and `<asm/kvm.h>` definitions for x86_64
//! and are read/written in place by the kernel, so their layout is pinned by
//! the tests at the bottom of this file.

use crate::KVM_NR_INTERRUPTS;

/// Argument to `KVM_SET_USER_MEMORY_REGION`: installs `memory_size` bytes of
/// host memory at `userspace_addr` as guest-physical space starting at
/// `guest_phys_addr`.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_userspace_memory_region {
    pub slot: u32,
    pub flags: u32,
    pub guest_phys_addr: u64,
    pub memory_size: u64,
    pub userspace_addr: u64,
}

/// x86 segment register state, including the hidden descriptor-cache fields.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_segment {
    pub base: u64,
    pub limit: u32,
    pub selector: u16,
    pub type_: u8,
    pub present: u8,
    pub dpl: u8,
    pub db: u8,
    pub s: u8,
    pub l: u8,
    pub g: u8,
    pub avl: u8,
    pub unusable: u8,
    pub padding: u8,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_dtable {
    pub base: u64,
    pub limit: u16,
    pub padding: [u16; 3],
}

/// Special (segment/control/descriptor-table) register file, as moved by
/// `KVM_GET_SREGS`/`KVM_SET_SREGS`.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_sregs {
    pub cs: kvm_segment,
    pub ds: kvm_segment,
    pub es: kvm_segment,
    pub fs: kvm_segment,
    pub gs: kvm_segment,
    pub ss: kvm_segment,
    pub tr: kvm_segment,
    pub ldt: kvm_segment,
    pub gdt: kvm_dtable,
    pub idt: kvm_dtable,
    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub cr8: u64,
    pub efer: u64,
    pub apic_base: u64,
    pub interrupt_bitmap: [u64; (KVM_NR_INTERRUPTS + 63) / 64],
}

/// General-purpose register file, as moved by `KVM_GET_REGS`/`KVM_SET_REGS`.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_regs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

pub const KVM_EXIT_IO_IN: u8 = 0;
pub const KVM_EXIT_IO_OUT: u8 = 1;

/// `KVM_EXIT_IO` detail: the guest touched an I/O port.  The data itself sits
/// inside the run page at `data_offset` (relative to the start of the page),
/// `size * count` bytes of it.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_run_io {
    pub direction: u8,
    pub size: u8,
    pub port: u16,
    pub count: u32,
    pub data_offset: u64,
}

/// `KVM_EXIT_MMIO` detail.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_run_mmio {
    pub phys_addr: u64,
    pub data: [u8; 8],
    pub len: u32,
    pub is_write: u8,
}

/// `KVM_EXIT_FAIL_ENTRY` detail.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct kvm_run_fail_entry {
    pub hardware_entry_failure_reason: u64,
    pub cpu: u32,
}

/// `KVM_EXIT_INTERNAL_ERROR` detail.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct kvm_run_internal {
    pub suberror: u32,
    pub ndata: u32,
    pub data: [u64; 16],
}
impl Default for kvm_run_internal {
    fn default() -> Self {
        Self { suberror: 0, ndata: 0, data: [0u64; 16] }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union kvm_run_payload {
    /// KVM_EXIT_UNKNOWN
    pub hw: u64,
    pub fail_entry: kvm_run_fail_entry,
    pub io: kvm_run_io,
    pub mmio: kvm_run_mmio,
    pub internal: kvm_run_internal,
    // sized to zero entire union
    empty: [u64; 32],
}
impl Default for kvm_run_payload {
    fn default() -> Self {
        Self { empty: [0u64; 32] }
    }
}

/// Head of the run page shared between the kernel and the monitor.
///
/// The kernel-reported mmap size (`KVM_GET_VCPU_MMAP_SIZE`) exceeds this
/// struct: the remainder of the page holds transient data the payload points
/// into (notably the I/O data at `kvm_run_io::data_offset`).  This type is a
/// view of the head only and must never be used to size the mapping.
#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct kvm_run {
    // in
    pub request_interrupt_window: u8,
    pub immediate_exit: u8,
    padding1: [u8; 6],

    // out
    pub exit_reason: u32,
    pub ready_for_interrupt_injection: u8,
    pub if_flag: u8,
    pub flags: u16,

    // in (pre-run), out (post-run)
    pub cr8: u64,
    pub apic_base: u64,

    pub u: kvm_run_payload,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn struct_sizes() {
        assert_eq!(size_of::<kvm_userspace_memory_region>(), 32);
        assert_eq!(size_of::<kvm_segment>(), 24);
        assert_eq!(size_of::<kvm_dtable>(), 16);
        assert_eq!(size_of::<kvm_sregs>(), 312);
        assert_eq!(size_of::<kvm_regs>(), 144);
        assert_eq!(size_of::<kvm_run_io>(), 16);
        assert_eq!(size_of::<kvm_run_payload>(), 256);
    }

    #[test]
    fn run_head_offsets() {
        assert_eq!(offset_of!(kvm_run, exit_reason), 8);
        assert_eq!(offset_of!(kvm_run, cr8), 16);
        assert_eq!(offset_of!(kvm_run, u), 32);
    }
}
