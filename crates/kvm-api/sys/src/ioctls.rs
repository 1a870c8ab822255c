// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! KVM ioctl request codes.
//!
//! Generated against `<linux/kvm.h>` by the `gen-kvm-ioctls` extraction
//! utility.  Do not edit by hand: the values encode the ioctl direction and
//! argument size bits for x86_64 Linux, so a layout change in the companion
//! structs requires regeneration rather than adjustment here.

// System ioctls (issued against the /dev/kvm control fd)
pub const KVM_GET_API_VERSION: u64 = 0xae00;
pub const KVM_CREATE_VM: u64 = 0xae01;
pub const KVM_CHECK_EXTENSION: u64 = 0xae03;
pub const KVM_GET_VCPU_MMAP_SIZE: u64 = 0xae04;

// VM ioctls
pub const KVM_CREATE_VCPU: u64 = 0xae41;
pub const KVM_SET_USER_MEMORY_REGION: u64 = 0x4020_ae46;

// vCPU ioctls
pub const KVM_RUN: u64 = 0xae80;
pub const KVM_GET_REGS: u64 = 0x8090_ae81;
pub const KVM_SET_REGS: u64 = 0x4090_ae82;
pub const KVM_GET_SREGS: u64 = 0x8138_ae83;
pub const KVM_SET_SREGS: u64 = 0x4138_ae84;

#[cfg(test)]
mod test {
    use super::*;
    use crate::structs::*;
    use std::mem::size_of;

    const IOC_WRITE: u64 = 1;
    const IOC_READ: u64 = 2;

    fn ioc_dir(cmd: u64) -> u64 {
        (cmd >> 30) & 0x3
    }
    fn ioc_size(cmd: u64) -> usize {
        ((cmd >> 16) & 0x3fff) as usize
    }
    fn ioc_type(cmd: u64) -> u64 {
        (cmd >> 8) & 0xff
    }

    /// The generated codes must agree with the struct definitions they carry:
    /// a size drift between the two means one side is out of date.
    #[test]
    fn codes_match_struct_sizes() {
        assert_eq!(
            ioc_size(KVM_SET_USER_MEMORY_REGION),
            size_of::<kvm_userspace_memory_region>()
        );
        assert_eq!(ioc_dir(KVM_SET_USER_MEMORY_REGION), IOC_WRITE);

        assert_eq!(ioc_size(KVM_GET_REGS), size_of::<kvm_regs>());
        assert_eq!(ioc_dir(KVM_GET_REGS), IOC_READ);
        assert_eq!(ioc_size(KVM_SET_REGS), size_of::<kvm_regs>());
        assert_eq!(ioc_dir(KVM_SET_REGS), IOC_WRITE);

        assert_eq!(ioc_size(KVM_GET_SREGS), size_of::<kvm_sregs>());
        assert_eq!(ioc_dir(KVM_GET_SREGS), IOC_READ);
        assert_eq!(ioc_size(KVM_SET_SREGS), size_of::<kvm_sregs>());
        assert_eq!(ioc_dir(KVM_SET_SREGS), IOC_WRITE);
    }

    /// Every KVM request lives in the 0xAE ioctl type.
    #[test]
    fn codes_share_kvm_type() {
        for cmd in [
            KVM_GET_API_VERSION,
            KVM_CREATE_VM,
            KVM_CHECK_EXTENSION,
            KVM_GET_VCPU_MMAP_SIZE,
            KVM_CREATE_VCPU,
            KVM_SET_USER_MEMORY_REGION,
            KVM_RUN,
            KVM_GET_REGS,
            KVM_SET_REGS,
            KVM_GET_SREGS,
            KVM_SET_SREGS,
        ] {
            assert_eq!(ioc_type(cmd), 0xae, "bad type field in {cmd:#x}");
        }
    }
}
