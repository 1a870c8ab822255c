// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use strum::FromRepr;

/// Reasons the kernel reports for control returning to the monitor, as
/// written to `kvm_run::exit_reason`.
///
/// Codes not covered here remain representable as the raw `u32`, via the
/// fallible [`kvm_exit_code::from_repr`] conversion.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromRepr)]
#[allow(non_camel_case_types)]
pub enum kvm_exit_code {
    KVM_EXIT_UNKNOWN = 0,
    KVM_EXIT_EXCEPTION = 1,
    KVM_EXIT_IO = 2,
    KVM_EXIT_HYPERCALL = 3,
    KVM_EXIT_DEBUG = 4,
    KVM_EXIT_HLT = 5,
    KVM_EXIT_MMIO = 6,
    KVM_EXIT_IRQ_WINDOW_OPEN = 7,
    KVM_EXIT_SHUTDOWN = 8,
    KVM_EXIT_FAIL_ENTRY = 9,
    KVM_EXIT_INTR = 10,
    KVM_EXIT_SET_TPR = 11,
    KVM_EXIT_TPR_ACCESS = 12,
    KVM_EXIT_NMI = 16,
    KVM_EXIT_INTERNAL_ERROR = 17,
    KVM_EXIT_OSI = 18,
    KVM_EXIT_SYSTEM_EVENT = 24,
    KVM_EXIT_X86_RDMSR = 29,
    KVM_EXIT_X86_WRMSR = 30,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_code_round_trip() {
        assert_eq!(kvm_exit_code::from_repr(5), Some(kvm_exit_code::KVM_EXIT_HLT));
        assert_eq!(kvm_exit_code::from_repr(2), Some(kvm_exit_code::KVM_EXIT_IO));
        // gaps in the table stay unrecognized rather than aliasing
        assert_eq!(kvm_exit_code::from_repr(13), None);
        assert_eq!(kvm_exit_code::from_repr(0xffff), None);
    }
}
