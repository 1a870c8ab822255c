// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod enums;
pub mod ioctls;
mod structs;

pub use enums::*;
pub use ioctls::*;
pub use structs::*;

/// This is the KVM API version against which kvm_api expects to operate.  All
/// constants and structs defined by the crate are done so in terms of that
/// specific version.
pub const KVM_CURRENT_INTERFACE_VERSION: u32 = 12;

/// Interrupt vectors covered by the `interrupt_bitmap` in [`kvm_sregs`].
pub const KVM_NR_INTERRUPTS: usize = 256;
