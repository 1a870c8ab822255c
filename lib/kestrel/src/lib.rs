// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal monitor for KVM guests: one VM, one vCPU, one flat memory
//! region, and a run loop that services a single console I/O trap.

pub extern crate kvm_api;
#[macro_use]
extern crate bitflags;

pub mod common;
pub mod error;
pub mod exits;
pub mod loader;
pub mod vcpu;
pub mod vmm;

pub use error::Error;
pub use exits::VmExitKind;
pub use vmm::Machine;

pub type Result<T> = std::result::Result<T, Error>;

pub fn version() -> &'static str {
    lazy_static::lazy_static! {
        static ref VERSION: String = {
            use std::fmt::Write;

            let mut version = format!("v{}", env!("CARGO_PKG_VERSION"));
            match kvm_api::api_version() {
                Ok(v) => {
                    write!(version, ", KVM API v{v}")
                        .expect("writing to a string never fails");
                }
                Err(_) => {
                    version.push_str(", <unknown KVM API version>");
                }
            }
            version
        };
    };
    &VERSION
}
