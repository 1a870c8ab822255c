// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Representation of a VM's kernel handles and guest memory.

pub mod hdl;
pub mod machine;
pub mod mem;

pub use hdl::*;
pub use machine::*;
pub use mem::*;
