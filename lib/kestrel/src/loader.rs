// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Copies an opaque guest program into guest memory.

use crate::error::Error;
use crate::vmm::GuestRam;
use crate::Result;

/// The I/O port the demo guest writes to; COM1, by serial-console tradition.
pub const CONSOLE_PORT: u16 = 0x3f8;

/// A built-in guest: flat 16-bit real-mode code which writes a greeting to
/// [`CONSOLE_PORT`] one byte at a time, then halts.
///
/// ```text
///   mov dx, 0x3f8
///   mov al, 'h'   ; out dx, al
///   mov al, 'i'   ; out dx, al
///   mov al, '\n'  ; out dx, al
///   hlt
/// ```
pub const DEMO_GUEST: &[u8] = &[
    0xba, 0xf8, 0x03, // mov dx, 0x3f8
    0xb0, b'h', 0xee, // mov al, 'h'; out dx, al
    0xb0, b'i', 0xee, // mov al, 'i'; out dx, al
    0xb0, b'\n', 0xee, // mov al, '\n'; out dx, al
    0xf4, // hlt
];

/// Copy `program` into the region's backing buffer at a region-relative
/// `offset`.
///
/// This is a plain host-memory write: the buffer is the storage the kernel
/// reads as guest-physical memory, so the copy takes effect immediately and
/// no further registration is needed before running.  An oversized program
/// is rejected up front and leaves the region contents untouched.
pub fn load(ram: &GuestRam, program: &[u8], offset: usize) -> Result<()> {
    match offset.checked_add(program.len()) {
        Some(end) if end <= ram.len() => {}
        _ => {
            return Err(Error::ProgramTooLarge {
                offset: offset as u64,
                len: program.len(),
                size: ram.len(),
            })
        }
    }

    ram.write_bytes(offset, program)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::GuestAddr;

    fn test_ram() -> GuestRam {
        GuestRam::new(GuestAddr(0), 0x1000, 0).unwrap()
    }

    #[test]
    fn load_round_trip() {
        let ram = test_ram();
        load(&ram, DEMO_GUEST, 0x100).unwrap();

        let mut readback = vec![0u8; DEMO_GUEST.len()];
        ram.read_bytes(0x100, &mut readback).unwrap();
        assert_eq!(readback, DEMO_GUEST);
    }

    #[test]
    fn load_to_exact_end() {
        let ram = test_ram();
        let program = [0xf4u8; 16];
        load(&ram, &program, 0x1000 - 16).unwrap();
    }

    #[test]
    fn oversized_load_rejected() {
        let ram = test_ram();
        // Seed the target offset so we can observe it is left untouched.
        ram.write_bytes(0xff0, &[0xa5u8; 16]).unwrap();

        let program = [0x90u8; 32];
        match load(&ram, &program, 0xff0) {
            Err(Error::ProgramTooLarge { offset, len, size }) => {
                assert_eq!(offset, 0xff0);
                assert_eq!(len, 32);
                assert_eq!(size, 0x1000);
            }
            other => panic!("expected ProgramTooLarge, got {other:?}"),
        }

        let mut readback = [0u8; 16];
        ram.read_bytes(0xff0, &mut readback).unwrap();
        assert_eq!(readback, [0xa5u8; 16]);
    }

    #[test]
    fn oversized_offset_rejected() {
        let ram = test_ram();
        assert!(matches!(
            load(&ram, &[0xf4], usize::MAX),
            Err(Error::ProgramTooLarge { .. })
        ));
    }
}
