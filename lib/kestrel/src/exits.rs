// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes transitions from the guest back to the monitor.

use kvm_api::{
    kvm_exit_code, kvm_run, KVM_EXIT_IO_IN, KVM_EXIT_IO_OUT,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IoPort {
    pub port: u16,
    pub bytes: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InoutReq {
    In(IoPort),
    Out(IoPort, u32),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MmioReq {
    pub addr: u64,
    pub bytes: u8,
    pub is_write: bool,
}

/// Why control returned to the monitor.  Produced from the shared run page
/// immediately after each VM entry returns; dispatchers are expected to
/// match exhaustively so new recognized kinds cannot fall through silently.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VmExitKind {
    /// The guest executed a halting instruction.  Expected termination.
    Halted,
    /// The guest touched an I/O port.
    Inout(InoutReq),
    /// The guest touched guest-physical space with no memory behind it.
    Mmio(MmioReq),
    /// Triple fault (or other kernel-initiated shutdown of the guest).
    Shutdown,
    /// Hardware VM entry failed; carries the hardware reason verbatim.
    FailEntry(u64),
    /// The in-kernel emulation gave up; carries the suberror code.
    InternalError(u32),
    /// An exit reason this monitor does not recognize, carried raw.
    Unknown(u32),
}

impl VmExitKind {
    /// Get the raw `KVM_EXIT` reason corresponding to this exit kind
    pub const fn code(&self) -> u32 {
        match self {
            VmExitKind::Halted => kvm_exit_code::KVM_EXIT_HLT as u32,
            VmExitKind::Inout(_) => kvm_exit_code::KVM_EXIT_IO as u32,
            VmExitKind::Mmio(_) => kvm_exit_code::KVM_EXIT_MMIO as u32,
            VmExitKind::Shutdown => kvm_exit_code::KVM_EXIT_SHUTDOWN as u32,
            VmExitKind::FailEntry(_) => {
                kvm_exit_code::KVM_EXIT_FAIL_ENTRY as u32
            }
            VmExitKind::InternalError(_) => {
                kvm_exit_code::KVM_EXIT_INTERNAL_ERROR as u32
            }
            VmExitKind::Unknown(code) => *code,
        }
    }

    /// Decode an exit from the head of the run page plus the page itself.
    ///
    /// `page` must be the entire mapped run page: for I/O exits the datum
    /// does not live in `kvm_run` but at `data_offset` within the page, with
    /// a width of `size` bytes.
    pub fn parse(run: &kvm_run, page: &[u8]) -> Self {
        let code = match kvm_exit_code::from_repr(run.exit_reason) {
            None => return VmExitKind::Unknown(run.exit_reason),
            Some(c) => c,
        };
        match code {
            kvm_exit_code::KVM_EXIT_HLT => VmExitKind::Halted,
            kvm_exit_code::KVM_EXIT_IO => {
                // Safety: exit_reason selects the `io` arm of the payload
                let io = unsafe { run.u.io };
                let port = IoPort { port: io.port, bytes: io.size };

                // String (rep-prefixed) I/O is not produced by the guests
                // this monitor supports; surface it raw rather than decode
                // only a fraction of it.
                if io.count != 1 {
                    return VmExitKind::Unknown(run.exit_reason);
                }
                match io.direction {
                    KVM_EXIT_IO_IN => VmExitKind::Inout(InoutReq::In(port)),
                    KVM_EXIT_IO_OUT => {
                        match read_io_value(page, io.data_offset, io.size) {
                            Some(value) => VmExitKind::Inout(InoutReq::Out(
                                port, value,
                            )),
                            None => VmExitKind::Unknown(run.exit_reason),
                        }
                    }
                    _ => VmExitKind::Unknown(run.exit_reason),
                }
            }
            kvm_exit_code::KVM_EXIT_MMIO => {
                // Safety: exit_reason selects the `mmio` arm of the payload
                let mmio = unsafe { run.u.mmio };
                VmExitKind::Mmio(MmioReq {
                    addr: mmio.phys_addr,
                    bytes: mmio.len as u8,
                    is_write: mmio.is_write != 0,
                })
            }
            kvm_exit_code::KVM_EXIT_SHUTDOWN => VmExitKind::Shutdown,
            kvm_exit_code::KVM_EXIT_FAIL_ENTRY => {
                // Safety: exit_reason selects the `fail_entry` arm
                let fail = unsafe { run.u.fail_entry };
                VmExitKind::FailEntry(fail.hardware_entry_failure_reason)
            }
            kvm_exit_code::KVM_EXIT_INTERNAL_ERROR => {
                // Safety: exit_reason selects the `internal` arm
                let internal = unsafe { run.u.internal };
                VmExitKind::InternalError(internal.suberror)
            }
            _ => VmExitKind::Unknown(run.exit_reason),
        }
    }
}

/// Pull an I/O datum of `size` bytes out of the run page at `offset`,
/// zero-extended to 32 bits.
fn read_io_value(page: &[u8], offset: u64, size: u8) -> Option<u32> {
    let len = usize::from(size);
    if len == 0 || len > 4 {
        return None;
    }
    let off = usize::try_from(offset).ok()?;
    let bytes = page.get(off..off.checked_add(len)?)?;

    let mut buf = [0u8; 4];
    buf[..len].copy_from_slice(bytes);
    Some(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod test {
    use super::*;
    use kvm_api::{kvm_run_io, kvm_run_mmio};

    fn run_with_reason(reason: kvm_exit_code) -> kvm_run {
        let mut run = kvm_run::default();
        run.exit_reason = reason as u32;
        run
    }

    #[test]
    fn parse_halt() {
        let run = run_with_reason(kvm_exit_code::KVM_EXIT_HLT);
        assert_eq!(VmExitKind::parse(&run, &[]), VmExitKind::Halted);
    }

    #[test]
    fn parse_io_out() {
        let mut run = run_with_reason(kvm_exit_code::KVM_EXIT_IO);
        run.u.io = kvm_run_io {
            direction: kvm_api::KVM_EXIT_IO_OUT,
            size: 1,
            port: 0x3f8,
            count: 1,
            data_offset: 0x100,
        };
        let mut page = vec![0u8; 0x200];
        page[0x100] = b'A';

        assert_eq!(
            VmExitKind::parse(&run, &page),
            VmExitKind::Inout(InoutReq::Out(
                IoPort { port: 0x3f8, bytes: 1 },
                b'A' as u32
            ))
        );
    }

    #[test]
    fn parse_io_out_word() {
        let mut run = run_with_reason(kvm_exit_code::KVM_EXIT_IO);
        run.u.io = kvm_run_io {
            direction: kvm_api::KVM_EXIT_IO_OUT,
            size: 2,
            port: 0x42,
            count: 1,
            data_offset: 0x10,
        };
        let mut page = vec![0u8; 0x20];
        page[0x10..0x12].copy_from_slice(&0xbeefu16.to_le_bytes());

        assert_eq!(
            VmExitKind::parse(&run, &page),
            VmExitKind::Inout(InoutReq::Out(
                IoPort { port: 0x42, bytes: 2 },
                0xbeef
            ))
        );
    }

    #[test]
    fn parse_io_in() {
        let mut run = run_with_reason(kvm_exit_code::KVM_EXIT_IO);
        run.u.io = kvm_run_io {
            direction: kvm_api::KVM_EXIT_IO_IN,
            size: 1,
            port: 0x60,
            count: 1,
            data_offset: 0,
        };
        assert_eq!(
            VmExitKind::parse(&run, &[0u8; 16]),
            VmExitKind::Inout(InoutReq::In(IoPort { port: 0x60, bytes: 1 }))
        );
    }

    #[test]
    fn parse_string_io_stays_raw() {
        let mut run = run_with_reason(kvm_exit_code::KVM_EXIT_IO);
        run.u.io = kvm_run_io {
            direction: kvm_api::KVM_EXIT_IO_OUT,
            size: 1,
            port: 0x3f8,
            count: 4,
            data_offset: 0,
        };
        assert_eq!(
            VmExitKind::parse(&run, &[0u8; 16]),
            VmExitKind::Unknown(kvm_exit_code::KVM_EXIT_IO as u32)
        );
    }

    #[test]
    fn parse_io_out_of_bounds_offset() {
        let mut run = run_with_reason(kvm_exit_code::KVM_EXIT_IO);
        run.u.io = kvm_run_io {
            direction: kvm_api::KVM_EXIT_IO_OUT,
            size: 4,
            port: 0x3f8,
            count: 1,
            data_offset: 0x1000,
        };
        // data_offset pointing past the mapping must not panic
        assert_eq!(
            VmExitKind::parse(&run, &[0u8; 16]),
            VmExitKind::Unknown(kvm_exit_code::KVM_EXIT_IO as u32)
        );
    }

    #[test]
    fn parse_mmio() {
        let mut run = run_with_reason(kvm_exit_code::KVM_EXIT_MMIO);
        run.u.mmio = kvm_run_mmio {
            phys_addr: 0xdead_0000,
            data: [0u8; 8],
            len: 4,
            is_write: 1,
        };
        assert_eq!(
            VmExitKind::parse(&run, &[]),
            VmExitKind::Mmio(MmioReq {
                addr: 0xdead_0000,
                bytes: 4,
                is_write: true
            })
        );
    }

    #[test]
    fn parse_unknown_reason() {
        let mut run = kvm_run::default();
        run.exit_reason = 0xffff;
        let kind = VmExitKind::parse(&run, &[]);
        assert_eq!(kind, VmExitKind::Unknown(0xffff));
        assert_eq!(kind.code(), 0xffff);
    }
}
