// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use kestrel::common::GuestAddr;
use kestrel::exits::{InoutReq, VmExitKind};
use kestrel::loader;
use kestrel::vcpu::Vcpu;
use kestrel::vmm::{Builder, Machine};
use kestrel::Error;

use slog::{o, Drain};

mod config;
mod dump;

/// What the dispatcher decided to do with an exit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Step {
    /// A value of the given width was written to the console port; emit it
    /// and resume the guest where it trapped.
    Console(u32, u8),
    /// Expected successful termination.
    Halt,
    /// Anything this monitor does not service.  One occurrence ends the
    /// session.
    Fatal,
}

/// Classify an exit against the single trap this monitor recognizes: a write
/// to the console port.  Everything else -- reads from any port, writes
/// elsewhere, MMIO, entry failures, unknown reasons -- is fatal rather than
/// silently ignored, since an unexpected trap means a broken guest or a
/// broken monitor.
fn dispatch(exit: &VmExitKind, console_port: u16) -> Step {
    match exit {
        VmExitKind::Halted => Step::Halt,
        VmExitKind::Inout(InoutReq::Out(io, value))
            if io.port == console_port =>
        {
            Step::Console(*value, io.bytes)
        }
        VmExitKind::Inout(_)
        | VmExitKind::Mmio(_)
        | VmExitKind::Shutdown
        | VmExitKind::FailEntry(_)
        | VmExitKind::InternalError(_)
        | VmExitKind::Unknown(_) => Step::Fatal,
    }
}

fn vcpu_loop(
    vcpu: &Vcpu,
    console_port: u16,
    log: &slog::Logger,
) -> anyhow::Result<()> {
    let mut console = std::io::stdout();
    loop {
        let exit = vcpu.run()?;
        match dispatch(&exit, console_port) {
            Step::Console(value, bytes) => {
                let data = value.to_le_bytes();
                console
                    .write_all(&data[..usize::from(bytes).min(4)])
                    .and_then(|_| console.flush())
                    .context("console write failed")?;
                slog::debug!(
                    log, "console write";
                    "port" => console_port, "value" => value, "bytes" => bytes
                );
            }
            Step::Halt => {
                slog::info!(log, "guest halted");
                return Ok(());
            }
            Step::Fatal => {
                slog::error!(
                    log, "unhandled exit {:?}", exit;
                    "reason" => exit.code()
                );
                return Err(Error::FatalExit(exit).into());
            }
        }
    }
}

fn setup_instance(
    config: &config::Config,
    log: &slog::Logger,
) -> anyhow::Result<Machine> {
    let mem_size = config
        .main
        .memory_kib
        .checked_mul(1024)
        .context("guest memory size overflows")?;

    let machine = Builder::new()
        .context("failed to create VM")?
        .add_mem_region(GuestAddr(0), mem_size)
        .context("failed to set up guest memory")?
        .finalize()
        .context("failed to set up vCPU")?;
    slog::info!(
        log, "VM created";
        "name" => &config.main.name,
        "memory_kib" => config.main.memory_kib,
        "vm_fd" => machine.hdl.fd()
    );

    let program = match &config.main.guest {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("cannot read guest program {path}"))?,
        None => loader::DEMO_GUEST.to_vec(),
    };
    let load_offset = usize::try_from(config.main.load_offset)
        .context("load offset overflows")?;
    loader::load(&machine.ram, &program, load_offset)
        .context("failed to load guest program")?;
    slog::info!(
        log, "guest program loaded";
        "bytes" => program.len(), "offset" => config.main.load_offset
    );

    let entry = machine.ram.base() + load_offset;
    let stack = machine.ram.base() + machine.ram.len();
    let vcpu = machine.vcpu0();
    vcpu.setup_flat_mode(entry, stack)
        .context("failed to initialize vCPU registers")?;
    slog::info!(
        log, "vCPU initialized";
        "vcpu" => vcpu.id, "rip" => entry.0, "rsp" => stack.0
    );

    Ok(machine)
}

fn build_log() -> (slog::Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (slog::Logger::root(drain.fuse(), o!()), guard)
}

#[derive(clap::Parser)]
/// Command-line frontend for booting a single-vCPU KVM guest.
struct Args {
    /// VM config file; omit to boot the built-in demo guest.
    #[clap(value_name = "CONFIG", action)]
    target: Option<String>,

    /// Dump the vCPU register files after the guest halts.
    #[clap(short, long, action)]
    dump_state: bool,
}

fn main() -> anyhow::Result<()> {
    let Args { target, dump_state } = Args::parse();

    let (log, _log_async_guard) = build_log();

    let config = match target {
        Some(path) => config::parse(&path)?,
        None => config::Config::demo(),
    };

    let machine = setup_instance(&config, &log)?;
    slog::info!(log, "starting instance"; "version" => kestrel::version());

    let result = vcpu_loop(machine.vcpu0(), config.main.console_port, &log);

    if dump_state {
        let vcpu = machine.vcpu0();
        print!("{}", dump::regs_table(&vcpu.get_regs()?));
        print!("{}", dump::sregs_table(&vcpu.get_sregs()?));
    }

    result
}

#[cfg(test)]
mod test {
    use super::*;
    use kestrel::exits::{IoPort, MmioReq};

    const CON: u16 = 0x3f8;

    fn out(port: u16, value: u32) -> VmExitKind {
        VmExitKind::Inout(InoutReq::Out(IoPort { port, bytes: 1 }, value))
    }

    #[test]
    fn halt_terminates() {
        assert_eq!(dispatch(&VmExitKind::Halted, CON), Step::Halt);
    }

    #[test]
    fn console_writes_then_halt() {
        // A guest which writes N times then halts maps to N console steps
        // followed by a single halt, in order.
        let exits = [out(CON, b'h'.into()), out(CON, b'i'.into()),
            out(CON, b'\n'.into()), VmExitKind::Halted];
        let steps: Vec<Step> =
            exits.iter().map(|e| dispatch(e, CON)).collect();
        assert_eq!(
            steps,
            vec![
                Step::Console(b'h'.into(), 1),
                Step::Console(b'i'.into(), 1),
                Step::Console(b'\n'.into(), 1),
                Step::Halt,
            ]
        );
    }

    #[test]
    fn wide_console_write() {
        let exit = VmExitKind::Inout(InoutReq::Out(
            IoPort { port: CON, bytes: 2 },
            0x6968,
        ));
        assert_eq!(dispatch(&exit, CON), Step::Console(0x6968, 2));
    }

    #[test]
    fn unrecognized_port_is_fatal() {
        assert_eq!(dispatch(&out(0x80, 0), CON), Step::Fatal);
    }

    #[test]
    fn port_read_is_fatal() {
        let exit = VmExitKind::Inout(InoutReq::In(IoPort {
            port: CON,
            bytes: 1,
        }));
        assert_eq!(dispatch(&exit, CON), Step::Fatal);
    }

    #[test]
    fn other_exits_are_fatal() {
        for exit in [
            VmExitKind::Shutdown,
            VmExitKind::FailEntry(0x80000021),
            VmExitKind::InternalError(1),
            VmExitKind::Unknown(0xffff),
            VmExitKind::Mmio(MmioReq {
                addr: 0xf000_0000,
                bytes: 4,
                is_write: true,
            }),
        ] {
            assert_eq!(dispatch(&exit, CON), Step::Fatal);
        }
    }
}
