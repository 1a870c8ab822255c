// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human-readable renderings of vCPU register state.
//!
//! Presentation only: nothing here feeds back into the control logic.

use std::fmt::Write;

use kvm_api::{kvm_regs, kvm_segment, kvm_sregs};

/// Render the general-purpose register file as one aligned row per register.
pub fn regs_table(regs: &kvm_regs) -> String {
    let rows: &[(&str, u64)] = &[
        ("rax", regs.rax),
        ("rbx", regs.rbx),
        ("rcx", regs.rcx),
        ("rdx", regs.rdx),
        ("rsi", regs.rsi),
        ("rdi", regs.rdi),
        ("rsp", regs.rsp),
        ("rbp", regs.rbp),
        ("r8", regs.r8),
        ("r9", regs.r9),
        ("r10", regs.r10),
        ("r11", regs.r11),
        ("r12", regs.r12),
        ("r13", regs.r13),
        ("r14", regs.r14),
        ("r15", regs.r15),
        ("rip", regs.rip),
        ("rflags", regs.rflags),
    ];

    let mut out = String::new();
    for (name, value) in rows {
        writeln!(out, "{name:<8}{value:#018x} ({value})")
            .expect("writing to a string never fails");
    }
    out
}

fn segment_row(out: &mut String, name: &str, seg: &kvm_segment) {
    writeln!(
        out,
        "{name:<6}{:#018x} {:#010x} {:#06x}  {:#04x} {} {}   {}  {} {} {}",
        seg.base,
        seg.limit,
        seg.selector,
        seg.type_,
        seg.present,
        seg.dpl,
        seg.db,
        seg.s,
        seg.l,
        seg.g,
    )
    .expect("writing to a string never fails");
}

/// Render the special register file: segments with their descriptor-cache
/// fields, descriptor tables, and control registers.
pub fn sregs_table(sregs: &kvm_sregs) -> String {
    let mut out = String::new();

    writeln!(
        out,
        "{:<6}{:<19}{:<11}{:<7}{:<5}p dpl db s l g",
        "seg", "base", "limit", "sel", "type"
    )
    .expect("writing to a string never fails");

    segment_row(&mut out, "cs", &sregs.cs);
    segment_row(&mut out, "ds", &sregs.ds);
    segment_row(&mut out, "es", &sregs.es);
    segment_row(&mut out, "fs", &sregs.fs);
    segment_row(&mut out, "gs", &sregs.gs);
    segment_row(&mut out, "ss", &sregs.ss);
    segment_row(&mut out, "tr", &sregs.tr);
    segment_row(&mut out, "ldt", &sregs.ldt);

    writeln!(
        out,
        "gdt   {:#018x} limit={:#06x}",
        sregs.gdt.base, sregs.gdt.limit
    )
    .expect("writing to a string never fails");
    writeln!(
        out,
        "idt   {:#018x} limit={:#06x}",
        sregs.idt.base, sregs.idt.limit
    )
    .expect("writing to a string never fails");

    for (name, value) in [
        ("cr0", sregs.cr0),
        ("cr2", sregs.cr2),
        ("cr3", sregs.cr3),
        ("cr4", sregs.cr4),
        ("cr8", sregs.cr8),
        ("efer", sregs.efer),
        ("apic", sregs.apic_base),
    ] {
        writeln!(out, "{name:<6}{value:#018x} ({value})")
            .expect("writing to a string never fails");
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn regs_rows() {
        let mut regs = kvm_regs::default();
        regs.rip = 0x100;
        regs.rflags = 0x2;

        let table = regs_table(&regs);
        assert_eq!(table.lines().count(), 18);
        assert!(table.contains("rip     0x0000000000000100 (256)"));
        assert!(table.contains("rflags  0x0000000000000002 (2)"));
    }

    #[test]
    fn sregs_rows() {
        let mut sregs = kvm_sregs::default();
        sregs.cr0 = 0x60000010;

        let table = sregs_table(&sregs);
        // header + 8 segments + 2 dtables + 7 control registers
        assert_eq!(table.lines().count(), 18);
        assert!(table.contains("cr0   0x0000000060000010"));
    }
}
