//! End-to-end translator scenarios: block construction, lookup, ring
//! eviction, self-modifying-code response and branch cycle accounting.

use dyn86::codegen::cache::block_is_indexed;
use dyn86::codegen::timing::TimingKind;
use dyn86::codegen::{BlockHandle, BLOCK_GPF_OFFSET, BLOCK_MAX, BLOCK_SIZE};
use dyn86::cpu::CpuStatus;
use dyn86::mem::Bus;
use dyn86::{Core, RamBus};

type TestCore = Core<RamBus>;

unsafe extern "sysv64" fn nop_op(_ctx: *mut u8, _fetchdat: u32) -> u32 {
    0
}

fn core() -> TestCore {
    let mut c = Core::builder(RamBus::new(0x100000)).build().unwrap();
    c.cpu.cur_status = (CpuStatus::USE32 | CpuStatus::STACK32).bits();
    c
}

/// How far the interpreter would advance over the tested opcodes.
fn interp_len(opcode: u8) -> u32 {
    match opcode {
        0x90..=0x97 => 0,
        0x86 | 0x87 => 1,
        0xa0..=0xa3 => 4,
        0xb8..=0xbf => 4,
        0x50..=0x5f => 0,
        0xeb => 1,
        0xe9 => 4,
        _ => 0,
    }
}

/// Drives the build protocol over guest code at `phys` the way the outer
/// execution loop does: fetch, bump PC past the opcode, hand the rest to
/// the dispatcher, then emulate the interpreter's own PC advance.
fn translate_block(core: &mut TestCore, phys: u32, max_ins: usize) -> BlockHandle {
    core.cpu.pc = phys;
    let handle = core.codegen_block_init(phys);
    core.codegen_block_start_recompile(handle);

    let mut count = 0;
    while !core.jit.cpu_block_end && count < max_ins {
        let pc0 = core.cpu.pc;
        core.cpu.oldpc = pc0;
        let fetchdat = core.bus.fetch_dword(&mut core.cpu, pc0);
        let opcode = fetchdat as u8;
        core.cpu.pc = pc0.wrapping_add(1);
        core.codegen_generate_call(opcode, nop_op, fetchdat >> 8, core.cpu.pc, pc0);
        core.cpu.pc = core.cpu.pc.wrapping_add(interp_len(opcode));
        count += 1;
    }
    core.codegen_block_end_recompile(handle);
    handle
}

#[test]
fn builds_a_simple_block() {
    let mut c = core();
    // MOV EAX, 0x12345678; NOP; JMP short back.
    let code: &[u8] = &[0xb8, 0x78, 0x56, 0x34, 0x12, 0x90, 0xeb, 0xf9];
    c.bus.ram_mut()[0x1000..0x1000 + code.len()].copy_from_slice(code);

    let h = translate_block(&mut c, 0x1000, 16);
    let block = c.jit.block(h);
    assert!(block.valid);
    assert!(block.was_recompiled);
    assert_eq!(block.ins, 3);
    assert_eq!(block.phys, 0x1000);

    // Invariant: emitted code stays under the soft cap, epilogue intact.
    assert!(c.jit.block_pos <= BLOCK_GPF_OFFSET);
    let emitted = c.jit.code(h);
    assert_eq!(emitted[0], 0x53); // prologue PUSH RBX
    assert_eq!(emitted[dyn86::codegen::BLOCK_EXIT_OFFSET + 10], 0xc3);

    // Invariant 1: reachable through hash-or-tree and the page list.
    assert!(block_is_indexed(&c.jit, h, &c.pages));
    assert_eq!(c.codeblock_find(0x1000), h);
}

#[test]
fn lookup_rejects_mismatched_mode() {
    let mut c = core();
    c.bus.ram_mut()[0x2000..0x2002].copy_from_slice(&[0xeb, 0xfe]);
    let h = translate_block(&mut c, 0x2000, 4);
    assert_eq!(c.codeblock_find(0x2000), h);

    // A block compiled for 32-bit code must not serve a 16-bit context.
    c.cpu.cur_status = 0;
    assert!(c.codeblock_find(0x2000).is_none());
}

#[test]
fn tree_distinguishes_code_segment_bases() {
    let mut c = core();
    c.bus.ram_mut()[0x3000..0x3002].copy_from_slice(&[0xeb, 0xfe]);

    let h1 = translate_block(&mut c, 0x3000, 4);
    c.cpu.segs[1].base = 0x1_0000; // different CS base, same physical page
    let h2 = translate_block(&mut c, 0x3000, 4);
    assert_ne!(h1, h2);

    assert_eq!(c.codeblock_find(0x3000), h2);
    c.cpu.segs[1].base = 0;
    assert_eq!(c.codeblock_find(0x3000), h1);
}

#[test]
fn scenario_e_smc_eviction() {
    let mut c = core();
    // 0x70 NOPs starting at 0x1200, then a short JMP: the block covers two
    // 64-byte cells.
    for i in 0..0x70 {
        c.bus.ram_mut()[0x1200 + i] = 0x90;
    }
    c.bus.ram_mut()[0x1270] = 0xeb;
    c.bus.ram_mut()[0x1271] = 0xfe;

    let h = translate_block(&mut c, 0x1200, 0x80);
    assert!(c.jit.block(h).page_mask.count_ones() >= 2);
    assert!(!c.jit.is_dirty(h, &c.pages));

    // A guest write into the second cell dirties the page...
    c.pages.set_dirty(0x1240);
    assert!(c.jit.is_dirty(h, &c.pages));

    // ...and the next dispatch detects the overlap and evicts.
    assert!(c.jit.smc_check_and_flush(h, &mut c.pages));
    assert!(!c.jit.block(h).valid);
    assert!(c.codeblock_find(0x1200).is_none());

    // The dirty bits were consumed and retranslation succeeds.
    let h2 = translate_block(&mut c, 0x1200, 0x80);
    assert!(c.jit.block(h2).valid);
    assert!(!c.jit.is_dirty(h2, &c.pages));
}

#[test]
fn invariant_2_eviction_keeps_lists_consistent() {
    let mut c = core();
    c.bus.ram_mut()[0x5000..0x5002].copy_from_slice(&[0xeb, 0xfe]);
    c.bus.ram_mut()[0x5040..0x5042].copy_from_slice(&[0xeb, 0xfe]);
    c.bus.ram_mut()[0x5080..0x5082].copy_from_slice(&[0xeb, 0xfe]);

    let h1 = translate_block(&mut c, 0x5000, 4);
    let h2 = translate_block(&mut c, 0x5040, 4);
    let h3 = translate_block(&mut c, 0x5080, 4);

    // Dirty only the middle block's cell.
    c.pages.set_dirty(0x5040);
    assert!(c.jit.smc_check_and_flush(h2, &mut c.pages));
    assert!(!c.jit.block(h2).valid);

    // The survivors stay fully indexed and the list has no dangling link.
    assert!(c.jit.block(h1).valid);
    assert!(c.jit.block(h3).valid);
    assert!(block_is_indexed(&c.jit, h1, &c.pages));
    assert!(block_is_indexed(&c.jit, h3, &c.pages));
}

#[test]
fn ring_wraparound_evicts_the_previous_tenant() {
    let mut c = core();
    c.bus.ram_mut()[0x6000..0x6002].copy_from_slice(&[0xeb, 0xfe]);
    let first = translate_block(&mut c, 0x6000, 4);
    assert!(c.jit.block(first).valid);

    // Exhausting the ring lands back on the same slot.
    for i in 0..BLOCK_SIZE {
        let phys = 0x7000 + (i as u32 & 0xfff) * 4 + ((i as u32 >> 12) << 14);
        c.cpu.pc = phys;
        let _ = c.codegen_block_init(phys);
        c.jit.endpc = phys + 2;
        c.codegen_block_end();
    }
    assert!(!c.jit.block(first).valid, "wraparound must evict");
}

#[test]
fn scenario_f_branch_cycle_accounting() {
    // On a pairing part the taken-branch cycles are deducted before the
    // branch and credited back as a pending delta for the fall-through
    // path; parts without branch pairing flush cleanly.
    let drive_branch = |timing: TimingKind| -> i32 {
        let mut c = Core::builder(RamBus::new(0x100000))
            .with_timing(timing)
            .build()
            .unwrap();
        c.cpu.cur_status = CpuStatus::USE32.bits();
        c.bus.ram_mut()[0x1000..0x1005].copy_from_slice(&[0xe9, 0x00, 0x01, 0x00, 0x00]);

        c.cpu.pc = 0x1000;
        let h = c.codegen_block_init(0x1000);
        c.codegen_block_start_recompile(h);
        c.cpu.oldpc = 0x1000;
        let fetchdat = c.bus.fetch_dword(&mut c.cpu, 0x1000);
        c.cpu.pc = 0x1001;
        c.codegen_generate_call(0xe9, nop_op, fetchdat >> 8, 0x1001, 0x1000);
        let pending = c.jit.pending_cycles();
        c.codegen_block_end_recompile(h);
        pending
    };

    assert_eq!(drive_branch(TimingKind::K6), 1);
    assert_eq!(drive_branch(TimingKind::I486), 0);
}

#[test]
fn invariant_9_block_never_exceeds_block_max() {
    let mut c = core();
    // A long run of MOV imm32 instructions forces the cap.
    let mut addr = 0x8000usize;
    for _ in 0..512 {
        c.bus.ram_mut()[addr] = 0xb8;
        addr += 5;
    }
    let h = translate_block(&mut c, 0x8000, 4096);
    assert!(c.jit.block(h).valid);
    // The builder stops at the soft cap and the epilogue still fits in
    // front of the reserved tails.
    assert!(c.jit.block_pos <= BLOCK_GPF_OFFSET);
    assert!(c.jit.block_pos >= BLOCK_MAX);
}

#[test]
fn recompiled_mov_updates_the_stored_pc() {
    let mut c = core();
    c.bus.ram_mut()[0x9000..0x9007].copy_from_slice(&[0xb8, 1, 0, 0, 0, 0xeb, 0xfe]);
    let h = translate_block(&mut c, 0x9000, 4);

    // The MOV was recompiled: the emitted code must contain a store of the
    // follow-on PC (0x9005) to cpu_state.pc.
    let disp = dyn86::codegen::disp8(dyn86::codegen::offsets::pc());
    let code = c.jit.code(h).to_vec();
    let needle = [0xc7, 0x45, disp, 0x05, 0x90, 0x00, 0x00];
    let found = code.windows(needle.len()).any(|w| w == needle);
    assert!(found, "PC store for the recompiled MOV not found");
}

#[test]
fn fpu_escape_marks_the_block_and_calls_out() {
    let mut c = core();
    // FLD1 (D9 E8), then JMP.
    c.bus.ram_mut()[0xa000..0xa004].copy_from_slice(&[0xd9, 0xe8, 0xeb, 0xfe]);
    let h = translate_block(&mut c, 0xa000, 4);
    assert!(c
        .jit
        .block(h)
        .flags
        .contains(dyn86::codegen::BlockFlags::HAS_FPU));
    // The escape emitted an interpreter call (MOV RAX, imm64; CALL RAX).
    let code = c.jit.code(h).to_vec();
    let found = code.windows(2).any(|w| w == [0xff, 0xd0]);
    assert!(found);
}

#[test]
fn recompiles_accumulator_moves_and_xchg() {
    let mut c = core();
    // MOV EAX, [0x2000]; XCHG EAX, ECX; MOV [0x2004], EAX; JMP short.
    let code: &[u8] = &[
        0xa1, 0x00, 0x20, 0x00, 0x00, // A1 moffs32
        0x91, // XCHG EAX, ECX
        0xa3, 0x04, 0x20, 0x00, 0x00, // A3 moffs32
        0xeb, 0xfe,
    ];
    c.bus.ram_mut()[0xc000..0xc000 + code.len()].copy_from_slice(code);

    let h = translate_block(&mut c, 0xc000, 8);
    assert_eq!(c.jit.block(h).ins, 4);

    let emitted = c.jit.code(h).to_vec();
    // The moffs forms went through the inline TLB fast path: the 64-bit
    // miss compare appears in the stream.
    let tlb_compares = emitted
        .windows(4)
        .filter(|w| *w == [0x48, 0x83, 0xfe, 0xff])
        .count();
    assert!(tlb_compares >= 2, "expected inline TLB sequences");
    // The XCHG emitted the 32-bit register exchange.
    let found_xchg = emitted.windows(2).any(|w| w[0] == 0x45 && w[1] == 0x87);
    assert!(found_xchg);
}

#[test]
fn push_pop_pair_is_recompiled_inline() {
    let mut c = core();
    // PUSH EAX; POP ECX; JMP short.
    c.bus.ram_mut()[0xd000..0xd004].copy_from_slice(&[0x50, 0x59, 0xeb, 0xfc]);
    c.cpu.regs[4] = 0x8000; // ESP
    let h = translate_block(&mut c, 0xd000, 8);
    assert_eq!(c.jit.block(h).ins, 3);
    // The stack write consults the write TLB, the pop the read TLB.
    let emitted = c.jit.code(h).to_vec();
    let tlb_compares = emitted
        .windows(4)
        .filter(|w| *w == [0x48, 0x83, 0xfe, 0xff])
        .count();
    assert!(tlb_compares >= 2);
}

#[test]
fn reset_clears_every_index() {
    let mut c = core();
    c.bus.ram_mut()[0xb000..0xb002].copy_from_slice(&[0xeb, 0xfe]);
    let h = translate_block(&mut c, 0xb000, 4);
    assert!(c.jit.block(h).valid);

    c.codegen_reset();
    assert!(!c.jit.block(h).valid);
    assert!(c.codeblock_find(0xb000).is_none());
    assert_eq!(c.pages.page(0xb000).dirty_mask[0], 0);
}
