//! The block-build protocol and the per-instruction dispatcher, driving
//! one guest opcode at a time: prefix classification, timing hooks, the
//! recompile-or-call decision, and the abort/interrupt epilogue tests.

use super::accumulate::AccReg;
use super::{offsets, BlockFlags, BlockHandle, OpFn, Recomp};
use crate::context::Core;
use crate::cpu::{CpuStatus, SegReg};
use crate::fpu::dispatch::fpu_opfn;
use crate::mem::Bus;

/// Interpreter tables consumed by the dispatcher, indexed
/// `(opcode | op_32) & 0x3ff` so operand/address-size variants resolve
/// independently. The x87 escapes never consult these; they route through
/// the crate's own FPU dispatch.
pub struct OpcodeTables {
    pub base: Vec<Option<OpFn>>,
    pub table_0f: Vec<Option<OpFn>>,
    pub repe: Vec<Option<OpFn>>,
    pub repne: Vec<Option<OpFn>>,
}

impl Default for OpcodeTables {
    fn default() -> Self {
        OpcodeTables {
            base: vec![None; 1024],
            table_0f: vec![None; 1024],
            repe: vec![None; 1024],
            repne: vec![None; 1024],
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Table {
    Base,
    Table0f,
    Repe,
    Repne,
}

/// Whether a one-byte opcode carries a ModR/M byte.
#[rustfmt::skip]
const OPCODE_MODRM: [bool; 256] = bool_table([
    1, 1, 1, 1,  0, 0, 0, 0,  1, 1, 1, 1,  0, 0, 0, 0, // 00
    1, 1, 1, 1,  0, 0, 0, 0,  1, 1, 1, 1,  0, 0, 0, 0, // 10
    1, 1, 1, 1,  0, 0, 0, 0,  1, 1, 1, 1,  0, 0, 0, 0, // 20
    1, 1, 1, 1,  0, 0, 0, 0,  1, 1, 1, 1,  0, 0, 0, 0, // 30
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 40
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 50
    0, 0, 1, 1,  0, 0, 0, 0,  0, 1, 0, 1,  0, 0, 0, 0, // 60
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 70
    1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1, // 80
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 90
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // a0
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // b0
    1, 1, 0, 0,  1, 1, 1, 1,  0, 0, 0, 0,  0, 0, 0, 0, // c0
    1, 1, 1, 1,  0, 0, 0, 0,  1, 1, 1, 1,  1, 1, 1, 1, // d0
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // e0
    0, 0, 0, 0,  0, 0, 1, 1,  0, 0, 0, 0,  0, 0, 1, 1, // f0
]);

#[rustfmt::skip]
const OPCODE_0F_MODRM: [bool; 256] = bool_table([
    1, 1, 1, 1,  0, 0, 0, 0,  0, 0, 0, 0,  0, 1, 0, 1, // 00
    0, 0, 0, 0,  0, 0, 0, 0,  1, 1, 1, 1,  1, 1, 1, 1, // 10
    1, 1, 1, 1,  1, 1, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 20
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 1, // 30
    1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1, // 40
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 50
    1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1,  0, 0, 1, 1, // 60
    0, 1, 1, 1,  1, 1, 1, 0,  0, 0, 0, 0,  0, 0, 1, 1, // 70
    0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0,  0, 0, 0, 0, // 80
    1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1,  1, 1, 1, 1, // 90
    0, 0, 0, 1,  1, 1, 0, 0,  0, 0, 0, 1,  1, 1, 1, 1, // a0
    1, 1, 1, 1,  1, 1, 1, 1,  0, 0, 1, 1,  1, 1, 1, 1, // b0
    1, 1, 0, 0,  0, 0, 0, 1,  0, 0, 0, 0,  0, 0, 0, 0, // c0
    0, 1, 1, 1,  0, 1, 0, 0,  1, 1, 0, 1,  1, 1, 0, 1, // d0
    0, 1, 1, 0,  0, 1, 0, 0,  1, 1, 0, 1,  1, 1, 0, 1, // e0
    0, 1, 1, 1,  0, 1, 0, 0,  1, 1, 1, 0,  1, 1, 1, 0, // f0
]);

const fn bool_table(raw: [u8; 256]) -> [bool; 256] {
    let mut out = [false; 256];
    let mut i = 0;
    while i < 256 {
        out[i] = raw[i] != 0;
        i += 1;
    }
    out
}

/// Interpreter entry emitted for opcodes with no table entry.
unsafe extern "sysv64" fn invalid_opfn<B: Bus>(ctx: *mut u8, _fetchdat: u32) -> u32 {
    let core = &mut *(ctx as *mut Core<B>);
    core.bus.raise_interrupt(&mut core.cpu, 6);
    1
}

impl<B: Bus> Core<B> {
    /// Full translator teardown (`codegen_reset`).
    pub fn codegen_reset(&mut self) {
        self.jit.reset(&mut self.pages);
    }

    /// The no-op wholesale flush of the contract.
    pub fn codegen_flush(&mut self) {
        self.jit.flush();
    }

    /// Claims a ring slot for a translation starting at `phys`.
    pub fn codegen_block_init(&mut self, phys: u32) -> BlockHandle {
        let cs_base = self.cpu.seg(SegReg::Cs as u32).base;
        let handle = self
            .jit
            .block_init(phys, &self.cpu, cs_base, &mut self.pages);
        self.drain_page_notifications();
        handle
    }

    /// Opens the block for host-code emission.
    pub fn codegen_block_start_recompile(&mut self, handle: BlockHandle) {
        let ctx = self.ctx_ptr() as u64;
        // Data-segment checks are revalidated per block in protected mode.
        let checked = if self.cpu.cr0 & 1 != 0 { 0 } else { 1 };
        for seg in [SegReg::Es, SegReg::Ds, SegReg::Fs, SegReg::Gs].iter() {
            self.cpu.seg_mut(*seg as u32).checked = checked;
        }

        let Core {
            jit, cpu, pages, ..
        } = self;
        jit.block_start_recompile(handle, cpu, ctx, pages);
        self.drain_page_notifications();
    }

    /// Closes a never-recompiled block (interpreter-profiled only).
    pub fn codegen_block_end(&mut self) {
        let phys2 = self.end_phys2();
        self.jit.block_end(phys2, &mut self.pages);
        self.drain_page_notifications();
    }

    /// Closes a recompiled block: final flush, epilogue, page masks.
    pub fn codegen_block_end_recompile(&mut self, _handle: BlockHandle) {
        let phys2 = self.end_phys2();
        self.jit.block_end_recompile(phys2, &mut self.pages);
        self.drain_page_notifications();
    }

    /// Abandons the block being built.
    pub fn codegen_block_remove(&mut self) {
        self.jit.block_remove(&mut self.pages);
        self.drain_page_notifications();
    }

    /// The SMC response entry point (`codegen_check_flush`).
    pub fn codegen_check_flush(&mut self, phys: u32, mask: u64) {
        self.jit.check_flush(phys, mask, &mut self.pages);
        self.drain_page_notifications();
    }

    /// Hash-then-tree lookup of an executable block for the current mode.
    pub fn codeblock_find(&self, phys: u32) -> BlockHandle {
        let cs_base = self.cpu.seg(SegReg::Cs as u32).base;
        self.jit
            .find(phys, cs_base, self.cpu.cur_status, &self.pages)
    }

    fn end_phys2(&mut self) -> Option<u32> {
        let endpc = self.jit.endpc;
        let pc = self.jit.block(self.jit.current()).pc;
        if (pc ^ endpc) & !0x3ffu32 != 0 {
            self.bus.translate(&mut self.cpu, endpc, false)
        } else {
            None
        }
    }

    fn drain_page_notifications(&mut self) {
        for (phys, virt) in self.jit.take_page_notifications() {
            self.bus.flush_write_page(phys, virt);
        }
    }

    /// Translates one guest instruction into the open block: consumes
    /// prefixes, then either invokes a specialized recompiler or emits the
    /// generic interpreter call with its abort test. `new_pc` points past
    /// the opcode byte, `old_pc` at the instruction start.
    pub fn codegen_generate_call(
        &mut self,
        mut opcode: u8,
        _op: OpFn,
        mut fetchdat: u32,
        new_pc: u32,
        old_pc: u32,
    ) {
        let cs_base = self.cpu.seg(SegReg::Cs as u32).base;
        let use32: u32 = if self.cpu.cur_status & CpuStatus::USE32.bits() != 0 {
            0x300
        } else {
            0
        };
        let mut op_32 = use32;
        let mut op_pc = new_pc;
        let mut table = Table::Base;
        let mut pc_off: i32 = 0;
        let mut test_modrm = true;
        let mut fpu_escape: Option<u8> = None;

        self.jit.op_ea_seg = SegReg::Ds;
        self.jit.op_ssegs = false;
        self.jit.op_old_pc = old_pc;
        self.jit.timing.start();

        // Prefix loop: classify until a real opcode is reached.
        let mut done = false;
        while !done {
            let consumed = match opcode {
                0x0f => {
                    table = Table::Table0f;
                    done = true;
                    true
                }
                0x26 => {
                    self.jit.op_ea_seg = SegReg::Es;
                    self.jit.op_ssegs = true;
                    true
                }
                0x2e => {
                    self.jit.op_ea_seg = SegReg::Cs;
                    self.jit.op_ssegs = true;
                    true
                }
                0x36 => {
                    self.jit.op_ea_seg = SegReg::Ss;
                    self.jit.op_ssegs = true;
                    true
                }
                0x3e => {
                    self.jit.op_ea_seg = SegReg::Ds;
                    self.jit.op_ssegs = true;
                    true
                }
                0x64 => {
                    self.jit.op_ea_seg = SegReg::Fs;
                    self.jit.op_ssegs = true;
                    true
                }
                0x65 => {
                    self.jit.op_ea_seg = SegReg::Gs;
                    self.jit.op_ssegs = true;
                    true
                }
                0x66 => {
                    op_32 = ((use32 & 0x100) ^ 0x100) | (op_32 & 0x200);
                    true
                }
                0x67 => {
                    op_32 = ((use32 & 0x200) ^ 0x200) | (op_32 & 0x100);
                    true
                }
                0xd8..=0xdf => {
                    // x87 escape: the soft-float core always takes the
                    // interpreter-call path.
                    fpu_escape = Some(opcode);
                    let handle = self.jit.current();
                    self.jit.block_mut(handle).flags |= BlockFlags::HAS_FPU;
                    pc_off = -1;
                    test_modrm = false;
                    done = true;
                    true
                }
                0xf0 => true, // LOCK changes nothing here
                0xf2 => {
                    table = Table::Repne;
                    true
                }
                0xf3 => {
                    table = Table::Repe;
                    true
                }
                _ => false,
            };
            if !consumed {
                break;
            }
            fetchdat = self
                .bus
                .fetch_dword(&mut self.cpu, cs_base.wrapping_add(op_pc));
            let prefix_cycles = self.jit.timing.prefix(opcode, fetchdat);
            self.jit.block_cycles += prefix_cycles;
            if self.cpu.aborted() {
                return;
            }
            opcode = fetchdat as u8;
            if pc_off == 0 {
                fetchdat >>= 8;
            }
            op_pc = op_pc.wrapping_add(1);
        }

        let opcode_cycles = self.jit.timing.opcode(opcode, fetchdat, op_32, op_pc);
        self.jit.block_cycles += opcode_cycles;
        let cycles = self.jit.block_cycles;
        self.jit.accumulate(AccReg::Cycles, -cycles);
        self.jit.block_cycles = 0;

        // Potential block terminators flush eagerly so a taken branch
        // carries the right deduction; pairing parts tentatively charge the
        // taken-branch cost and credit it back for fall-through.
        let is_branch = (table == Table::Base
            && fpu_escape.is_none()
            && ((opcode & 0xf0) == 0x70
                || (opcode & 0xfc) == 0xe0
                || opcode == 0xc2
                || (opcode & 0xfe) == 0xca
                || (opcode & 0xfc) == 0xcc
                || (opcode & 0xfc) == 0xe8
                || (opcode == 0xff && (0x10..0x30).contains(&(fetchdat & 0x38)))))
            || (table == Table::Table0f && (opcode & 0xf0) == 0x80);
        if is_branch {
            let jump_cycles = self.jit.timing.jump_cycles().unwrap_or(0);
            if jump_cycles != 0 {
                self.jit.accumulate(AccReg::Cycles, -jump_cycles);
            }
            self.jit.accumulate_flush();
            if jump_cycles != 0 {
                self.jit.accumulate(AccReg::Cycles, jump_cycles);
            }
        }

        // REP prefixes fall back to the plain table when no string form
        // exists for this opcode.
        let index = (opcode as usize | op_32 as usize) & 0x3ff;
        if matches!(table, Table::Repe | Table::Repne) {
            let entry = match table {
                Table::Repe => self.ops.repe[index],
                _ => self.ops.repne[index],
            };
            if entry.is_none() {
                table = Table::Base;
            }
        }

        // Specialized path first.
        if table == Table::Base && fpu_escape.is_none() {
            let ridx = (opcode as usize | (op_32 as usize & 0x100)) & 0x1ff;
            if let Some(recomp) = self.jit.recomp[ridx] {
                let Core { jit, bus, cpu, .. } = self;
                let mut fetch =
                    |pc: u32| bus.fetch_dword(cpu, cs_base.wrapping_add(pc));
                let outcome = recomp(jit, opcode, fetchdat, op_32, op_pc, &mut fetch);
                if outcome != Recomp::Fail {
                    if let Recomp::Done(pc) = outcome {
                        self.jit.store_imm_disp8(offsets::pc(), pc);
                    }
                    self.jit.accumulate(AccReg::Ins, 1);
                    let handle = self.jit.current();
                    self.jit.block_mut(handle).ins += 1;
                    self.jit.block_ins += 1;
                    self.jit.block_full_ins += 1;
                    self.jit.endpc = cs_base.wrapping_add(self.cpu.pc).wrapping_add(8);
                    self.emit_pending_interrupt_check(false);
                    return;
                }
            }
        }

        // Generic interpreter call.
        let op: OpFn = if let Some(escape) = fpu_escape {
            fpu_opfn::<B>(escape)
        } else {
            let entry = match table {
                Table::Base => self.ops.base[index],
                Table::Table0f => self.ops.table_0f[index],
                Table::Repe => self.ops.repe[index],
                Table::Repne => self.ops.repne[index],
            };
            entry.unwrap_or(invalid_opfn::<B>)
        };

        let op_ssegs_now = i32::from(self.jit.op_ssegs);
        if op_ssegs_now != self.jit.last_ssegs {
            self.jit.last_ssegs = op_ssegs_now;
            self.jit
                .store_imm8_disp8(offsets::ssegs(), op_ssegs_now as u8);
        }

        // The interpreter ops decode their own ModR/M and displacement, so
        // the PC handed to them points at the ModR/M byte; the emitted EA
        // below only pre-computes `eaaddr` for ops that use it.
        let pc_for_op = op_pc.wrapping_add(pc_off as u32);

        let has_modrm = !test_modrm
            || (table == Table::Base && OPCODE_MODRM[opcode as usize])
            || (table == Table::Table0f && OPCODE_0F_MODRM[opcode as usize]);
        if has_modrm {
            let stack_offset: i32 = if table == Table::Base && opcode == 0x8f {
                if op_32 & 0x100 != 0 {
                    4
                } else {
                    2
                }
            } else {
                0
            };

            let md = (fetchdat >> 6) & 3;
            let reg = (fetchdat >> 3) & 7;
            let rm = fetchdat & 7;
            self.jit
                .store_imm_disp8(offsets::rm_data(), rm | (md << 8) | (reg << 16));

            op_pc = op_pc.wrapping_add(pc_off as u32);
            if md != 3 {
                if op_32 & 0x200 == 0 {
                    self.jit.gen_ea_16(fetchdat, &mut op_pc);
                } else {
                    let Core { jit, bus, cpu, .. } = self;
                    let mut fetch =
                        |pc: u32| bus.fetch_dword(cpu, cs_base.wrapping_add(pc));
                    jit.gen_ea_32(fetchdat, &mut op_pc, stack_offset, &mut fetch);
                }
            }
            op_pc = op_pc.wrapping_sub(pc_off as u32);
        }

        let ea_seg_now = self.jit.op_ea_seg as i32;
        if ea_seg_now != self.jit.last_ea_seg {
            self.jit.last_ea_seg = ea_seg_now;
            self.jit
                .store_imm_disp8(offsets::ea_seg(), ea_seg_now as u32);
        }

        self.jit.accumulate_flush();

        self.jit.store_imm_disp8(offsets::pc(), pc_for_op);
        self.jit.store_imm_disp8(offsets::oldpc(), old_pc);
        if op_32 != self.jit.last_op32 {
            self.jit.last_op32 = op_32;
            self.jit.store_imm_disp8(offsets::op32(), op_32);
        }

        let ctx = self.jit.ctx;
        self.jit.load_param_1_imm64(ctx);
        self.jit.load_param_2_imm(fetchdat);
        self.jit.emit_call(op as usize as u64);

        self.jit.accumulate(AccReg::Ins, 1);
        let handle = self.jit.current();
        self.jit.block_mut(handle).ins += 1;
        self.jit.block_ins += 1;

        self.emit_pending_interrupt_check(true);
        self.jit.endpc = cs_base.wrapping_add(self.cpu.pc).wrapping_add(8);
    }

    /// After a call, ORs the pending-interrupt byte into the op's return
    /// value and exits the block when anything is set. Recompiled
    /// instructions only test the interrupt byte.
    fn emit_pending_interrupt_check(&mut self, test_return: bool) {
        let pic = self.jit.handlers.pic_pending;
        if test_return {
            if pic != 0 {
                self.jit.emit_u8(0x48); // MOV RSI, &pic_pending
                self.jit.emit_u8(0xbe);
                self.jit.emit_u64(pic);
                self.jit.emit_u8(0x0a); // OR AL, [RSI]
                self.jit.emit_u8(0x06);
            }
            self.jit.emit_u8(0x85); // TEST EAX, EAX
            self.jit.emit_u8(0xc0);
            self.jit.jcc_epilogue(5); // JNE exit
        } else if pic != 0 {
            self.jit.emit_u8(0x48); // MOV RSI, &pic_pending
            self.jit.emit_u8(0xbe);
            self.jit.emit_u64(pic);
            self.jit.emit_u8(0xf6); // TEST byte [RSI], 1
            self.jit.emit_u8(0x06);
            self.jit.emit_u8(0x01);
            self.jit.jcc_epilogue(5); // JNE exit
        }
    }
}
