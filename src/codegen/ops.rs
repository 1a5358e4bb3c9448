//! Specialized recompilers for the hot simple opcodes. The table is
//! indexed `(opcode | op_32) & 0x1ff`, so 16- and 32-bit operand variants
//! register independently; anything absent falls back to the emitted
//! interpreter call.

use super::memaccess::MemWidth;
use super::{offsets, Recomp, RecompFn, Translator};
use crate::cpu::{SegReg, REG_AX, REG_SP};

fn rop_nop(
    _t: &mut Translator,
    _opcode: u8,
    _fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    Recomp::Done(op_pc)
}

fn rop_mov_b_imm(
    t: &mut Translator,
    opcode: u8,
    fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    t.store_imm_reg_b((opcode & 7) as usize, fetchdat as u8);
    Recomp::Done(op_pc.wrapping_add(1))
}

fn rop_mov_w_imm(
    t: &mut Translator,
    opcode: u8,
    fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    t.store_imm_reg_w((opcode & 7) as usize, fetchdat as u16);
    Recomp::Done(op_pc.wrapping_add(2))
}

fn rop_mov_l_imm(
    t: &mut Translator,
    opcode: u8,
    _fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let imm = fetch(op_pc);
    t.store_imm_reg_l((opcode & 7) as usize, imm);
    Recomp::Done(op_pc.wrapping_add(4))
}

/// MOV between registers (the memory forms stay on the interpreter path).
fn rop_mov_rm(
    t: &mut Translator,
    opcode: u8,
    fetchdat: u32,
    op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    if (fetchdat >> 6) & 3 != 3 {
        return Recomp::Fail;
    }
    let reg = ((fetchdat >> 3) & 7) as usize;
    let rm = (fetchdat & 7) as usize;
    // Direction bit: 8A/8B load from rm, 88/89 store to rm.
    let (src, dst) = if opcode & 2 != 0 { (rm, reg) } else { (reg, rm) };

    if opcode & 1 == 0 {
        let host = t.load_reg_b(src);
        t.store_reg_target_b_release(host, dst);
    } else if op32 & 0x100 != 0 {
        let host = t.load_reg_l(src);
        t.store_reg_target_l_release(host, dst);
    } else {
        let host = t.load_reg_w(src);
        t.store_reg_target_w_release(host, dst);
    }
    Recomp::Done(op_pc.wrapping_add(1))
}

fn rop_jmp_r8(
    t: &mut Translator,
    _opcode: u8,
    fetchdat: u32,
    op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let mut dest = op_pc
        .wrapping_add(1)
        .wrapping_add(fetchdat as u8 as i8 as i32 as u32);
    if op32 & 0x100 == 0 {
        dest &= 0xffff;
    }
    t.store_imm_disp8(offsets::pc(), dest);
    t.cpu_block_end = true;
    Recomp::DoneNoPc
}

fn rop_jmp_r16(
    t: &mut Translator,
    _opcode: u8,
    fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let disp = fetchdat as u16 as i16 as i32 as u32;
    let dest = op_pc.wrapping_add(2).wrapping_add(disp) & 0xffff;
    t.store_imm_disp8(offsets::pc(), dest);
    t.cpu_block_end = true;
    Recomp::DoneNoPc
}

fn rop_jmp_r32(
    t: &mut Translator,
    _opcode: u8,
    _fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let disp = fetch(op_pc);
    let dest = op_pc.wrapping_add(4).wrapping_add(disp);
    t.store_imm_disp8(offsets::pc(), dest);
    t.cpu_block_end = true;
    Recomp::DoneNoPc
}

fn rop_push_l(
    t: &mut Translator,
    opcode: u8,
    _fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    if !t.stack32 {
        return Recomp::Fail;
    }
    let host = t.load_reg_l((opcode & 7) as usize);
    let esp = t.load_reg_l(REG_SP) & 7;

    t.emit_u8(0x44); // MOV EAX, esp32
    t.emit_u8(0x89);
    t.emit_u8(0xc0 | (esp << 3));
    t.emit_u8(0x83); // SUB EAX, 4
    t.emit_u8(0xe8);
    t.emit_u8(0x04);
    t.mem_store_addr_ea(SegReg::Ss, host, MemWidth::Dword);
    // Commit the new stack pointer only after the store survived.
    t.store_reg_target_l_release(0, REG_SP);
    Recomp::Done(op_pc)
}

fn rop_pop_l(
    t: &mut Translator,
    opcode: u8,
    _fetchdat: u32,
    _op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let reg = (opcode & 7) as usize;
    if !t.stack32 || reg == REG_SP {
        return Recomp::Fail;
    }
    let esp = t.load_reg_l(REG_SP) & 7;

    t.emit_u8(0x44); // MOV EAX, esp32
    t.emit_u8(0x89);
    t.emit_u8(0xc0 | (esp << 3));
    t.mem_load_addr_ea(SegReg::Ss, MemWidth::Dword);
    t.store_reg_target_l_release(0, reg);
    t.emit_u8(0x41); // ADD esp32, 4
    t.emit_u8(0x83);
    t.emit_u8(0xc0 | esp);
    t.emit_u8(0x04);
    t.emit_u8(0x44); // MOV [rbp + regs[esp]], esp32
    t.emit_u8(0x89);
    t.emit_u8(0x45 | (esp << 3));
    t.emit_u8(super::disp8(offsets::reg_l(REG_SP)));
    Recomp::Done(op_pc)
}

/// MOV AL/AX/EAX from a direct offset (A0/A1): the immediate-address
/// fast-path form, honoring any segment override.
fn rop_mov_accum_load(
    t: &mut Translator,
    opcode: u8,
    fetchdat: u32,
    op32: u32,
    op_pc: u32,
    fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let seg = t.op_ea_seg;
    let (addr, len) = if op32 & 0x200 != 0 {
        (fetch(op_pc), 4)
    } else {
        (fetchdat & 0xffff, 2)
    };

    if opcode & 1 == 0 {
        t.mem_load_addr_imm(seg, addr, MemWidth::Byte);
        t.store_reg_target_b_release(0, REG_AX);
    } else if op32 & 0x100 != 0 {
        t.mem_load_addr_imm(seg, addr, MemWidth::Dword);
        t.store_reg_target_l_release(0, REG_AX);
    } else {
        t.mem_load_addr_imm(seg, addr, MemWidth::Word);
        t.store_reg_target_w_release(0, REG_AX);
    }
    Recomp::Done(op_pc.wrapping_add(len))
}

/// MOV to a direct offset from AL/AX/EAX (A2/A3).
fn rop_mov_accum_store(
    t: &mut Translator,
    opcode: u8,
    fetchdat: u32,
    op32: u32,
    op_pc: u32,
    fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    let seg = t.op_ea_seg;
    let (addr, len) = if op32 & 0x200 != 0 {
        (fetch(op_pc), 4)
    } else {
        (fetchdat & 0xffff, 2)
    };

    if opcode & 1 == 0 {
        let host = t.load_reg_b(REG_AX);
        t.mem_store_addr_imm(seg, addr, host, MemWidth::Byte);
    } else if op32 & 0x100 != 0 {
        let host = t.load_reg_l(REG_AX);
        t.mem_store_addr_imm(seg, addr, host, MemWidth::Dword);
    } else {
        let host = t.load_reg_w(REG_AX);
        t.mem_store_addr_imm(seg, addr, host, MemWidth::Word);
    }
    Recomp::Done(op_pc.wrapping_add(len))
}

/// Register-register XCHG via the mirrors, with both memory images
/// rewritten.
fn emit_xchg_regs(t: &mut Translator, a: usize, b: usize, op32: u32, byte: bool) -> bool {
    if byte {
        // High-byte forms stay on the interpreter path.
        if a & 4 != 0 || b & 4 != 0 {
            return false;
        }
        let ha = t.load_reg_b(a) & 7;
        let hb = t.load_reg_b(b) & 7;
        t.emit_u8(0x45); // XCHG r8b, r8b
        t.emit_u8(0x86);
        t.emit_u8(0xc0 | hb | (ha << 3));
        for &r in [ha, hb].iter() {
            t.emit_u8(0x44); // MOV [rbp + regs[r].b], r8b
            t.emit_u8(0x88);
            t.emit_u8(0x45 | (r << 3));
            t.emit_u8(super::disp8(offsets::reg_b(r as usize)));
        }
        return true;
    }

    let ha = t.load_reg_l(a) & 7;
    let hb = t.load_reg_l(b) & 7;
    if op32 & 0x100 != 0 {
        t.emit_u8(0x45); // XCHG r32, r32
        t.emit_u8(0x87);
        t.emit_u8(0xc0 | hb | (ha << 3));
        for &r in [ha, hb].iter() {
            t.emit_u8(0x44); // MOV [rbp + regs[r].l], r32
            t.emit_u8(0x89);
            t.emit_u8(0x45 | (r << 3));
            t.emit_u8(super::disp8(offsets::reg_l(r as usize)));
        }
    } else {
        // Word exchange must leave the upper halves alone.
        t.emit_u8(0x66); // XCHG r16, r16
        t.emit_u8(0x45);
        t.emit_u8(0x87);
        t.emit_u8(0xc0 | hb | (ha << 3));
        for &r in [ha, hb].iter() {
            t.emit_u8(0x66); // MOV [rbp + regs[r].w], r16
            t.emit_u8(0x44);
            t.emit_u8(0x89);
            t.emit_u8(0x45 | (r << 3));
            t.emit_u8(super::disp8(offsets::reg_w(r as usize)));
        }
    }
    true
}

/// XCHG r/m, r in its register form (86/87).
fn rop_xchg_rm(
    t: &mut Translator,
    opcode: u8,
    fetchdat: u32,
    op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    if (fetchdat >> 6) & 3 != 3 {
        return Recomp::Fail;
    }
    let reg = ((fetchdat >> 3) & 7) as usize;
    let rm = (fetchdat & 7) as usize;
    if emit_xchg_regs(t, reg, rm, op32, opcode & 1 == 0) {
        Recomp::Done(op_pc.wrapping_add(1))
    } else {
        Recomp::Fail
    }
}

/// XCHG (E)AX, reg (91..97).
fn rop_xchg_ax(
    t: &mut Translator,
    opcode: u8,
    _fetchdat: u32,
    op32: u32,
    op_pc: u32,
    _fetch: &mut dyn FnMut(u32) -> u32,
) -> Recomp {
    emit_xchg_regs(t, REG_AX, (opcode & 7) as usize, op32, false);
    Recomp::Done(op_pc)
}

/// Builds the 512-entry table: the low half indexes 16-bit operand forms,
/// the high half 32-bit ones.
pub(super) fn recomp_table() -> &'static [Option<RecompFn>; 512] {
    const NONE: Option<RecompFn> = None;

    const fn build() -> [Option<RecompFn>; 512] {
        let mut t = [NONE; 512];

        t[0x90] = Some(rop_nop as RecompFn);
        t[0x190] = Some(rop_nop as RecompFn);

        let mut r = 0;
        while r < 8 {
            // MOV reg, imm in all three widths.
            t[0xb0 + r] = Some(rop_mov_b_imm as RecompFn);
            t[0x1b0 + r] = Some(rop_mov_b_imm as RecompFn);
            t[0xb8 + r] = Some(rop_mov_w_imm as RecompFn);
            t[0x1b8 + r] = Some(rop_mov_l_imm as RecompFn);
            // PUSH/POP reg, 32-bit operand forms only.
            t[0x150 + r] = Some(rop_push_l as RecompFn);
            t[0x158 + r] = Some(rop_pop_l as RecompFn);
            r += 1;
        }

        t[0x88] = Some(rop_mov_rm as RecompFn);
        t[0x89] = Some(rop_mov_rm as RecompFn);
        t[0x8a] = Some(rop_mov_rm as RecompFn);
        t[0x8b] = Some(rop_mov_rm as RecompFn);
        t[0x188] = Some(rop_mov_rm as RecompFn);
        t[0x189] = Some(rop_mov_rm as RecompFn);
        t[0x18a] = Some(rop_mov_rm as RecompFn);
        t[0x18b] = Some(rop_mov_rm as RecompFn);

        t[0x86] = Some(rop_xchg_rm as RecompFn);
        t[0x87] = Some(rop_xchg_rm as RecompFn);
        t[0x186] = Some(rop_xchg_rm as RecompFn);
        t[0x187] = Some(rop_xchg_rm as RecompFn);
        let mut r = 1;
        while r < 8 {
            t[0x90 + r] = Some(rop_xchg_ax as RecompFn);
            t[0x190 + r] = Some(rop_xchg_ax as RecompFn);
            r += 1;
        }

        t[0xa0] = Some(rop_mov_accum_load as RecompFn);
        t[0xa1] = Some(rop_mov_accum_load as RecompFn);
        t[0xa2] = Some(rop_mov_accum_store as RecompFn);
        t[0xa3] = Some(rop_mov_accum_store as RecompFn);
        t[0x1a0] = Some(rop_mov_accum_load as RecompFn);
        t[0x1a1] = Some(rop_mov_accum_load as RecompFn);
        t[0x1a2] = Some(rop_mov_accum_store as RecompFn);
        t[0x1a3] = Some(rop_mov_accum_store as RecompFn);

        t[0xeb] = Some(rop_jmp_r8 as RecompFn);
        t[0x1eb] = Some(rop_jmp_r8 as RecompFn);
        t[0xe9] = Some(rop_jmp_r16 as RecompFn);
        t[0x1e9] = Some(rop_jmp_r32 as RecompFn);

        t
    }

    static BUILT: [Option<RecompFn>; 512] = build();
    &BUILT
}
