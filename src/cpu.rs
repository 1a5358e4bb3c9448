//! This module provides the guest CPU state shared between the translator,
//! the emitted host code and the x87 core.
//!
//! The layout of [`CpuState`] is part of the emitted-code contract: the block
//! prologue loads a host register with `&CpuState + 128` so that every hot
//! field is reachable with a one-byte signed displacement. Fields must stay
//! within the first 256 bytes of the struct for that to hold, which is why
//! the struct is `#[repr(C)]` and why the ordering below is deliberate.

use bitflags::bitflags;

/// Guest general-purpose register indices (the IA-32 `reg` field encoding).
pub const REG_AX: usize = 0;
pub const REG_CX: usize = 1;
pub const REG_DX: usize = 2;
pub const REG_BX: usize = 3;
pub const REG_SP: usize = 4;
pub const REG_BP: usize = 5;
pub const REG_SI: usize = 6;
pub const REG_DI: usize = 7;

bitflags! {
    /// Mode bits snapshotted into each codeblock at compile time.
    ///
    /// The low 16 bits must match exactly between a block and the current
    /// CPU state for the block to be executable; the high bits only have to
    /// agree where the block relies on them.
    pub struct CpuStatus: u32 {
        const USE32     = 1 << 0;
        const STACK32   = 1 << 1;
        const PMODE     = 1 << 2;
        const V86       = 1 << 3;
        const SMM       = 1 << 4;
        /// DS is not flat (non-zero base or limited); disables the flat
        /// fast path in emitted memory accesses.
        const NOTFLATDS = 1 << 16;
        /// SS is not flat.
        const NOTFLATSS = 1 << 17;
    }
}

/// The portion of [`CpuStatus`] that must match exactly.
pub const CPU_STATUS_FLAGS: u32 = 0xffff;
/// The portion of [`CpuStatus`] that must be at least as permissive.
pub const CPU_STATUS_MASK: u32 = 0xffff_0000;

/// Guest-fault codes recorded in [`CpuState`]`::abrt`. The high bit marks
/// faults that push an error code.
pub const ABRT_NONE: u8 = 0x00;
pub const ABRT_NP: u8 = 0x8b;
pub const ABRT_SS: u8 = 0x8c;
pub const ABRT_GPF: u8 = 0x8d;
pub const ABRT_PF: u8 = 0x8e;

/// Sentinel for the lazy-flag operation field meaning the architectural
/// `flags` word is authoritative.
pub const FLAGS_UNKNOWN: u32 = 0xffff_ffff;

/// EFLAGS bits touched by the x87 compare-into-flags family.
pub const FLAG_C: u16 = 0x0001;
pub const FLAG_P: u16 = 0x0004;
pub const FLAG_Z: u16 = 0x0040;

/// Segment registers in the IA-32 `sreg` field encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

impl SegReg {
    /// Recovers the enum from a stored segment index.
    pub fn from_index(index: u32) -> SegReg {
        match index {
            0 => SegReg::Es,
            1 => SegReg::Cs,
            2 => SegReg::Ss,
            4 => SegReg::Fs,
            5 => SegReg::Gs,
            _ => SegReg::Ds,
        }
    }
}

/// A loaded segment register. `checked` caches the outcome of descriptor
/// validation for the current instruction.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Segment {
    pub base: u32,
    pub limit_low: u32,
    pub limit_high: u32,
    pub checked: u8,
    _pad: [u8; 3],
}

impl Segment {
    /// A flat 4 GiB segment based at zero.
    pub fn flat() -> Self {
        Segment {
            base: 0,
            limit_low: 0,
            limit_high: 0xffff_ffff,
            checked: 1,
            _pad: [0; 3],
        }
    }
}

/// The guest CPU state.
///
/// Offsets of the fields up to and including `st` are baked into emitted
/// host code (via [`crate::codegen::offsets`]); reordering them is an ABI
/// break for every cached block.
#[repr(C)]
pub struct CpuState {
    /// The eight general-purpose registers. Byte and word aliases are the
    /// low bytes of each dword on the little-endian hosts the emitter
    /// targets.
    pub regs: [u32; 8],
    pub pc: u32,
    pub oldpc: u32,
    /// Effective address computed by the addressing emitters / decoders.
    pub eaaddr: u32,
    /// Index ([`SegReg`]) of the segment the effective address is relative to.
    pub ea_seg: u32,
    /// Operand/address size state: bit 8 = 32-bit data, bit 9 = 32-bit
    /// addressing.
    pub op32: u32,
    /// Packed ModR/M state: `rm | (mod << 8) | (reg << 16)`.
    pub rm_data: u32,
    /// Cycle counter the accumulator flushes into.
    pub cycles: i32,
    /// Pending guest fault; nonzero aborts the current block.
    pub abrt: u8,
    /// Nonzero while a segment-override prefix is in effect.
    pub ssegs: u8,
    /// Nonzero while the FPU register file is aliased as MMX state.
    pub ismmx: u8,
    _pad0: u8,
    pub abrt_error: u32,
    /// Lazy-flag machinery: last operation and operands/result.
    pub flags_op: u32,
    pub flags_res: u32,
    pub flags_op1: u32,
    pub flags_op2: u32,
    /// Architectural FLAGS (low word) and EFLAGS extension (high word).
    pub flags: u16,
    pub eflags: u16,
    /// Segment register file, indexed by [`SegReg`].
    pub segs: [Segment; 6],
    /// x87 top-of-stack for the host-double mirror.
    pub top: i32,
    /// x87 control word mirror used by the host-double path.
    pub npxc: u16,
    /// x87 status word mirror.
    pub npxs: u16,
    /// Host-double mirror of the x87 register file.
    pub st: [f64; 8],

    // Fields below are not addressed by emitted code.
    /// 64-bit integer / MMX alias of the register file.
    pub mm: [u64; 8],
    /// Host-double path tag mirror.
    pub tag: [u8; 8],
    pub cr0: u32,
    /// Current mode bits; snapshotted into blocks at compile time.
    pub cur_status: u32,
    /// Executed-instruction counter batched by the cycle accumulator.
    pub ins: u32,
}

impl Default for CpuState {
    fn default() -> Self {
        CpuState {
            regs: [0; 8],
            pc: 0,
            oldpc: 0,
            eaaddr: 0,
            ea_seg: SegReg::Ds as u32,
            op32: 0,
            rm_data: 0,
            cycles: 0,
            abrt: ABRT_NONE,
            ssegs: 0,
            ismmx: 0,
            _pad0: 0,
            abrt_error: 0,
            flags_op: FLAGS_UNKNOWN,
            flags_res: 0,
            flags_op1: 0,
            flags_op2: 0,
            flags: 0x0002,
            eflags: 0,
            segs: [Segment::flat(); 6],
            top: 0,
            npxc: 0x037f,
            npxs: 0,
            st: [0.0; 8],
            mm: [0; 8],
            tag: [0; 8],
            cr0: 0,
            cur_status: 0,
            ins: 0,
        }
    }
}

impl CpuState {
    pub fn seg(&self, index: u32) -> &Segment {
        &self.segs[index as usize]
    }

    pub fn seg_mut(&mut self, index: u32) -> &mut Segment {
        &mut self.segs[index as usize]
    }

    /// The segment the current effective address is relative to.
    pub fn ea_segment(&self) -> &Segment {
        &self.segs[self.ea_seg as usize]
    }

    pub fn reg_w(&self, index: usize) -> u16 {
        self.regs[index & 7] as u16
    }

    pub fn set_reg_w(&mut self, index: usize, value: u16) {
        let r = &mut self.regs[index & 7];
        *r = (*r & 0xffff_0000) | u32::from(value);
    }

    /// Reads a byte register in the `reg` field encoding: 0..4 are the low
    /// bytes of AX..BX, 4..8 the high bytes.
    pub fn reg_b(&self, index: usize) -> u8 {
        if index & 4 != 0 {
            (self.regs[index & 3] >> 8) as u8
        } else {
            self.regs[index & 3] as u8
        }
    }

    pub fn set_reg_b(&mut self, index: usize, value: u8) {
        let r = &mut self.regs[index & 3];
        if index & 4 != 0 {
            *r = (*r & 0xffff_00ff) | (u32::from(value) << 8);
        } else {
            *r = (*r & 0xffff_ff00) | u32::from(value);
        }
    }

    /// Materializes ZF/PF/CF and marks the lazy-flag state as resolved.
    /// Used by the compare-into-flags x87 operations.
    pub fn set_zf_pf_cf(&mut self, zf: bool, pf: bool, cf: bool) {
        self.flags &= !(FLAG_Z | FLAG_P | FLAG_C);
        if zf {
            self.flags |= FLAG_Z;
        }
        if pf {
            self.flags |= FLAG_P;
        }
        if cf {
            self.flags |= FLAG_C;
        }
        self.flags_op = FLAGS_UNKNOWN;
    }

    /// True when a guest fault is pending.
    #[inline]
    pub fn aborted(&self) -> bool {
        self.abrt != 0
    }

    pub fn raise_gpf(&mut self, error: u32) {
        self.abrt = ABRT_GPF;
        self.abrt_error = error;
    }

    /// Default segment for a 16-bit ModR/M memory operand: BP-based forms
    /// address the stack segment unless an override prefix was seen. The
    /// pure-disp16 form (`mod == 0, rm == 6`) does not involve BP.
    pub fn default_seg_16(rm: u32, modrm_mod: u32) -> SegReg {
        match rm {
            2 | 3 => SegReg::Ss,
            6 if modrm_mod != 0 => SegReg::Ss,
            _ => SegReg::Ds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_register_aliasing() {
        let mut cpu = CpuState::default();
        cpu.regs[REG_AX] = 0x1234_5678;
        assert_eq!(cpu.reg_b(0), 0x78);
        assert_eq!(cpu.reg_b(4), 0x56);
        cpu.set_reg_b(4, 0xab);
        assert_eq!(cpu.regs[REG_AX], 0x1234_ab78);
        cpu.set_reg_w(REG_AX, 0xbeef);
        assert_eq!(cpu.regs[REG_AX], 0x1234_beef);
    }

    #[test]
    fn hot_fields_fit_the_disp8_window() {
        // The prologue bases addressing at +128, so anything the emitter
        // touches must live below offset 256.
        assert!(core::mem::offset_of!(CpuState, st) + 64 <= 256);
        assert_eq!(core::mem::offset_of!(CpuState, regs), 0);
    }

    #[test]
    fn default_segment_rules() {
        assert_eq!(CpuState::default_seg_16(2, 0), SegReg::Ss);
        assert_eq!(CpuState::default_seg_16(6, 0), SegReg::Ds);
        assert_eq!(CpuState::default_seg_16(6, 1), SegReg::Ss);
        assert_eq!(CpuState::default_seg_16(0, 0), SegReg::Ds);
    }
}
