//! This module provides the [`Core`] struct: the single context that owns
//! the CPU state, the x87 state, the block cache and the guest-memory
//! connection, passed by reference to every emitter and dispatcher entry
//! point.
//!
//! Emitted host code addresses the context through a pointer baked in at
//! translation time, so a `Core` must not move between translating a block
//! and executing it. Embedders that run emitted code should keep the core
//! behind a stable allocation (e.g. `Box`).

use crate::codegen::builder::OpcodeTables;
use crate::codegen::timing::TimingKind;
use crate::codegen::Translator;
use crate::cpu::{CpuState, SegReg, REG_BP, REG_BX, REG_DI, REG_SI};
use crate::error::Error;
use crate::fpu::Fpu;
use crate::mem::{Bus, MemHandlers, PageMap};

/// Construction-time configuration for a [`Core`].
pub struct CoreBuilder<B> {
    bus: B,
    mem_bytes: usize,
    timing: TimingKind,
    handlers: MemHandlers,
    inline_cycle_counter: Option<u64>,
    ops: OpcodeTables,
}

impl<B: Bus> CoreBuilder<B> {
    pub fn new(bus: B) -> Self {
        CoreBuilder {
            bus,
            mem_bytes: 16 << 20,
            timing: TimingKind::I486,
            handlers: MemHandlers::default(),
            inline_cycle_counter: None,
            ops: OpcodeTables::default(),
        }
    }

    /// Sets the guest physical memory size the page records cover.
    pub fn with_memory_size(mut self, bytes: usize) -> Self {
        self.mem_bytes = bytes;
        self
    }

    /// Selects the cycle-timing backend.
    pub fn with_timing(mut self, timing: TimingKind) -> Self {
        self.timing = timing;
        self
    }

    /// Installs the slow-path entry points and TLB table addresses for
    /// emitted code.
    pub fn with_handlers(mut self, handlers: MemHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Enables the inline auxiliary cycle counter at the given host address.
    pub fn with_inline_cycle_counter(mut self, addr: u64) -> Self {
        self.inline_cycle_counter = Some(addr);
        self
    }

    /// Installs the interpreter opcode tables the dispatcher falls back to.
    pub fn with_op_tables(mut self, ops: OpcodeTables) -> Self {
        self.ops = ops;
        self
    }

    /// Builds the core, allocating the executable block ring.
    pub fn build(self) -> Result<Core<B>, Error> {
        Ok(Core {
            cpu: CpuState::default(),
            fpu: Fpu::default(),
            pages: PageMap::new(self.mem_bytes),
            jit: Translator::new(self.timing, self.handlers, self.inline_cycle_counter)?,
            ops: self.ops,
            bus: self.bus,
        })
    }
}

/// The emulation context. `cpu` must stay the first field: emitted code
/// addresses `CpuState` fields relative to the context pointer.
#[repr(C)]
pub struct Core<B: Bus> {
    pub cpu: CpuState,
    pub fpu: Fpu,
    pub pages: PageMap,
    pub jit: Translator,
    pub ops: OpcodeTables,
    pub bus: B,
}

impl<B: Bus> Core<B> {
    pub fn builder(bus: B) -> CoreBuilder<B> {
        CoreBuilder::new(bus)
    }

    /// The context pointer baked into emitted code.
    #[inline]
    pub fn ctx_ptr(&mut self) -> *mut u8 {
        self as *mut Self as *mut u8
    }

    // Interpreter-side operand access -------------------------------------

    /// Minimal stand-in for the external descriptor-validation primitives:
    /// marks the segment checked, faulting on an obviously unusable one.
    pub fn seg_check(&mut self, seg: SegReg) -> i32 {
        let pmode = self.cpu.cr0 & 1 != 0;
        let s = self.cpu.seg_mut(seg as u32);
        if pmode && s.checked == 0 {
            if s.limit_high < s.limit_low {
                self.cpu.raise_gpf(0);
                return 1;
            }
            s.checked = 1;
        }
        0
    }

    #[inline]
    pub fn read_ea_b(&mut self) -> u8 {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.read_b(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn read_ea_w(&mut self) -> u16 {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.read_w(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn read_ea_l(&mut self) -> u32 {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.read_l(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn read_ea_q(&mut self) -> u64 {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.read_q(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn write_ea_b(&mut self, value: u8) {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.write_b(&mut self.cpu, base, addr, value);
    }

    #[inline]
    pub fn write_ea_w(&mut self, value: u16) {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.write_w(&mut self.cpu, base, addr, value);
    }

    #[inline]
    pub fn write_ea_l(&mut self, value: u32) {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.write_l(&mut self.cpu, base, addr, value);
    }

    #[inline]
    pub fn write_ea_q(&mut self, value: u64) {
        let base = self.cpu.ea_segment().base;
        let addr = self.cpu.eaaddr;
        self.bus.write_q(&mut self.cpu, base, addr, value);
    }

    /// Reads a memory operand at an offset from the current effective
    /// address (used by the environment marshaling).
    #[inline]
    pub fn read_at_w(&mut self, addr: u32) -> u16 {
        let base = self.cpu.ea_segment().base;
        self.bus.read_w(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn read_at_l(&mut self, addr: u32) -> u32 {
        let base = self.cpu.ea_segment().base;
        self.bus.read_l(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn read_at_q(&mut self, addr: u32) -> u64 {
        let base = self.cpu.ea_segment().base;
        self.bus.read_q(&mut self.cpu, base, addr)
    }

    #[inline]
    pub fn write_at_w(&mut self, addr: u32, value: u16) {
        let base = self.cpu.ea_segment().base;
        self.bus.write_w(&mut self.cpu, base, addr, value);
    }

    #[inline]
    pub fn write_at_l(&mut self, addr: u32, value: u32) {
        let base = self.cpu.ea_segment().base;
        self.bus.write_l(&mut self.cpu, base, addr, value);
    }

    #[inline]
    pub fn write_at_q(&mut self, addr: u32, value: u64) {
        let base = self.cpu.ea_segment().base;
        self.bus.write_q(&mut self.cpu, base, addr, value);
    }

    // Effective-address decode --------------------------------------------

    /// Decodes a 16-bit ModR/M memory operand: sets `eaaddr`, the default
    /// segment, and advances `pc` past the ModR/M and displacement bytes.
    /// `fetchdat` holds the ModR/M byte in its low byte and up to three
    /// following bytes above it.
    pub fn fetch_ea_16(&mut self, fetchdat: u32) {
        let modrm = fetchdat & 0xff;
        let md = (modrm >> 6) & 3;
        let reg = (modrm >> 3) & 7;
        let rm = modrm & 7;
        self.cpu.rm_data = rm | (md << 8) | (reg << 16);
        self.cpu.pc = self.cpu.pc.wrapping_add(1);

        if md == 3 {
            return;
        }

        if md == 0 && rm == 6 {
            self.cpu.eaaddr = (fetchdat >> 8) & 0xffff;
            self.cpu.pc = self.cpu.pc.wrapping_add(2);
            if self.cpu.ssegs == 0 {
                self.cpu.ea_seg = SegReg::Ds as u32;
            }
            return;
        }

        let base = match rm {
            0 | 1 | 7 => {
                if rm == 7 {
                    self.cpu.reg_w(REG_BX) as u32
                } else {
                    self.cpu.reg_w(REG_BX) as u32
                        + if rm == 0 {
                            self.cpu.reg_w(REG_SI) as u32
                        } else {
                            self.cpu.reg_w(REG_DI) as u32
                        }
                }
            }
            2 | 3 | 6 => {
                let bp = self.cpu.reg_w(REG_BP) as u32;
                match rm {
                    2 => bp + self.cpu.reg_w(REG_SI) as u32,
                    3 => bp + self.cpu.reg_w(REG_DI) as u32,
                    _ => bp,
                }
            }
            4 => self.cpu.reg_w(REG_SI) as u32,
            _ => self.cpu.reg_w(REG_DI) as u32,
        };

        let disp = match md {
            1 => {
                self.cpu.pc = self.cpu.pc.wrapping_add(1);
                ((fetchdat >> 8) & 0xff) as i8 as i32 as u32
            }
            2 => {
                self.cpu.pc = self.cpu.pc.wrapping_add(2);
                (fetchdat >> 8) & 0xffff
            }
            _ => 0,
        };

        self.cpu.eaaddr = base.wrapping_add(disp) & 0xffff;
        if self.cpu.ssegs == 0 {
            self.cpu.ea_seg = CpuState::default_seg_16(rm, md) as u32;
        }
    }

    /// Decodes a 32-bit ModR/M (with SIB) memory operand. Displacement
    /// bytes beyond `fetchdat` are fetched through the bus.
    pub fn fetch_ea_32(&mut self, fetchdat: u32) {
        let modrm = fetchdat & 0xff;
        let md = (modrm >> 6) & 3;
        let reg = (modrm >> 3) & 7;
        let rm = modrm & 7;
        self.cpu.rm_data = rm | (md << 8) | (reg << 16);
        self.cpu.pc = self.cpu.pc.wrapping_add(1);

        if md == 3 {
            return;
        }

        let cs_base = self.cpu.seg(SegReg::Cs as u32).base;
        let mut ss_default = false;
        let mut has_sib = false;

        let base = if rm == 4 {
            has_sib = true;
            let sib = (fetchdat >> 8) & 0xff;
            self.cpu.pc = self.cpu.pc.wrapping_add(1);
            let sib_base = sib & 7;
            let sib_index = (sib >> 3) & 7;
            let scale = sib >> 6;

            let mut addr = if sib_base == 5 && md == 0 {
                let pc = self.cpu.pc;
                let disp = self.bus.fetch_dword(&mut self.cpu, cs_base.wrapping_add(pc));
                self.cpu.pc = self.cpu.pc.wrapping_add(4);
                disp
            } else {
                if sib_base == 4 || sib_base == 5 {
                    ss_default = true;
                }
                self.cpu.regs[sib_base as usize]
            };
            if sib_index != 4 {
                addr = addr.wrapping_add(self.cpu.regs[sib_index as usize] << scale);
            }
            addr
        } else if md == 0 && rm == 5 {
            let pc = self.cpu.pc;
            let disp = self.bus.fetch_dword(&mut self.cpu, cs_base.wrapping_add(pc));
            self.cpu.pc = self.cpu.pc.wrapping_add(4);
            self.cpu.eaaddr = disp;
            if self.cpu.ssegs == 0 {
                self.cpu.ea_seg = SegReg::Ds as u32;
            }
            return;
        } else {
            if rm == 5 {
                ss_default = true;
            }
            self.cpu.regs[rm as usize]
        };

        let disp = match md {
            1 => {
                // The displacement byte still sits inside `fetchdat`.
                let byte = if has_sib {
                    (fetchdat >> 16) & 0xff
                } else {
                    (fetchdat >> 8) & 0xff
                };
                self.cpu.pc = self.cpu.pc.wrapping_add(1);
                byte as u8 as i8 as i32 as u32
            }
            2 => {
                let pc = self.cpu.pc;
                let dword = self.bus.fetch_dword(&mut self.cpu, cs_base.wrapping_add(pc));
                self.cpu.pc = self.cpu.pc.wrapping_add(4);
                dword
            }
            _ => 0,
        };

        self.cpu.eaaddr = base.wrapping_add(disp);
        if self.cpu.ssegs == 0 {
            self.cpu.ea_seg = if ss_default {
                SegReg::Ss as u32
            } else {
                SegReg::Ds as u32
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RamBus;

    fn core() -> Core<RamBus> {
        Core::builder(RamBus::new(0x10000)).build().unwrap()
    }

    #[test]
    fn ea16_disp16_form() {
        let mut c = core();
        // mod=0 rm=6: pure disp16, bytes 0x12 0x34 following the ModR/M.
        c.fetch_ea_16(0x0034_1206);
        assert_eq!(c.cpu.eaaddr, 0x3412);
    }

    #[test]
    fn ea16_bx_si_with_disp8() {
        let mut c = core();
        c.cpu.set_reg_w(REG_BX, 0x1000);
        c.cpu.set_reg_w(REG_SI, 0x0200);
        // mod=1 rm=0: [BX+SI+disp8], disp8 = 0x10.
        c.fetch_ea_16(0x0000_1040);
        assert_eq!(c.cpu.eaaddr, 0x1210);
        assert_eq!(c.cpu.ea_seg, SegReg::Ds as u32);
    }

    #[test]
    fn ea16_bp_defaults_to_ss() {
        let mut c = core();
        c.cpu.set_reg_w(REG_BP, 0x80);
        // mod=1 rm=6: [BP+disp8].
        c.fetch_ea_16(0x0000_0846);
        assert_eq!(c.cpu.eaaddr, 0x88);
        assert_eq!(c.cpu.ea_seg, SegReg::Ss as u32);
    }

    #[test]
    fn ea16_wraps_at_64k() {
        let mut c = core();
        c.cpu.set_reg_w(REG_BX, 0xffff);
        c.cpu.set_reg_w(REG_DI, 0x0002);
        // mod=0 rm=1: [BX+DI].
        c.fetch_ea_16(0x0000_0001);
        assert_eq!(c.cpu.eaaddr, 0x0001);
    }

    #[test]
    fn ea32_register_base() {
        let mut c = core();
        c.cpu.regs[0] = 0x0000_2000; // EAX
        // mod=0 rm=0: [EAX].
        c.fetch_ea_32(0x0000_0000);
        assert_eq!(c.cpu.eaaddr, 0x2000);
        assert_eq!(c.cpu.ea_seg, SegReg::Ds as u32);
    }

    #[test]
    fn ea32_ebp_disp8_defaults_to_ss() {
        let mut c = core();
        c.cpu.regs[5] = 0x3000; // EBP
        // mod=1 rm=5: [EBP+disp8]; disp comes from the bus (zeros).
        c.fetch_ea_32(0x0000_0045);
        assert_eq!(c.cpu.eaaddr, 0x3000);
        assert_eq!(c.cpu.ea_seg, SegReg::Ss as u32);
    }

    #[test]
    fn ea32_sib_scaled_index() {
        let mut c = core();
        c.cpu.regs[3] = 0x1000; // EBX
        c.cpu.regs[1] = 0x10; // ECX
        // mod=0 rm=4, SIB = scale 2 (x4), index ECX, base EBX.
        c.fetch_ea_32(0x0000_8b04);
        assert_eq!(c.cpu.eaaddr, 0x1040);
    }
}
