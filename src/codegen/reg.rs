//! Guest-register allocation for emitted code. Guest register `i` mirrors
//! into host register `R8+i` for the lifetime of a block; a per-register
//! loaded flag avoids redundant reloads, and every emitted call drops all
//! of them because R8..R11 are caller-saved.
//!
//! Handles encode the host register in the low three bits, bit 3 for the
//! extended (R8..R15) set, and bit 4 for "high byte of a word register".

use super::{disp8, offsets, Translator};

pub const HOST_REG_EXT: u8 = 0x08;
pub const HOST_REG_HIGH: u8 = 0x10;

impl Translator {
    fn load_guest(&mut self, reg: usize) {
        if !self.reg_loaded[reg & 7] {
            // MOV r32 (R8+reg), [rbp + regs[reg]]
            self.emit_u8(0x44);
            self.emit_u8(0x8b);
            self.emit_u8(0x45 | (((reg & 7) as u8) << 3));
            self.emit_u8(disp8(offsets::reg_l(reg & 7)));
            self.reg_loaded[reg & 7] = true;
        }
    }

    /// Materializes a byte register; `reg` uses the IA-32 byte encoding
    /// (4..8 are the high bytes of the first four).
    pub fn load_reg_b(&mut self, reg: usize) -> u8 {
        self.load_guest(reg & 3);
        let handle = (reg & 3) as u8 | HOST_REG_EXT;
        if reg & 4 != 0 {
            handle | HOST_REG_HIGH
        } else {
            handle
        }
    }

    /// Materializes a word register.
    pub fn load_reg_w(&mut self, reg: usize) -> u8 {
        self.load_guest(reg & 7);
        (reg & 7) as u8 | HOST_REG_EXT
    }

    /// Materializes a dword register.
    pub fn load_reg_l(&mut self, reg: usize) -> u8 {
        self.load_guest(reg & 7);
        (reg & 7) as u8 | HOST_REG_EXT
    }

    /// Writes a byte-register result back to the host mirror and the
    /// guest-register memory image.
    pub fn store_reg_target_b_release(&mut self, host: u8, guest: usize) {
        let dest = self.load_reg_l(guest & 3) & 7;
        let src = host & 7;

        if guest & 4 != 0 {
            // High byte: rotate the value into AX, merge into the mirror.
            self.emit_u8(0x66); // MOV AX, src16
            if host & HOST_REG_EXT != 0 {
                self.emit_u8(0x44);
            }
            self.emit_u8(0x89);
            self.emit_u8(0xc0 | (src << 3));
            if host & HOST_REG_HIGH != 0 {
                self.emit_u8(0x66); // AND AX, 0xff00
                self.emit_u8(0x25);
                self.emit_u16(0xff00);
            } else {
                self.emit_u8(0x66); // SHL AX, 8
                self.emit_u8(0xc1);
                self.emit_u8(0xe0);
                self.emit_u8(0x08);
            }
            self.emit_u8(0x66); // AND dest16, 0x00ff
            self.emit_u8(0x41);
            self.emit_u8(0x81);
            self.emit_u8(0xe0 | dest);
            self.emit_u16(0x00ff);
            self.emit_u8(0x66); // OR dest16, AX
            self.emit_u8(0x41);
            self.emit_u8(0x09);
            self.emit_u8(0xc0 | dest);
            self.emit_u8(0x66); // MOV [rbp + regs[guest].w], dest16
            self.emit_u8(0x44);
            self.emit_u8(0x89);
            self.emit_u8(0x45 | (dest << 3));
            self.emit_u8(disp8(offsets::reg_w(guest & 3)));
        } else {
            if host & HOST_REG_HIGH != 0 {
                // Source is a high byte: move through AX first.
                self.emit_u8(0x66); // MOV AX, src16
                if host & HOST_REG_EXT != 0 {
                    self.emit_u8(0x44);
                }
                self.emit_u8(0x89);
                self.emit_u8(0xc0 | (src << 3));
                self.emit_u8(0x88); // MOV AL, AH
                self.emit_u8(0xe0);
                self.emit_u8(0x41); // MOV dest8, AL
                self.emit_u8(0x88);
                self.emit_u8(0xc0 | dest);
                self.emit_u8(0x88); // MOV [rbp + regs[guest].b], AL
                self.emit_u8(0x45);
                self.emit_u8(disp8(offsets::reg_b(guest & 3)));
            } else if host & HOST_REG_EXT != 0 {
                self.emit_u8(0x45); // MOV dest8, src8 (both extended)
                self.emit_u8(0x88);
                self.emit_u8(0xc0 | dest | (src << 3));
                self.emit_u8(0x44); // MOV [rbp + regs[guest].b], src8
                self.emit_u8(0x88);
                self.emit_u8(0x45 | (src << 3));
                self.emit_u8(disp8(offsets::reg_b(guest & 3)));
            } else {
                self.emit_u8(0x41); // MOV dest8, src8
                self.emit_u8(0x88);
                self.emit_u8(0xc0 | dest | (src << 3));
                self.emit_u8(0x88); // MOV [rbp + regs[guest].b], src8
                self.emit_u8(0x45 | (src << 3));
                self.emit_u8(disp8(offsets::reg_b(guest & 3)));
            }
        }
    }

    /// Writes a word-register result back to mirror and memory.
    pub fn store_reg_target_w_release(&mut self, host: u8, guest: usize) {
        let dest = self.load_reg_l(guest & 7) & 7;
        let src = host & 7;
        let rex = if host & HOST_REG_EXT != 0 { 0x45 } else { 0x41 };

        self.emit_u8(0x66); // MOV dest16, src16
        self.emit_u8(rex);
        self.emit_u8(0x89);
        self.emit_u8(0xc0 | dest | (src << 3));
        self.emit_u8(0x66); // MOV [rbp + regs[guest].w], src16
        if host & HOST_REG_EXT != 0 {
            self.emit_u8(0x44);
        }
        self.emit_u8(0x89);
        self.emit_u8(0x45 | (src << 3));
        self.emit_u8(disp8(offsets::reg_w(guest & 7)));
    }

    /// Writes a dword-register result back to mirror and memory.
    pub fn store_reg_target_l_release(&mut self, host: u8, guest: usize) {
        let dest = (guest & 7) as u8;
        let src = host & 7;
        let rex = if host & HOST_REG_EXT != 0 { 0x45 } else { 0x41 };

        self.emit_u8(rex); // MOV dest32 (R8+guest), src32
        self.emit_u8(0x89);
        self.emit_u8(0xc0 | dest | (src << 3));
        if host & HOST_REG_EXT != 0 {
            self.emit_u8(0x44);
        }
        self.emit_u8(0x89); // MOV [rbp + regs[guest].l], src32
        self.emit_u8(0x45 | (src << 3));
        self.emit_u8(disp8(offsets::reg_l(guest & 7)));
        self.reg_loaded[guest & 7] = true;
    }

    /// `MOV byte [rbp + regs[guest].b], imm`; the memory image becomes the
    /// source of truth, so any stale mirror is dropped.
    pub fn store_imm_reg_b(&mut self, guest: usize, value: u8) {
        self.reg_loaded[guest & 3] = false;
        self.emit_u8(0xc6);
        self.emit_u8(0x45);
        self.emit_u8(disp8(offsets::reg_b(guest)));
        self.emit_u8(value);
    }

    /// `MOV word [rbp + regs[guest].w], imm`.
    pub fn store_imm_reg_w(&mut self, guest: usize, value: u16) {
        self.reg_loaded[guest & 7] = false;
        self.emit_u8(0x66);
        self.emit_u8(0xc7);
        self.emit_u8(0x45);
        self.emit_u8(disp8(offsets::reg_w(guest & 7)));
        self.emit_u16(value);
    }

    /// `MOV dword [rbp + regs[guest].l], imm`.
    pub fn store_imm_reg_l(&mut self, guest: usize, value: u32) {
        self.reg_loaded[guest & 7] = false;
        self.store_imm_disp8(offsets::reg_l(guest & 7), value);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BlockHandle, Translator};
    use super::{HOST_REG_EXT, HOST_REG_HIGH};
    use crate::codegen::timing::TimingKind;
    use crate::mem::MemHandlers;

    fn translator() -> Translator {
        let mut t = Translator::new(TimingKind::I486, MemHandlers::default(), None).unwrap();
        t.emit_block_frame(0);
        t
    }

    #[test]
    fn load_is_cached_within_a_block() {
        let mut t = translator();
        let before = t.block_pos;
        let h1 = t.load_reg_l(3);
        let after_first = t.block_pos;
        let h2 = t.load_reg_l(3);
        assert_eq!(h1, h2);
        assert_eq!(h1, 3 | HOST_REG_EXT);
        assert!(after_first > before);
        // Second load emits nothing.
        assert_eq!(t.block_pos, after_first);
    }

    #[test]
    fn calls_invalidate_loaded_registers() {
        let mut t = translator();
        t.load_reg_l(0);
        assert!(t.reg_loaded[0]);
        t.emit_call(0x1234);
        assert!(!t.reg_loaded[0]);
    }

    #[test]
    fn byte_handles_carry_the_high_flag() {
        let mut t = translator();
        let al = t.load_reg_b(0);
        let ah = t.load_reg_b(4);
        assert_eq!(al & 7, 0);
        assert_eq!(ah & HOST_REG_HIGH, HOST_REG_HIGH);
        // Both alias guest register 0, so only one load was emitted.
        assert!(t.reg_loaded[0]);
        let code = t.code(BlockHandle(0));
        let _ = code;
    }
}
