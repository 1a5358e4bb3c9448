//! Effective-address emission for ModR/M operands. Generates host code
//! that computes the guest offset into EAX and stores it to
//! `cpu_state.eaaddr`, applying the architectural stack-segment defaults
//! to the builder's shadow segment.

use super::{disp8, offsets, Translator};
use crate::cpu::{SegReg, REG_BP, REG_BX, REG_DI, REG_SI};

impl Translator {
    /// 16-bit ModR/M address. `fetchdat` holds the ModR/M byte in its low
    /// byte; `op_pc` advances past any displacement.
    pub fn gen_ea_16(&mut self, fetchdat: u32, op_pc: &mut u32) {
        let md = (fetchdat >> 6) & 3;
        let rm = fetchdat & 7;

        if md == 0 && rm == 6 {
            // Pure disp16.
            self.store_imm_disp8(offsets::eaaddr(), (fetchdat >> 8) & 0xffff);
            *op_pc = op_pc.wrapping_add(2);
            return;
        }

        let base_reg = match rm {
            0 | 1 | 7 => self.load_reg_w(REG_BX),
            2 | 3 | 6 => self.load_reg_w(REG_BP),
            4 => self.load_reg_w(REG_SI),
            _ => self.load_reg_w(REG_DI),
        } & 7;
        let index_reg = if rm & 4 == 0 {
            (if rm & 1 != 0 {
                self.load_reg_w(REG_DI)
            } else {
                self.load_reg_w(REG_SI)
            }) & 7
        } else {
            0
        };

        match md {
            0 => {
                if rm & 4 != 0 {
                    self.emit_u8(0x41); // MOVZX EAX, base16
                    self.emit_u8(0x0f);
                    self.emit_u8(0xb7);
                    self.emit_u8(0xc0 | base_reg);
                } else {
                    self.emit_u8(0x67); // LEA EAX, [base + index]
                    self.emit_u8(0x43);
                    self.emit_u8(0x8d);
                    if base_reg == 5 {
                        // R13 base needs the disp8 form.
                        self.emit_u8(0x44);
                        self.emit_u8(base_reg | (index_reg << 3));
                        self.emit_u8(0);
                    } else {
                        self.emit_u8(0x04);
                        self.emit_u8(base_reg | (index_reg << 3));
                    }
                }
            }
            1 => {
                if rm & 4 != 0 {
                    self.emit_u8(0x67); // LEA EAX, [base + disp8]
                    self.emit_u8(0x41);
                    self.emit_u8(0x8d);
                    self.emit_u8(0x40 | base_reg);
                    self.emit_u8((fetchdat >> 8) as u8);
                } else {
                    self.emit_u8(0x67); // LEA EAX, [base + index + disp8]
                    self.emit_u8(0x43);
                    self.emit_u8(0x8d);
                    self.emit_u8(0x44);
                    self.emit_u8(base_reg | (index_reg << 3));
                    self.emit_u8((fetchdat >> 8) as u8);
                }
                *op_pc = op_pc.wrapping_add(1);
            }
            _ => {
                if rm & 4 != 0 {
                    self.emit_u8(0x67); // LEA EAX, [base + disp32]
                    self.emit_u8(0x41);
                    self.emit_u8(0x8d);
                    self.emit_u8(0x80 | base_reg);
                    self.emit_u32((fetchdat >> 8) & 0xffff);
                } else {
                    self.emit_u8(0x67); // LEA EAX, [base + index + disp32]
                    self.emit_u8(0x43);
                    self.emit_u8(0x8d);
                    self.emit_u8(0x84);
                    self.emit_u8(base_reg | (index_reg << 3));
                    self.emit_u32((fetchdat >> 8) & 0xffff);
                }
                *op_pc = op_pc.wrapping_add(2);
            }
        }

        if md != 0 || rm & 4 == 0 {
            self.emit_u8(0x25); // AND EAX, 0xffff
            self.emit_u32(0xffff);
        }
        self.emit_u8(0x89); // MOV [rbp + eaaddr], EAX
        self.emit_u8(0x45);
        self.emit_u8(disp8(offsets::eaaddr()));

        if matches!(rm, 2 | 3 | 6) && !self.op_ssegs {
            self.op_ea_seg = SegReg::Ss;
        }
    }

    /// 32-bit ModR/M address with SIB decoding. `fetch` reads a code dword
    /// at a guest code offset; `stack_offset` bakes in the POP
    /// compensation for ESP-relative operands.
    pub fn gen_ea_32(
        &mut self,
        fetchdat: u32,
        op_pc: &mut u32,
        stack_offset: i32,
        fetch: &mut dyn FnMut(u32) -> u32,
    ) {
        let md = (fetchdat >> 6) & 3;
        let rm = fetchdat & 7;

        if rm == 4 {
            let sib = ((fetchdat >> 8) & 0xff) as u8;
            *op_pc = op_pc.wrapping_add(1);

            let base_reg: i32 = if md != 0 || (sib & 7) != 5 {
                (self.load_reg_l((sib & 7) as usize) & 7) as i32
            } else {
                -1
            };
            let index_reg: i32 = if ((sib >> 3) & 7) != 4 {
                (self.load_reg_l(((sib >> 3) & 7) as usize) & 7) as i32
            } else {
                -1
            };

            if index_reg < 0 {
                match md {
                    0 => {
                        if (sib & 7) == 5 {
                            let addr = fetch(op_pc.wrapping_add(1));
                            self.emit_u8(0xb8); // MOV EAX, disp32
                            self.emit_u32(addr);
                            *op_pc = op_pc.wrapping_add(4);
                        } else {
                            self.emit_u8(0x44); // MOV EAX, base32
                            self.emit_u8(0x89);
                            self.emit_u8(0xc0 | ((base_reg as u8) << 3));
                        }
                    }
                    1 => {
                        self.emit_u8(0x67); // LEA EAX, [base + disp8]
                        self.emit_u8(0x41);
                        self.emit_u8(0x8d);
                        if base_reg == 4 {
                            self.emit_u8(0x44);
                            self.emit_u8(0x24);
                        } else {
                            self.emit_u8(0x40 | base_reg as u8);
                        }
                        self.emit_u8((fetchdat >> 16) as u8);
                        *op_pc = op_pc.wrapping_add(1);
                    }
                    _ => {
                        let addr = fetch(op_pc.wrapping_add(1));
                        self.emit_u8(0x67); // LEA EAX, [base + disp32]
                        self.emit_u8(0x41);
                        self.emit_u8(0x8d);
                        if base_reg == 4 {
                            self.emit_u8(0x84);
                            self.emit_u8(0x24);
                        } else {
                            self.emit_u8(0x80 | base_reg as u8);
                        }
                        self.emit_u32(addr);
                        *op_pc = op_pc.wrapping_add(4);
                    }
                }
            } else {
                let scale_bits = sib & 0xc0;
                match md {
                    0 => {
                        if (sib & 7) == 5 {
                            let addr = fetch(op_pc.wrapping_add(1));
                            if scale_bits != 0 {
                                self.emit_u8(0x67); // LEA EAX, [disp32 + index*scale]
                                self.emit_u8(0x42);
                                self.emit_u8(0x8d);
                                self.emit_u8(0x04);
                                self.emit_u8(0x05 | scale_bits | ((index_reg as u8) << 3));
                                self.emit_u32(addr);
                            } else {
                                self.emit_u8(0x67); // LEA EAX, [disp32 + index]
                                self.emit_u8(0x41);
                                self.emit_u8(0x8d);
                                self.emit_u8(0x80 | index_reg as u8);
                                self.emit_u32(addr);
                            }
                            *op_pc = op_pc.wrapping_add(4);
                        } else {
                            self.emit_u8(0x67); // LEA EAX, [base + index*scale]
                            self.emit_u8(0x43);
                            self.emit_u8(0x8d);
                            if base_reg == 5 {
                                self.emit_u8(0x44);
                                self.emit_u8(base_reg as u8 | ((index_reg as u8) << 3) | scale_bits);
                                self.emit_u8(0);
                            } else {
                                self.emit_u8(0x04);
                                self.emit_u8(base_reg as u8 | ((index_reg as u8) << 3) | scale_bits);
                            }
                        }
                    }
                    1 => {
                        self.emit_u8(0x67); // LEA EAX, [base + index*scale + disp8]
                        self.emit_u8(0x43);
                        self.emit_u8(0x8d);
                        self.emit_u8(0x44);
                        self.emit_u8(base_reg as u8 | ((index_reg as u8) << 3) | scale_bits);
                        self.emit_u8((fetchdat >> 16) as u8);
                        *op_pc = op_pc.wrapping_add(1);
                    }
                    _ => {
                        let addr = fetch(op_pc.wrapping_add(1));
                        self.emit_u8(0x67); // LEA EAX, [base + index*scale + disp32]
                        self.emit_u8(0x43);
                        self.emit_u8(0x8d);
                        self.emit_u8(0x84);
                        self.emit_u8(base_reg as u8 | ((index_reg as u8) << 3) | scale_bits);
                        self.emit_u32(addr);
                        *op_pc = op_pc.wrapping_add(4);
                    }
                }
            }

            if stack_offset != 0 && (sib & 7) == 4 && (md != 0 || (sib & 7) != 5) {
                // ESP-relative: compensate for the value the instruction
                // pops before the address is used.
                self.emit_u8(0x05); // ADD EAX, stack_offset
                self.emit_u32(stack_offset as u32);
            }
            if ((sib & 7) == 4 || (md != 0 && (sib & 7) == 5)) && !self.op_ssegs {
                self.op_ea_seg = SegReg::Ss;
            }

            self.emit_u8(0x89); // MOV [rbp + eaaddr], EAX
            self.emit_u8(0x45);
            self.emit_u8(disp8(offsets::eaaddr()));
        } else {
            if md == 0 && rm == 5 {
                // Pure disp32.
                let addr = fetch(op_pc.wrapping_add(1));
                self.store_imm_disp8(offsets::eaaddr(), addr);
                *op_pc = op_pc.wrapping_add(4);
                return;
            }
            let base_reg = self.load_reg_l(rm as usize) & 7;
            if md != 0 {
                if rm == 5 && !self.op_ssegs {
                    self.op_ea_seg = SegReg::Ss;
                }
                if md == 1 {
                    self.emit_u8(0x67); // LEA EAX, [base + disp8]
                    self.emit_u8(0x41);
                    self.emit_u8(0x8d);
                    self.emit_u8(0x40 | base_reg);
                    self.emit_u8((fetchdat >> 8) as u8);
                    *op_pc = op_pc.wrapping_add(1);
                } else {
                    let addr = fetch(op_pc.wrapping_add(1));
                    self.emit_u8(0x67); // LEA EAX, [base + disp32]
                    self.emit_u8(0x41);
                    self.emit_u8(0x8d);
                    self.emit_u8(0x80 | base_reg);
                    self.emit_u32(addr);
                    *op_pc = op_pc.wrapping_add(4);
                }
                self.emit_u8(0x89); // MOV [rbp + eaaddr], EAX
                self.emit_u8(0x45);
                self.emit_u8(disp8(offsets::eaaddr()));
            } else {
                self.emit_u8(0x44); // MOV [rbp + eaaddr], base32
                self.emit_u8(0x89);
                self.emit_u8(0x45 | (base_reg << 3));
                self.emit_u8(disp8(offsets::eaaddr()));
                // Also leave the offset in EAX for a following access.
                self.emit_u8(0x44);
                self.emit_u8(0x89);
                self.emit_u8(0xc0 | (base_reg << 3));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Translator;
    use crate::codegen::timing::TimingKind;
    use crate::cpu::SegReg;
    use crate::mem::MemHandlers;

    fn translator() -> Translator {
        let mut t = Translator::new(TimingKind::I486, MemHandlers::default(), None).unwrap();
        t.emit_block_frame(0);
        t
    }

    #[test]
    fn bp_based_forms_default_to_ss() {
        let mut t = translator();
        let mut pc = 0x100;
        // mod=1 rm=6: [BP + disp8].
        t.gen_ea_16(0x0000_0846, &mut pc);
        assert_eq!(t.op_ea_seg, SegReg::Ss);
        assert_eq!(pc, 0x101);
    }

    #[test]
    fn disp16_form_advances_pc_and_keeps_ds() {
        let mut t = translator();
        let mut pc = 0x100;
        t.gen_ea_16(0x0034_1206, &mut pc);
        assert_eq!(t.op_ea_seg, SegReg::Ds);
        assert_eq!(pc, 0x102);
    }

    #[test]
    fn segment_override_suppresses_the_ss_default() {
        let mut t = translator();
        t.op_ssegs = true;
        t.op_ea_seg = SegReg::Es;
        let mut pc = 0x100;
        t.gen_ea_16(0x0000_0846, &mut pc);
        assert_eq!(t.op_ea_seg, SegReg::Es);
    }

    #[test]
    fn ea32_ebp_disp8_defaults_to_ss() {
        let mut t = translator();
        let mut pc = 0x100;
        let mut fetch = |_: u32| 0u32;
        // mod=1 rm=5: [EBP + disp8].
        t.gen_ea_32(0x0000_0045, &mut pc, 0, &mut fetch);
        assert_eq!(t.op_ea_seg, SegReg::Ss);
        assert_eq!(pc, 0x101);
    }

    #[test]
    fn ea32_disp32_fetches_the_immediate() {
        let mut t = translator();
        let mut pc = 0x100;
        let mut fetched_at = 0;
        let mut fetch = |at: u32| {
            fetched_at = at;
            0xcafe_f00d
        };
        // mod=0 rm=5: pure disp32.
        t.gen_ea_32(0x0000_0005, &mut pc, 0, &mut fetch);
        assert_eq!(fetched_at, 0x101);
        assert_eq!(pc, 0x104);
    }
}
