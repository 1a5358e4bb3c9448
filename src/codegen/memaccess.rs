//! Emitters for guest memory accesses: an inline software-TLB fast path
//! with a slow-path call and fault check.
//!
//! Every sequence expects the segment offset in EAX. ECX receives the
//! segment base (skipped in flat mode), ESI/RDI carry the page lookup, and
//! loads leave their result in EAX/RAX. The TLB tables hold host base
//! values such that `slot + linear` addresses the guest byte, with
//! `usize::MAX` marking a miss.

use super::{disp8, offsets, Translator};
use crate::cpu::SegReg;

/// Access widths for the emitted fast paths.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemWidth {
    Byte,
    Word,
    Dword,
    Qword,
}

impl MemWidth {
    fn align_mask(self) -> u32 {
        match self {
            MemWidth::Byte => 0,
            MemWidth::Word => 1,
            MemWidth::Dword => 3,
            MemWidth::Qword => 7,
        }
    }
}

impl Translator {
    /// Whether accesses through `seg` may skip the base addition entirely.
    fn is_flat(&self, seg: SegReg) -> bool {
        match seg {
            SegReg::Ds => self.flat_ds,
            SegReg::Ss => self.flat_ss,
            _ => false,
        }
    }

    /// Emits the shared head: linear address into EDI, virtual page number
    /// into ESI, segment base left in ECX for the slow path.
    fn emit_linear_addr(&mut self, seg: SegReg) {
        if self.is_flat(seg) {
            self.emit_u8(0x31); // XOR ECX, ECX
            self.emit_u8(0xc9);
        } else {
            self.emit_u8(0x8b); // MOV ECX, [rbp + seg.base]
            self.emit_u8(0x4d);
            self.emit_u8(disp8(offsets::seg_base(seg as usize)));
        }
        self.emit_u8(0x67); // LEA ESI, [EAX + ECX]
        self.emit_u8(0x8d);
        self.emit_u8(0x34);
        self.emit_u8(0x08);
        self.emit_u8(0x89); // MOV EDI, ESI
        self.emit_u8(0xf7);
        self.emit_u8(0xc1); // SHR ESI, 12
        self.emit_u8(0xe8 | 6);
        self.emit_u8(12);
    }

    /// Emits the TLB slot fetch into RSI and the miss test; returns the
    /// patch for the miss branch.
    fn emit_tlb_lookup(&mut self, table: u64) -> usize {
        self.emit_u8(0x48); // MOV RDX, table
        self.emit_u8(0xba);
        self.emit_u64(table);
        self.emit_u8(0x48); // MOV RSI, [RDX + RSI*8]
        self.emit_u8(0x8b);
        self.emit_u8(0x34);
        self.emit_u8(0xf2);
        self.emit_u8(0x48); // CMP RSI, -1
        self.emit_u8(0x83);
        self.emit_u8(0xfe);
        self.emit_u8(0xff);
        self.branch_short(0x74) // JE slow
    }

    fn emit_align_test(&mut self, width: MemWidth) -> Option<usize> {
        let mask = width.align_mask();
        if mask == 0 {
            return None;
        }
        self.emit_u8(0xf7); // TEST EDI, mask
        self.emit_u8(0xc7);
        self.emit_u32(mask);
        Some(self.branch_short(0x75)) // JNE slow
    }

    /// Emits an inline load of the given width from `seg:EAX`, result in
    /// EAX (RAX for qwords).
    pub fn mem_load_addr_ea(&mut self, seg: SegReg, width: MemWidth) {
        self.emit_linear_addr(seg);
        let align_patch = self.emit_align_test(width);
        let miss_patch = self.emit_tlb_lookup(self.handlers.readlookup2);

        // Fast path: access through the TLB-provided host base.
        match width {
            MemWidth::Byte => {
                self.emit_u8(0x0f); // MOVZX EAX, byte [RDI + RSI]
                self.emit_u8(0xb6);
                self.emit_u8(0x04);
                self.emit_u8(0x37);
            }
            MemWidth::Word => {
                self.emit_u8(0x0f); // MOVZX EAX, word [RDI + RSI]
                self.emit_u8(0xb7);
                self.emit_u8(0x04);
                self.emit_u8(0x37);
            }
            MemWidth::Dword => {
                self.emit_u8(0x8b); // MOV EAX, [RDI + RSI]
                self.emit_u8(0x04);
                self.emit_u8(0x37);
            }
            MemWidth::Qword => {
                self.emit_u8(0x48); // MOV RAX, [RDI + RSI]
                self.emit_u8(0x8b);
                self.emit_u8(0x04);
                self.emit_u8(0x37);
            }
        }
        let done_patch = self.branch_short(0xeb);

        // Slow path: rebuild the linear address and call out.
        if let Some(p) = align_patch {
            self.set_branch_target(p);
        }
        self.set_branch_target(miss_patch);
        self.emit_u8(0x01); // ADD ECX, EAX
        self.emit_u8(0xc1);
        self.load_param_1_ecx();
        self.load_param_2_imm64(self.ctx);
        let func = match width {
            MemWidth::Byte => self.handlers.read_b,
            MemWidth::Word => self.handlers.read_w,
            MemWidth::Dword => self.handlers.read_l,
            MemWidth::Qword => self.handlers.read_q,
        };
        self.emit_call(func);
        self.emit_abrt_check();

        self.set_branch_target(done_patch);
    }

    /// Emits an inline store of `host` (allocator handle) to `seg:EAX`.
    pub fn mem_store_addr_ea(&mut self, seg: SegReg, mut host: u8, width: MemWidth) {
        if width == MemWidth::Byte && host & super::reg::HOST_REG_HIGH != 0 {
            // High-byte sources shift through EBX first.
            self.emit_u8(0x44); // MOV EBX, src32
            self.emit_u8(0x89);
            self.emit_u8(0xc3 | ((host & 7) << 3));
            self.emit_u8(0xc1); // SHR EBX, 8
            self.emit_u8(0xeb);
            self.emit_u8(0x08);
            host = 3; // plain EBX
        }

        self.emit_linear_addr(seg);
        let align_patch = self.emit_align_test(width);
        let miss_patch = self.emit_tlb_lookup(self.handlers.writelookup2);

        let src = host & 7;
        let rex_r = host & super::reg::HOST_REG_EXT != 0;
        match width {
            MemWidth::Byte => {
                if rex_r {
                    self.emit_u8(0x44);
                }
                self.emit_u8(0x88); // MOV [RDI + RSI], src8
                self.emit_u8(0x04 | (src << 3));
                self.emit_u8(0x37);
            }
            MemWidth::Word => {
                self.emit_u8(0x66);
                if rex_r {
                    self.emit_u8(0x44);
                }
                self.emit_u8(0x89); // MOV [RDI + RSI], src16
                self.emit_u8(0x04 | (src << 3));
                self.emit_u8(0x37);
            }
            MemWidth::Dword => {
                if rex_r {
                    self.emit_u8(0x44);
                }
                self.emit_u8(0x89); // MOV [RDI + RSI], src32
                self.emit_u8(0x04 | (src << 3));
                self.emit_u8(0x37);
            }
            MemWidth::Qword => {
                self.emit_u8(if rex_r { 0x4c } else { 0x48 });
                self.emit_u8(0x89); // MOV [RDI + RSI], src64
                self.emit_u8(0x04 | (src << 3));
                self.emit_u8(0x37);
            }
        }
        let done_patch = self.branch_short(0xeb);

        if let Some(p) = align_patch {
            self.set_branch_target(p);
        }
        self.set_branch_target(miss_patch);
        self.emit_u8(0x01); // ADD ECX, EAX
        self.emit_u8(0xc1);
        self.load_param_1_ecx();
        self.load_param_2_host(host);
        self.load_param_3_imm64(self.ctx);
        let func = match width {
            MemWidth::Byte => self.handlers.write_b,
            MemWidth::Word => self.handlers.write_w,
            MemWidth::Dword => self.handlers.write_l,
            MemWidth::Qword => self.handlers.write_q,
        };
        self.emit_call(func);
        self.emit_abrt_check();

        self.set_branch_target(done_patch);
    }

    /// Load from an immediate offset within `seg`.
    pub fn mem_load_addr_imm(&mut self, seg: SegReg, addr: u32, width: MemWidth) {
        self.emit_u8(0xb8); // MOV EAX, addr
        self.emit_u32(addr);
        self.mem_load_addr_ea(seg, width);
    }

    /// Store to an immediate offset within `seg`.
    pub fn mem_store_addr_imm(&mut self, seg: SegReg, addr: u32, host: u8, width: MemWidth) {
        self.emit_u8(0xb8); // MOV EAX, addr
        self.emit_u32(addr);
        self.mem_store_addr_ea(seg, host, width);
    }

    /// Pre-validates a page for an instruction that issues several writes:
    /// on a write-TLB miss the check handler translates the page (and may
    /// fault) before any store executes. The width widens the check to the
    /// access size.
    pub fn mem_check_write(&mut self, seg: SegReg, width: MemWidth) {
        self.emit_linear_addr(seg);
        let mut slow = Vec::new();
        if let Some(p) = self.emit_align_test(width) {
            slow.push(p);
        }
        let miss = self.emit_tlb_lookup(self.handlers.writelookup2);
        // Hit and aligned: nothing to do.
        let done_patch = self.branch_short(0xeb);

        for p in slow {
            self.set_branch_target(p);
        }
        self.set_branch_target(miss);
        self.emit_u8(0x01); // ADD ECX, EAX
        self.emit_u8(0xc1);
        self.load_param_1_ecx();
        self.load_param_2_imm64(self.ctx);
        let func = match width {
            MemWidth::Byte => self.handlers.check_write,
            MemWidth::Word => self.handlers.check_write_w,
            _ => self.handlers.check_write_l,
        };
        self.emit_call(func);
        self.emit_abrt_check();

        self.set_branch_target(done_patch);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BlockHandle, Translator};
    use super::MemWidth;
    use crate::codegen::timing::TimingKind;
    use crate::cpu::SegReg;
    use crate::mem::MemHandlers;

    fn translator(flat: bool) -> Translator {
        let mut t = Translator::new(TimingKind::I486, MemHandlers::default(), None).unwrap();
        t.flat_ds = flat;
        t.emit_block_frame(0);
        t
    }

    #[test]
    fn flat_mode_skips_the_segment_base_load() {
        let mut flat = translator(true);
        let start = flat.block_pos;
        flat.mem_load_addr_ea(SegReg::Ds, MemWidth::Byte);
        let flat_len = flat.block_pos - start;

        let mut seg = translator(false);
        let start = seg.block_pos;
        seg.mem_load_addr_ea(SegReg::Ds, MemWidth::Byte);
        let seg_len = seg.block_pos - start;

        // XOR ECX,ECX (2 bytes) replaces MOV ECX,[rbp+disp8] (3 bytes).
        assert_eq!(seg_len, flat_len + 1);
        let code = flat.code(BlockHandle(0));
        assert_eq!(&code[start..start + 2], &[0x31, 0xc9]);
    }

    #[test]
    fn wide_accesses_emit_the_alignment_test() {
        let mut t = translator(true);
        let start = t.block_pos;
        t.mem_load_addr_ea(SegReg::Ds, MemWidth::Byte);
        let byte_len = t.block_pos - start;

        let start = t.block_pos;
        t.mem_load_addr_ea(SegReg::Ds, MemWidth::Dword);
        let dword_len = t.block_pos - start;
        // TEST EDI, imm32 + JNE rel8 = 8 extra bytes; the dword MOV is one
        // byte shorter than the byte MOVZX.
        assert_eq!(dword_len, byte_len + 8 - 1);
    }

    #[test]
    fn write_precheck_only_calls_out_on_miss() {
        let mut t = translator(true);
        let start = t.block_pos;
        t.mem_check_write(SegReg::Ds, MemWidth::Dword);
        let code = t.code(BlockHandle(0)).to_vec();
        // A hit skips straight over the slow call: the JMP-done lands right
        // after the CMP/JE pair.
        let found_cmp = code[start..t.block_pos]
            .windows(4)
            .any(|w| w == [0x48, 0x83, 0xfe, 0xff]);
        assert!(found_cmp);
        // The slow path still ends in the abort test.
        let abrt = crate::codegen::disp8(crate::codegen::offsets::abrt());
        let found_abrt = code[start..t.block_pos]
            .windows(4)
            .any(|w| w == [0x80, 0x7d, abrt, 0x00]);
        assert!(found_abrt);
    }

    #[test]
    fn slow_path_checks_the_abort_flag() {
        let mut t = translator(false);
        let start = t.block_pos;
        t.mem_load_addr_ea(SegReg::Ds, MemWidth::Dword);
        let code = t.code(BlockHandle(0)).to_vec();
        // The sequence must contain a CMP byte [rbp+abrt], 0.
        let abrt = crate::codegen::disp8(crate::codegen::offsets::abrt());
        let found = code[start..t.block_pos]
            .windows(4)
            .any(|w| w == [0x80, 0x7d, abrt, 0x00]);
        assert!(found);
    }
}
