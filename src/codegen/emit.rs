//! The host-code byte emitter. Appends raw x86-64 instruction bytes into
//! the current block's buffer and provides the shared prologue, epilogue
//! and GPF tails plus short-branch patching.
//!
//! Emitted frames follow one shape: the prologue saves the callee-saved
//! registers and loads RBP with `ctx + 128`, so every hot `CpuState` field
//! is addressed as `[rbp + disp8]`. EAX/ECX/ESI/EDI are scratch, guest
//! registers mirror into R8..R15.

use super::{disp8, offsets, Translator, BLOCK_EXIT_OFFSET, BLOCK_GPF_OFFSET, BLOCK_MAX, CPU_STATE_BIAS};
use crate::cpu::ABRT_GPF;

impl Translator {
    #[inline]
    pub fn emit_u8(&mut self, value: u8) {
        let index = self.block_current;
        self.exec.block_mut(index)[self.block_pos] = value;
        self.block_pos += 1;
        if self.block_pos >= BLOCK_MAX {
            self.cpu_block_end = true;
        }
    }

    #[inline]
    pub fn emit_u16(&mut self, value: u16) {
        for b in value.to_le_bytes().iter() {
            self.emit_u8(*b);
        }
    }

    #[inline]
    pub fn emit_u32(&mut self, value: u32) {
        for b in value.to_le_bytes().iter() {
            self.emit_u8(*b);
        }
    }

    #[inline]
    pub fn emit_u64(&mut self, value: u64) {
        for b in value.to_le_bytes().iter() {
            self.emit_u8(*b);
        }
    }

    /// Emits a conditional short branch (or 0xEB for unconditional) with a
    /// placeholder displacement; returns the patch position.
    pub fn branch_short(&mut self, opcode: u8) -> usize {
        self.emit_u8(opcode);
        self.emit_u8(0);
        self.block_pos - 1
    }

    /// Resolves a short branch to the current position.
    pub fn set_branch_target(&mut self, patch: usize) {
        let rel = self.block_pos as i32 - (patch as i32 + 1);
        debug_assert!((-128..=127).contains(&rel), "short branch out of range");
        let index = self.block_current;
        self.exec.block_mut(index)[patch] = rel as i8 as u8;
    }

    /// Emits `Jcc rel32` to the common epilogue. `cc` is the low nibble of
    /// the 0F 8x opcode (5 = JNE).
    pub fn jcc_epilogue(&mut self, cc: u8) {
        self.emit_u8(0x0f);
        self.emit_u8(0x80 | cc);
        let disp = BLOCK_EXIT_OFFSET as i32 - (self.block_pos as i32 + 4);
        self.emit_u32(disp as u32);
    }

    /// `MOV RAX, imm64; CALL RAX`. Any call clobbers the caller-saved
    /// guest-register mirrors, so the loaded flags drop.
    pub fn emit_call(&mut self, func: u64) {
        self.reg_loaded = [false; 8];
        self.emit_u8(0x48); // MOV RAX, imm64
        self.emit_u8(0xb8);
        self.emit_u64(func);
        self.emit_u8(0xff); // CALL RAX
        self.emit_u8(0xd0);
    }

    /// First SysV argument (EDI) from an immediate.
    pub fn load_param_1_imm(&mut self, value: u32) {
        self.emit_u8(0xbf); // MOV EDI, imm32
        self.emit_u32(value);
    }

    /// First SysV argument from ECX.
    pub fn load_param_1_ecx(&mut self) {
        self.emit_u8(0x89); // MOV EDI, ECX
        self.emit_u8(0xcf);
    }

    /// First SysV argument (RDI) from a 64-bit immediate.
    pub fn load_param_1_imm64(&mut self, value: u64) {
        self.emit_u8(0x48); // MOV RDI, imm64
        self.emit_u8(0xbf);
        self.emit_u64(value);
    }

    /// Second SysV argument (ESI) from an immediate.
    pub fn load_param_2_imm(&mut self, value: u32) {
        self.emit_u8(0xbe); // MOV ESI, imm32
        self.emit_u32(value);
    }

    /// Second SysV argument (RSI) from a 64-bit immediate.
    pub fn load_param_2_imm64(&mut self, value: u64) {
        self.emit_u8(0x48); // MOV RSI, imm64
        self.emit_u8(0xbe);
        self.emit_u64(value);
    }

    /// Second SysV argument from a host register holding a value.
    pub fn load_param_2_host(&mut self, host: u8) {
        if host & 8 != 0 {
            self.emit_u8(0x44); // MOV ESI, r8d+
            self.emit_u8(0x89);
            self.emit_u8(0xc6 | ((host & 7) << 3));
        } else {
            self.emit_u8(0x89);
            self.emit_u8(0xc6 | ((host & 7) << 3));
        }
    }

    /// Third SysV argument (RDX) from a 64-bit immediate.
    pub fn load_param_3_imm64(&mut self, value: u64) {
        self.emit_u8(0x48); // MOV RDX, imm64
        self.emit_u8(0xba);
        self.emit_u64(value);
    }

    /// `MOV dword [rbp + off], imm32`.
    pub fn store_imm_disp8(&mut self, offset: usize, value: u32) {
        self.emit_u8(0xc7);
        self.emit_u8(0x45);
        self.emit_u8(disp8(offset));
        self.emit_u32(value);
    }

    /// `MOV byte [rbp + off], imm8`.
    pub fn store_imm8_disp8(&mut self, offset: usize, value: u8) {
        self.emit_u8(0xc6);
        self.emit_u8(0x45);
        self.emit_u8(disp8(offset));
        self.emit_u8(value);
    }

    /// `CMP byte [rbp + abrt], 0; JNE epilogue` — the fault check emitted
    /// after every slow path.
    pub fn emit_abrt_check(&mut self) {
        self.emit_u8(0x80); // CMP byte [rbp+disp8], 0
        self.emit_u8(0x7d);
        self.emit_u8(disp8(offsets::abrt()));
        self.emit_u8(0x00);
        self.jcc_epilogue(5); // JNE
    }

    /// Writes the fixed tails and the prologue of a fresh block:
    /// GPF handler at [`BLOCK_GPF_OFFSET`], epilogue at
    /// [`BLOCK_EXIT_OFFSET`], entry code at offset zero. Leaves the write
    /// position after the prologue.
    pub(crate) fn emit_block_frame(&mut self, ctx: u64) {
        // GPF tail: record the fault, zero the error code, fall through to
        // the exit code.
        self.block_pos = BLOCK_GPF_OFFSET;
        self.store_imm8_disp8(offsets::abrt(), ABRT_GPF);
        self.store_imm_disp8(offsets::abrt_error(), 0);
        debug_assert!(self.block_pos <= BLOCK_EXIT_OFFSET);

        // Common epilogue: restore callee-saved registers and return.
        self.block_pos = BLOCK_EXIT_OFFSET;
        self.emit_u8(0x41); // POP R15
        self.emit_u8(0x5f);
        self.emit_u8(0x41); // POP R14
        self.emit_u8(0x5e);
        self.emit_u8(0x41); // POP R13
        self.emit_u8(0x5d);
        self.emit_u8(0x41); // POP R12
        self.emit_u8(0x5c);
        self.emit_u8(0x5d); // POP RBP
        self.emit_u8(0x5b); // POP RBX
        self.emit_u8(0xc3); // RET

        // Entry: save callee-saved registers, point RBP into the context.
        self.cpu_block_end = false;
        self.block_pos = 0;
        self.emit_u8(0x53); // PUSH RBX
        self.emit_u8(0x55); // PUSH RBP
        self.emit_u8(0x41); // PUSH R12
        self.emit_u8(0x54);
        self.emit_u8(0x41); // PUSH R13
        self.emit_u8(0x55);
        self.emit_u8(0x41); // PUSH R14
        self.emit_u8(0x56);
        self.emit_u8(0x41); // PUSH R15
        self.emit_u8(0x57);
        self.emit_u8(0x48); // MOV RBP, ctx + bias
        self.emit_u8(0xbd);
        self.emit_u64(ctx.wrapping_add(CPU_STATE_BIAS as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BlockHandle, Translator, BLOCK_EXIT_OFFSET, BLOCK_GPF_OFFSET};
    use crate::codegen::timing::TimingKind;
    use crate::mem::MemHandlers;

    fn translator() -> Translator {
        Translator::new(TimingKind::I486, MemHandlers::default(), None).unwrap()
    }

    #[test]
    fn frame_layout() {
        let mut t = translator();
        t.emit_block_frame(0x1000);
        let code = t.code(BlockHandle(0));
        // Entry starts with PUSH RBX.
        assert_eq!(code[0], 0x53);
        // Epilogue ends with RET.
        assert_eq!(code[BLOCK_EXIT_OFFSET + 10], 0xc3);
        // GPF tail writes the abort code.
        assert_eq!(code[BLOCK_GPF_OFFSET], 0xc6);
        // Build position sits just past the prologue.
        assert!(t.block_pos > 0 && t.block_pos < 64);
        assert!(!t.cpu_block_end);
    }

    #[test]
    fn short_branch_patching() {
        let mut t = translator();
        t.emit_block_frame(0);
        let patch = t.branch_short(0x74); // JE
        t.emit_u32(0xdead_beef);
        t.set_branch_target(patch);
        let code = t.code(BlockHandle(0));
        assert_eq!(code[patch] as i8, 4);
    }

    #[test]
    fn buffer_cap_requests_block_end() {
        let mut t = translator();
        t.emit_block_frame(0);
        while t.block_pos < super::super::BLOCK_MAX {
            t.emit_u8(0x90);
        }
        assert!(t.cpu_block_end);
    }
}
