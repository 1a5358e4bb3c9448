//! The cycle/instruction accumulator: batches counter updates across
//! emitted instructions and flushes them as single read-modify-write
//! instructions at control-flow boundaries.

use super::{disp8, offsets, Translator};

/// Batched counters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccReg {
    Cycles,
    Ins,
}

impl Translator {
    /// Defers `delta` onto a counter. When the auxiliary cycle counter is
    /// enabled, cycle deltas are additionally emitted inline so the
    /// embedder can observe per-instruction consumption.
    pub fn accumulate(&mut self, reg: AccReg, delta: i32) {
        match reg {
            AccReg::Cycles => {
                self.acc_cycles += delta;
                if let Some(addr) = self.acycs_addr {
                    if delta != 0 {
                        self.emit_u8(0x48); // MOV RSI, &acycs
                        self.emit_u8(0xbe);
                        self.emit_u64(addr);
                        match -delta {
                            1 => {
                                self.emit_u8(0xff); // INC dword [RSI]
                                self.emit_u8(0x06);
                            }
                            -1 => {
                                self.emit_u8(0xff); // DEC dword [RSI]
                                self.emit_u8(0x0e);
                            }
                            n => {
                                self.emit_u8(0x81); // ADD dword [RSI], -delta
                                self.emit_u8(0x06);
                                self.emit_u32(n as u32);
                            }
                        }
                    }
                }
            }
            AccReg::Ins => self.acc_ins += delta,
        }
    }

    /// Emits one `ADD` per dirty counter and clears the batch.
    pub fn accumulate_flush(&mut self) {
        if self.acc_cycles != 0 {
            self.emit_u8(0x81); // ADD dword [rbp + cycles], imm32
            self.emit_u8(0x45);
            self.emit_u8(disp8(offsets::cycles()));
            self.emit_u32(self.acc_cycles as u32);
        }
        if self.acc_ins != 0 {
            // The instruction counter lives outside the disp8 window.
            self.emit_u8(0x48); // MOV RSI, &ins
            self.emit_u8(0xbe);
            self.emit_u64(self.ctx.wrapping_add(offsets::ins() as u64));
            self.emit_u8(0x81); // ADD dword [RSI], imm32
            self.emit_u8(0x06);
            self.emit_u32(self.acc_ins as u32);
        }
        self.acc_cycles = 0;
        self.acc_ins = 0;
    }

    /// Drops any batched counts without emitting.
    pub fn accumulate_reset(&mut self) {
        self.acc_cycles = 0;
        self.acc_ins = 0;
    }

    /// Cycle delta currently batched and not yet emitted.
    pub fn pending_cycles(&self) -> i32 {
        self.acc_cycles
    }
}

#[cfg(test)]
mod tests {
    use super::super::Translator;
    use super::AccReg;
    use crate::codegen::timing::TimingKind;
    use crate::mem::MemHandlers;

    #[test]
    fn deltas_batch_until_flush() {
        let mut t = Translator::new(TimingKind::I486, MemHandlers::default(), None).unwrap();
        t.emit_block_frame(0);
        let start = t.block_pos;
        t.accumulate(AccReg::Cycles, -3);
        t.accumulate(AccReg::Cycles, -2);
        t.accumulate(AccReg::Ins, 2);
        // Nothing emitted yet.
        assert_eq!(t.block_pos, start);
        t.accumulate_flush();
        // One disp8 ADD (7 bytes) plus the absolute-address ins ADD.
        assert_eq!(t.block_pos - start, 7 + 10 + 6);
        // A second flush is a no-op.
        let pos = t.block_pos;
        t.accumulate_flush();
        assert_eq!(t.block_pos, pos);
    }

    #[test]
    fn inline_aux_counter_is_emitted_per_delta() {
        let mut t =
            Translator::new(TimingKind::I486, MemHandlers::default(), Some(0xdead_0000)).unwrap();
        t.emit_block_frame(0);
        let start = t.block_pos;
        t.accumulate(AccReg::Cycles, -1);
        // MOV RSI, imm64 + INC dword [RSI].
        assert_eq!(t.block_pos - start, 10 + 2);
    }
}
