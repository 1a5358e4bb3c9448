//! Per-microarchitecture timing backends. The block builder calls into the
//! selected backend for every prefix and opcode, and the backend feeds
//! cycle counts back for the accumulator.
//!
//! `jump_cycles` exists for the parts that pair branches with following
//! instructions: the dispatcher tentatively deducts the taken-branch cost
//! before the branch and credits it back on the fall-through path.

use num_derive::FromPrimitive;

/// Selectable backends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum TimingKind {
    I486 = 0,
    Pentium = 1,
    P6 = 2,
    K6 = 3,
    WinChip = 4,
    WinChip2 = 5,
}

impl TimingKind {
    pub(crate) fn backend(self) -> Box<dyn TimingBackend> {
        match self {
            TimingKind::I486 => Box::new(I486Timing::default()),
            TimingKind::Pentium => Box::new(PairingTiming::pentium()),
            TimingKind::P6 => Box::new(P6Timing::default()),
            TimingKind::K6 => Box::new(PairingTiming::k6()),
            TimingKind::WinChip => Box::new(WinChipTiming { double_fpu: false }),
            TimingKind::WinChip2 => Box::new(WinChipTiming { double_fpu: true }),
        }
    }
}

/// The timing hooks rebound at CPU-type selection.
pub trait TimingBackend {
    /// A new block begins.
    fn block_start(&mut self) {}
    /// The block is being closed.
    fn block_end(&mut self) {}
    /// A new instruction begins.
    fn start(&mut self) {}
    /// A prefix byte was consumed; returns its cycle cost.
    fn prefix(&mut self, prefix: u8, fetchdat: u32) -> i32;
    /// The opcode was classified; returns its cycle cost.
    fn opcode(&mut self, opcode: u8, fetchdat: u32, op32: u32, op_pc: u32) -> i32;
    /// Cycles a taken branch costs beyond what `opcode` charged, for parts
    /// that overlap branches with following instructions.
    fn jump_cycles(&self) -> Option<i32> {
        None
    }
}

/// Base cycle counts per one-byte opcode, 486 figures. Two-byte opcodes
/// and anything unusual fall back to a flat estimate; the interpreter op
/// itself remains the source of truth for data-dependent costs.
#[rustfmt::skip]
const CYCLES_486: [u8; 256] = [
//  0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f
    3, 3, 2, 2, 1, 1, 3, 4, 3, 3, 2, 2, 1, 1, 3, 1, // 00
    3, 3, 2, 2, 1, 1, 3, 4, 3, 3, 2, 2, 1, 1, 3, 4, // 10
    3, 3, 2, 2, 1, 1, 1, 3, 3, 3, 2, 2, 1, 1, 1, 3, // 20
    3, 3, 2, 2, 1, 1, 1, 3, 3, 3, 2, 2, 1, 1, 1, 3, // 30
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // 40
    1, 1, 1, 1, 1, 1, 1, 1, 4, 4, 4, 4, 4, 4, 4, 4, // 50
   11, 9, 9, 9, 1, 1, 1, 1, 1,14, 1,14, 5, 5, 5, 5, // 60
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, 3, // 70
    1, 1, 1, 1, 2, 2, 3, 3, 1, 1, 1, 1, 3, 1, 3, 4, // 80
    1, 3, 3, 3, 3, 3, 3, 3, 3, 3,18, 5, 4, 5, 2, 3, // 90
    1, 1, 1, 1, 7, 7, 8, 8, 1, 1,13, 5, 5, 5, 3, 3, // a0
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, // b0
    2, 2, 5, 5, 6, 6, 1, 1,14, 5,14,15, 3,26, 3,15, // c0
    2, 2, 3, 3,15,14, 2, 4, 1, 1, 1, 1, 1, 1, 1, 1, // d0
    6, 6,11, 5,14,14,16,16, 3, 3,17, 3,14,14,16,16, // e0
    1, 1, 1, 1, 4, 2, 2, 2, 2, 2, 2, 2, 2, 2, 3, 3, // f0
];

#[derive(Default)]
struct I486Timing;

impl TimingBackend for I486Timing {
    fn prefix(&mut self, _prefix: u8, _fetchdat: u32) -> i32 {
        // One decode cycle per prefix byte.
        1
    }

    fn opcode(&mut self, opcode: u8, _fetchdat: u32, _op32: u32, _op_pc: u32) -> i32 {
        i32::from(CYCLES_486[opcode as usize])
    }
}

/// Pairing flags for the dual-pipe parts: simple one-cycle instructions
/// issue alongside the previous one.
#[rustfmt::skip]
const PAIRABLE: [bool; 256] = {
    let mut p = [false; 256];
    let mut i = 0;
    while i < 256 {
        p[i] = matches!(i,
            // ALU reg/rm forms and short immediates.
            0x00..=0x05 | 0x08..=0x0d | 0x10..=0x15 | 0x18..=0x1d |
            0x20..=0x25 | 0x28..=0x2d | 0x30..=0x35 | 0x38..=0x3d |
            // INC/DEC, PUSH/POP reg.
            0x40..=0x5f |
            // MOV forms.
            0x88..=0x8b | 0xb0..=0xbf |
            // Flag ops and NOP.
            0x90 | 0xf5 | 0xf8 | 0xf9 | 0xfc | 0xfd);
        i += 1;
    }
    p
};

/// Pentium/K6-style in-order dual issue: a pairable instruction following
/// a pairable one costs nothing extra.
struct PairingTiming {
    last_pairable: bool,
    branch_cycles: i32,
}

impl PairingTiming {
    fn pentium() -> Self {
        PairingTiming {
            last_pairable: false,
            branch_cycles: 0,
        }
    }

    fn k6() -> Self {
        PairingTiming {
            last_pairable: false,
            branch_cycles: 1,
        }
    }
}

impl TimingBackend for PairingTiming {
    fn block_start(&mut self) {
        self.last_pairable = false;
    }

    fn prefix(&mut self, _prefix: u8, _fetchdat: u32) -> i32 {
        self.last_pairable = false;
        1
    }

    fn opcode(&mut self, opcode: u8, _fetchdat: u32, _op32: u32, _op_pc: u32) -> i32 {
        let base = i32::from(CYCLES_486[opcode as usize]).min(10);
        if PAIRABLE[opcode as usize] && self.last_pairable {
            self.last_pairable = false;
            0
        } else {
            self.last_pairable = PAIRABLE[opcode as usize];
            base.max(1) - (base > 1) as i32
        }
    }

    fn jump_cycles(&self) -> Option<i32> {
        if self.branch_cycles != 0 {
            Some(self.branch_cycles)
        } else {
            None
        }
    }
}

/// Out-of-order parts: decode bandwidth dominates, so everything simple
/// costs a flat cycle and the complex rest keeps a scaled estimate.
#[derive(Default)]
struct P6Timing;

impl TimingBackend for P6Timing {
    fn prefix(&mut self, _prefix: u8, _fetchdat: u32) -> i32 {
        0
    }

    fn opcode(&mut self, opcode: u8, _fetchdat: u32, _op32: u32, _op_pc: u32) -> i32 {
        (i32::from(CYCLES_486[opcode as usize]) + 1) / 2
    }
}

/// The in-order WinChip core; the C6-II doubles FPU throughput.
struct WinChipTiming {
    double_fpu: bool,
}

impl TimingBackend for WinChipTiming {
    fn prefix(&mut self, _prefix: u8, _fetchdat: u32) -> i32 {
        1
    }

    fn opcode(&mut self, opcode: u8, _fetchdat: u32, _op32: u32, _op_pc: u32) -> i32 {
        let base = i32::from(CYCLES_486[opcode as usize]);
        if self.double_fpu && (0xd8..=0xdf).contains(&opcode) {
            (base + 1) / 2
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn kinds_resolve_from_discriminants() {
        assert_eq!(TimingKind::from_u32(0), Some(TimingKind::I486));
        assert_eq!(TimingKind::from_u32(3), Some(TimingKind::K6));
        assert_eq!(TimingKind::from_u32(99), None);
    }

    #[test]
    fn only_the_pairing_parts_report_jump_cycles() {
        assert!(TimingKind::I486.backend().jump_cycles().is_none());
        assert!(TimingKind::Pentium.backend().jump_cycles().is_none());
        assert_eq!(TimingKind::K6.backend().jump_cycles(), Some(1));
    }

    #[test]
    fn pentium_pairs_simple_instructions() {
        let mut t = PairingTiming::pentium();
        let first = t.opcode(0x89, 0, 0, 0); // MOV r/m, r
        let second = t.opcode(0x01, 0, 0, 0); // ADD r/m, r
        assert!(first >= 1);
        assert_eq!(second, 0);
        // A third in a row starts a new issue slot.
        assert!(t.opcode(0x89, 0, 0, 0) >= 1);
    }
}
