//! The dynamic recompiler: block cache, host-code emitter, register
//! allocator, addressing and memory-access emitters, cycle accumulator and
//! the per-instruction dispatcher.
//!
//! One [`Translator`] owns the fixed ring of code blocks, the hash table
//! and every piece of per-block build state. The higher-level build
//! protocol (block_init / start_recompile / generate_call / block_end) is
//! implemented on [`crate::context::Core`] in [`builder`], since it needs
//! the bus for instruction fetches.

pub mod accumulate;
pub mod builder;
pub mod cache;
pub mod ea;
pub mod emit;
pub mod memaccess;
pub mod ops;
pub mod reg;
pub mod timing;

use crate::cpu::SegReg;
use crate::error::Error;
use crate::exec::ExecRegion;
use crate::mem::MemHandlers;
use bitflags::bitflags;
use timing::{TimingBackend, TimingKind};

/// Number of blocks in the translation ring.
pub const BLOCK_SIZE: usize = 0x4000;
pub const BLOCK_MASK: usize = 0x3fff;

/// Hash table over physical entry addresses.
pub const HASH_SIZE: usize = 0x20000;
pub const HASH_MASK: u32 = 0x1ffff;

#[inline]
pub fn hash(phys: u32) -> usize {
    (phys & HASH_MASK) as usize
}

/// Capacity of one block's code buffer.
pub const BLOCK_DATA_SIZE: usize = 2048;
/// Start of the common epilogue within each buffer.
pub const BLOCK_EXIT_OFFSET: usize = 0x7f0;
/// Start of the GPF-handler tail.
pub const BLOCK_GPF_OFFSET: usize = BLOCK_EXIT_OFFSET - 14;
/// Soft cap for emitted code; the rest of the buffer is reserved for the
/// fixed tails above.
pub const BLOCK_MAX: usize = 1720;

/// Displacement of the emitted base pointer: the prologue loads
/// `ctx + 128` so CpuState fields use one-byte displacements.
pub const CPU_STATE_BIAS: i32 = 128;

/// Index of a block in the ring. All inter-block links (lists, tree, hash)
/// are handles, never pointers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHandle(pub u16);

impl BlockHandle {
    pub const NONE: BlockHandle = BlockHandle(u16::MAX);

    #[inline]
    pub fn is_none(self) -> bool {
        self == BlockHandle::NONE
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Per-block property bits.
    pub struct BlockFlags: u32 {
        /// The block contains x87 instructions.
        const HAS_FPU = 1 << 0;
        /// The block is always entered with the same FPU top-of-stack.
        const STATIC_TOP = 1 << 1;
    }
}

/// Interpreter fallback for one opcode: receives the context pointer and
/// the fetched ModR/M+immediate dword, returns nonzero when the
/// instruction aborted or requests a block exit.
pub type OpFn = unsafe extern "sysv64" fn(ctx: *mut u8, fetchdat: u32) -> u32;

/// Outcome of a specialized recompiler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recomp {
    /// No specialized path; emit the generic interpreter call.
    Fail,
    /// Recompiled; the dispatcher stores this PC.
    Done(u32),
    /// Recompiled and the emitted code manages the PC itself (branches).
    DoneNoPc,
}

/// A specialized per-opcode recompiler: `(translator, opcode, fetchdat,
/// op_32, op_pc, fetch)`; `fetch` reads a code dword at a PC-relative
/// offset.
pub type RecompFn =
    fn(&mut Translator, u8, u32, u32, u32, &mut dyn FnMut(u32) -> u32) -> Recomp;

/// Metadata of one cached translation. The code bytes live in the
/// translator's executable region at the same index.
#[derive(Clone)]
pub struct CodeBlock {
    /// 64-byte-granular mask of the code cells this block occupies within
    /// its first page quadrant, and within the straddled one.
    pub page_mask: u64,
    pub page_mask2: u64,
    /// Identity comparator: `(phys << 32) | cs_base`.
    pub cmp: u64,

    // Per-page list links, one set per page the block can span.
    pub prev: BlockHandle,
    pub next: BlockHandle,
    pub prev2: BlockHandle,
    pub next2: BlockHandle,

    // Intra-page lookup tree links.
    pub parent: BlockHandle,
    pub left: BlockHandle,
    pub right: BlockHandle,

    pub ins: u32,
    pub valid: bool,
    pub was_recompiled: bool,
    /// FPU top-of-stack the block was compiled against.
    pub top: i32,

    pub pc: u32,
    pub cs_base: u32,
    pub endpc: u32,
    pub phys: u32,
    pub phys2: u32,
    /// CPU mode bits snapshotted at compile time.
    pub status: u32,
    pub flags: BlockFlags,
}

impl Default for CodeBlock {
    fn default() -> Self {
        CodeBlock {
            page_mask: 0,
            page_mask2: 0,
            cmp: 0,
            prev: BlockHandle::NONE,
            next: BlockHandle::NONE,
            prev2: BlockHandle::NONE,
            next2: BlockHandle::NONE,
            parent: BlockHandle::NONE,
            left: BlockHandle::NONE,
            right: BlockHandle::NONE,
            ins: 0,
            valid: false,
            was_recompiled: false,
            top: 0,
            pc: 0,
            cs_base: 0,
            endpc: 0,
            phys: 0,
            phys2: 0,
            status: 0,
            flags: BlockFlags::empty(),
        }
    }
}

/// The translator: block ring, indices, and all per-block build state.
pub struct Translator {
    pub(crate) blocks: Vec<CodeBlock>,
    pub(crate) exec: ExecRegion,
    pub(crate) hash: Vec<BlockHandle>,

    /// Ring cursor; the block currently being built or last built.
    pub block_current: usize,
    /// Write position within the current block's buffer.
    pub block_pos: usize,
    /// Set when the current instruction must be the block's last.
    pub cpu_block_end: bool,
    /// Upper bound of the guest code the block covers.
    pub endpc: u32,
    /// Physical page being recompiled, `u32::MAX` when idle.
    pub recomp_page: u32,
    pub in_recompile: bool,

    // Dispatcher shadow state, reset per block.
    pub op_ea_seg: SegReg,
    pub op_ssegs: bool,
    pub op_old_pc: u32,
    pub(crate) last_op32: u32,
    pub(crate) last_ea_seg: i32,
    pub(crate) last_ssegs: i32,
    pub(crate) reg_loaded: [bool; 8],
    pub(crate) flat_ds: bool,
    pub(crate) flat_ss: bool,
    pub(crate) stack32: bool,

    // Cycle accounting.
    pub block_cycles: i32,
    /// Instructions translated into the current block.
    pub block_ins: i32,
    /// Instructions translated including prefix-only iterations.
    pub block_full_ins: i32,
    pub(crate) acc_cycles: i32,
    pub(crate) acc_ins: i32,
    pub(crate) acycs_addr: Option<u64>,

    /// `flush_write_page` notifications for the bus, drained by the core.
    pub(crate) pending_page_notifications: Vec<(u32, u32)>,

    /// Context pointer baked into the block being built.
    pub(crate) ctx: u64,
    pub(crate) handlers: MemHandlers,
    pub(crate) timing: Box<dyn TimingBackend>,

    /// Specialized recompilers; cold entries fall through to the
    /// interpreter call.
    pub(crate) recomp: &'static [Option<RecompFn>; 512],
}

impl Translator {
    pub fn new(
        timing: TimingKind,
        handlers: MemHandlers,
        acycs_addr: Option<u64>,
    ) -> Result<Self, Error> {
        let exec = ExecRegion::new(BLOCK_SIZE, BLOCK_DATA_SIZE)?;
        Ok(Translator {
            blocks: vec![CodeBlock::default(); BLOCK_SIZE],
            exec,
            hash: vec![BlockHandle::NONE; HASH_SIZE],
            block_current: 0,
            block_pos: 0,
            cpu_block_end: false,
            endpc: 0,
            recomp_page: u32::MAX,
            in_recompile: false,
            op_ea_seg: SegReg::Ds,
            op_ssegs: false,
            op_old_pc: 0,
            last_op32: u32::MAX,
            last_ea_seg: -1,
            last_ssegs: -1,
            reg_loaded: [false; 8],
            flat_ds: false,
            flat_ss: false,
            stack32: false,
            block_cycles: 0,
            block_ins: 0,
            block_full_ins: 0,
            acc_cycles: 0,
            acc_ins: 0,
            acycs_addr,
            pending_page_notifications: Vec::new(),
            ctx: 0,
            handlers,
            timing: timing.backend(),
            recomp: ops::recomp_table(),
        })
    }

    #[inline]
    pub fn block(&self, handle: BlockHandle) -> &CodeBlock {
        &self.blocks[handle.index()]
    }

    #[inline]
    pub fn block_mut(&mut self, handle: BlockHandle) -> &mut CodeBlock {
        &mut self.blocks[handle.index()]
    }

    /// The current block's handle.
    #[inline]
    pub fn current(&self) -> BlockHandle {
        BlockHandle(self.block_current as u16)
    }

    /// Host entry point of a finished block.
    #[inline]
    pub fn entry(&self, handle: BlockHandle) -> *const u8 {
        self.exec.entry(handle.index())
    }

    /// Emitted code bytes of a block (for inspection and tests).
    #[inline]
    pub fn code(&self, handle: BlockHandle) -> &[u8] {
        self.exec.block(handle.index())
    }

    /// Selects a different timing backend; takes effect from the next
    /// block.
    pub fn set_timing(&mut self, timing: TimingKind) {
        self.timing = timing.backend();
    }
}

/// One-byte displacement of a `CpuState` field for the emitted base
/// register. Panics (at translation time) if the field is outside the
/// addressable window, which would be a layout bug.
pub fn disp8(offset: usize) -> u8 {
    let rel = offset as i32 - CPU_STATE_BIAS;
    debug_assert!((-128..=127).contains(&rel));
    rel as i8 as u8
}

/// Displacement helpers for the fields emitted code touches.
pub mod offsets {
    use crate::cpu::CpuState;
    use core::mem::offset_of;

    pub fn reg_l(index: usize) -> usize {
        offset_of!(CpuState, regs) + index * 4
    }

    pub fn reg_w(index: usize) -> usize {
        reg_l(index)
    }

    /// Byte registers: 0..4 low bytes, 4..8 high bytes of the first four.
    pub fn reg_b(index: usize) -> usize {
        if index & 4 != 0 {
            reg_l(index & 3) + 1
        } else {
            reg_l(index & 3)
        }
    }

    pub fn seg_base(seg: usize) -> usize {
        offset_of!(CpuState, segs) + seg * core::mem::size_of::<crate::cpu::Segment>()
    }

    pub fn pc() -> usize {
        offset_of!(CpuState, pc)
    }

    pub fn oldpc() -> usize {
        offset_of!(CpuState, oldpc)
    }

    pub fn eaaddr() -> usize {
        offset_of!(CpuState, eaaddr)
    }

    pub fn ea_seg() -> usize {
        offset_of!(CpuState, ea_seg)
    }

    pub fn op32() -> usize {
        offset_of!(CpuState, op32)
    }

    pub fn rm_data() -> usize {
        offset_of!(CpuState, rm_data)
    }

    pub fn cycles() -> usize {
        offset_of!(CpuState, cycles)
    }

    pub fn abrt() -> usize {
        offset_of!(CpuState, abrt)
    }

    pub fn ssegs() -> usize {
        offset_of!(CpuState, ssegs)
    }

    pub fn abrt_error() -> usize {
        offset_of!(CpuState, abrt_error)
    }

    pub fn ins() -> usize {
        offset_of!(CpuState, ins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_zones_fit_the_buffer() {
        assert!(BLOCK_MAX < BLOCK_GPF_OFFSET);
        assert!(BLOCK_GPF_OFFSET < BLOCK_EXIT_OFFSET);
        assert!(BLOCK_EXIT_OFFSET < BLOCK_DATA_SIZE);
    }

    #[test]
    fn handle_sentinel() {
        assert!(BlockHandle::NONE.is_none());
        assert!(!BlockHandle(0).is_none());
        assert!(BLOCK_SIZE - 1 < u16::MAX as usize);
    }

    #[test]
    fn emitted_fields_are_disp8_addressable() {
        for off in [
            offsets::reg_l(7),
            offsets::pc(),
            offsets::eaaddr(),
            offsets::cycles(),
            offsets::abrt(),
            offsets::seg_base(5),
        ]
        .iter()
        {
            let rel = *off as i32 - CPU_STATE_BIAS;
            assert!((-128..=127).contains(&rel), "offset {} out of range", off);
        }
    }
}
