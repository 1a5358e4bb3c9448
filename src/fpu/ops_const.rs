//! The FLD-constant family. The stored constants are rounded to nearest;
//! directed rounding modes nudge the last significand bit the way the
//! hardware does.

use super::extf80::{self, ExtF80, Rounding};
use super::enter_reg;
use crate::context::Core;
use crate::mem::Bus;

fn rounding<B: Bus>(core: &Core<B>) -> Rounding {
    match (core.fpu.cwd & super::CW_RC) >> 10 {
        0 => Rounding::Nearest,
        1 => Rounding::Down,
        2 => Rounding::Up,
        _ => Rounding::Chop,
    }
}

fn load_const<B: Bus>(core: &mut Core<B>, value: ExtF80, zero_or_one: bool) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        core.fpu.push();
        core.fpu.save_st(value, 0);
    }
    let select = |t: &super::timings::X87Timings| {
        if zero_or_one {
            t.fld_z1
        } else {
            t.fld_const
        }
    };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
    0
}

pub(super) fn fld1<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    load_const(core, extf80::ONE, true)
}

pub(super) fn fldz<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    load_const(core, extf80::ZERO, true)
}

pub(super) fn fldl2t<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    // log2(10) is the one constant that rounds up, not down.
    let adjust = if rounding(core) == Rounding::Up { 1 } else { 0 };
    load_const(core, extf80::round_const(extf80::CONST_L2T, adjust), false)
}

fn down_or_chop<B: Bus>(core: &Core<B>) -> i64 {
    match rounding(core) {
        Rounding::Down | Rounding::Chop => -1,
        _ => 0,
    }
}

pub(super) fn fldl2e<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    let adjust = down_or_chop(core);
    load_const(core, extf80::round_const(extf80::CONST_L2E, adjust), false)
}

pub(super) fn fldpi<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    let adjust = down_or_chop(core);
    load_const(core, extf80::round_const(extf80::CONST_PI, adjust), false)
}

pub(super) fn fldlg2<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    let adjust = down_or_chop(core);
    load_const(core, extf80::round_const(extf80::CONST_LG2, adjust), false)
}

pub(super) fn fldln2<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    let adjust = down_or_chop(core);
    load_const(core, extf80::round_const(extf80::CONST_LN2, adjust), false)
}
