//! x87 load/store instructions: FLD/FST(P) in all widths, the integer
//! loads/stores, and the packed-BCD pair FBLD/FBSTP.

use super::extf80::{self, ExtF80};
use super::{enter_mem, enter_reg, EX_STACK_UNDERFLOW};
use crate::context::Core;
use crate::mem::Bus;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum IntWidth {
    I16,
    I32,
    I64,
}

/// FILD m16/m32/m64.
pub(super) fn fild<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    addr32: bool,
    width: IntWidth,
) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let value = match width {
        IntWidth::I16 => i64::from(core.read_ea_w() as i16),
        IntWidth::I32 => i64::from(core.read_ea_l() as i32),
        IntWidth::I64 => core.read_ea_q() as i64,
    };
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.clear_c1();
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        let result = extf80::from_i64(value);
        core.fpu.push();
        core.fpu.save_st(result, 0);
    }
    let select = |t: &super::timings::X87Timings| match width {
        IntWidth::I16 => t.fild_16,
        IntWidth::I32 => t.fild_32,
        IntWidth::I64 => t.fild_64,
    };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
    0
}

/// FLD m32 / m64: conversion may raise denormal or signaling-NaN Invalid,
/// and an unmasked response suppresses the push.
pub(super) fn fld_float<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    addr32: bool,
    double: bool,
) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let raw = if double {
        core.read_ea_q()
    } else {
        u64::from(core.read_ea_l())
    };
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.clear_c1();
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let result = if double {
            extf80::from_f64(raw, &mut status)
        } else {
            extf80::from_f32(raw as u32, &mut status)
        };
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.push();
            core.fpu.save_st(result, 0);
        }
    }
    let select = |t: &super::timings::X87Timings| if double { t.fld_64 } else { t.fld_32 };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
    0
}

/// FLD m80: loaded bit-for-bit, no conversion faults.
pub(super) fn fld_extended<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let sig = core.read_ea_q();
    let ea = core.cpu.eaaddr;
    let exp = core.read_at_w(ea.wrapping_add(8));
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.clear_c1();
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        core.fpu.push();
        core.fpu.save_st(ExtF80 { sig, exp }, 0);
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fld_80);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fld_80);
    0
}

/// FLD ST(i).
pub(super) fn fld_sti<B: Bus>(core: &mut Core<B>, fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let i = (fetchdat & 7) as i32;
    core.fpu.clear_c1();
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        let mut value = extf80::DEFAULT_NAN;
        if core.fpu.is_tag_empty(i) {
            core.fpu.exception(EX_STACK_UNDERFLOW, false);
            if !core.fpu.is_invalid_masked() {
                core.cpu.cycles -= core.fpu.cycles(|t| t.fld);
                return 0;
            }
        } else {
            value = core.fpu.read_st(i);
        }
        core.fpu.push();
        core.fpu.save_st(value, 0);
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fld);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fld);
    0
}

/// FST/FSTP m32 or m64.
pub(super) fn fst_float<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    addr32: bool,
    double: bool,
    pop: bool,
) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();

    // Narrow indefinites for the masked empty-stack response.
    let mut value: u64 = if double {
        0xfff8_0000_0000_0000
    } else {
        0xffc0_0000
    };
    if core.fpu.is_tag_empty(0) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        if !core.fpu.is_invalid_masked() {
            charge_fst(core, double);
            return 0;
        }
    } else {
        let mut status = core.fpu.softfloat_status(false);
        value = if double {
            extf80::to_f64(core.fpu.read_st(0), &mut status)
        } else {
            u64::from(extf80::to_f32(core.fpu.read_st(0), &mut status))
        };
        if core.fpu.exception_flags(status.flags, true) {
            charge_fst(core, double);
            return 0;
        }
    }

    if double {
        core.write_ea_q(value);
    } else {
        core.write_ea_l(value as u32);
    }
    if core.cpu.aborted() {
        return 1;
    }
    if pop {
        core.fpu.pop();
    }
    charge_fst(core, double);
    0
}

fn charge_fst<B: Bus>(core: &mut Core<B>, double: bool) {
    let select = |t: &super::timings::X87Timings| if double { t.fst_64 } else { t.fst_32 };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
}

/// FSTP m80.
pub(super) fn fstp_extended<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();

    let mut value = extf80::DEFAULT_NAN;
    if core.fpu.is_tag_empty(0) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        if !core.fpu.is_invalid_masked() {
            core.cpu.cycles -= core.fpu.cycles(|t| t.fst_80);
            return 0;
        }
    } else {
        value = core.fpu.read_st(0);
    }
    core.write_ea_q(value.sig);
    let ea = core.cpu.eaaddr;
    core.write_at_w(ea.wrapping_add(8), value.exp);
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.pop();
    core.cpu.cycles -= core.fpu.cycles(|t| t.fst_80);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fst_80);
    0
}

/// FST/FSTP ST(i).
pub(super) fn fst_sti<B: Bus>(core: &mut Core<B>, fetchdat: u32, pop: bool) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let i = (fetchdat & 7) as i32;
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(i, pop);
    } else {
        let value = core.fpu.read_st(0);
        core.fpu.save_st(value, i);
        if pop {
            core.fpu.pop();
        }
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fst);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fst);
    0
}

/// FIST/FISTP. A faulting memory write leaves the status word untouched, so
/// the pre-operation value is restored around the store.
pub(super) fn fist<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    addr32: bool,
    width: IntWidth,
    pop: bool,
) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let entry_sw = core.fpu.swd;
    core.fpu.clear_c1();

    let mut value: i64 = match width {
        IntWidth::I16 => i64::from(extf80::INT16_INDEFINITE),
        IntWidth::I32 => i64::from(extf80::INT32_INDEFINITE),
        IntWidth::I64 => extf80::INT64_INDEFINITE,
    };
    if core.fpu.is_tag_empty(0) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        if !core.fpu.is_invalid_masked() {
            charge_fist(core, width);
            return 0;
        }
    } else {
        let mut status = core.fpu.softfloat_status(false);
        value = match width {
            IntWidth::I16 => i64::from(extf80::to_i16(core.fpu.read_st(0), &mut status)),
            IntWidth::I32 => i64::from(extf80::to_i32(core.fpu.read_st(0), &mut status)),
            IntWidth::I64 => extf80::to_i64(core.fpu.read_st(0), &mut status),
        };
        if core.fpu.exception_flags(status.flags, true) {
            charge_fist(core, width);
            return 0;
        }
    }

    // Roll the status word back across the store; a faulting write must
    // leave the FPU unchanged.
    let post_sw = core.fpu.swd;
    core.fpu.swd = entry_sw;
    match width {
        IntWidth::I16 => core.write_ea_w(value as u16),
        IntWidth::I32 => core.write_ea_l(value as u32),
        IntWidth::I64 => core.write_ea_q(value as u64),
    }
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.swd = post_sw;
    if pop {
        core.fpu.pop();
    }
    charge_fist(core, width);
    0
}

fn charge_fist<B: Bus>(core: &mut Core<B>, width: IntWidth) {
    let select = |t: &super::timings::X87Timings| match width {
        IntWidth::I16 => t.fist_16,
        IntWidth::I32 => t.fist_32,
        IntWidth::I64 => t.fist_64,
    };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
}

/// FBLD: ten-byte packed decimal, seventeen digits plus a sign byte.
pub(super) fn fbld<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let lo = core.read_ea_q();
    let ea = core.cpu.eaaddr;
    let hi = core.read_at_w(ea.wrapping_add(8));
    if core.cpu.aborted() {
        return 1;
    }

    let mut magnitude: u64 = u64::from((hi >> 4) & 0xf) * 10 + u64::from(hi & 0xf);
    for nibble in (0..16).rev() {
        magnitude = magnitude * 10 + ((lo >> (nibble * 4)) & 0xf);
    }
    let sign = hi & 0x8000 != 0;

    core.fpu.clear_c1();
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        let mut result = extf80::from_u64(magnitude);
        if sign {
            result = result.negate();
        }
        core.fpu.push();
        core.fpu.save_st(result, 0);
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fbld);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fbld);
    0
}

/// FBSTP: magnitudes beyond 10^18 - 1 are invalid; the masked response is
/// the BCD indefinite.
pub(super) fn fbstp<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let entry_sw = core.fpu.swd;
    core.fpu.clear_c1();

    let mut out_hi: u16 = 0xffff;
    let mut out_lo: u64 = 0xc000_0000_0000_0000;
    if core.fpu.is_tag_empty(0) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        if !core.fpu.is_invalid_masked() {
            core.cpu.cycles -= core.fpu.cycles(|t| t.fbstp);
            return 0;
        }
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let reg = core.fpu.read_st(0);
        let mut save_val = extf80::to_i64(reg, &mut status);
        let sign = reg.sign();
        if sign {
            save_val = save_val.wrapping_neg();
        }

        if save_val as u64 > 999_999_999_999_999_999 {
            // Too wide for eighteen digits: throw away the other flags.
            status.flags = extf80::Flags::INVALID;
        }

        if !status.flags.contains(extf80::Flags::INVALID) {
            let mut magnitude = save_val as u64;
            out_hi = if sign { 0x8000 } else { 0 };
            out_lo = 0;
            for nibble in 0..16 {
                out_lo += (magnitude % 10) << (4 * nibble);
                magnitude /= 10;
            }
            out_hi += (magnitude % 10) as u16;
            magnitude /= 10;
            out_hi += ((magnitude % 10) as u16) << 4;
        }
        if core.fpu.exception_flags(status.flags, true) {
            core.cpu.cycles -= core.fpu.cycles(|t| t.fbstp);
            return 0;
        }
    }

    let post_sw = core.fpu.swd;
    core.fpu.swd = entry_sw;
    core.write_ea_q(out_lo);
    let ea = core.cpu.eaaddr;
    core.write_at_w(ea.wrapping_add(8), out_hi);
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.swd = post_sw;
    core.fpu.pop();
    core.cpu.cycles -= core.fpu.cycles(|t| t.fbstp);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fbstp);
    0
}
