//! x87 transcendentals. Argument classification, range reduction limits and
//! the C2 out-of-range protocol are exact over the 80-bit operands; the
//! function values themselves are computed through host double math and
//! widened back.

use super::extf80::{self, ExtF80, Flags, Precision, Rounding, Status};
use super::{enter_reg, SW_C2};
use crate::context::Core;
use crate::mem::Bus;

fn scratch() -> Status {
    Status::new(Rounding::Nearest, Precision::Extended)
}

fn host(a: ExtF80) -> f64 {
    f64::from_bits(extf80::to_f64(a, &mut scratch()))
}

/// Widens a host result, discarding the conversion's own flags; the caller
/// decides which exceptions the operation reports.
fn widen(value: f64) -> ExtF80 {
    extf80::from_f64(value.to_bits(), &mut scratch())
}

/// The trigonometric core only reduces arguments below 2^63.
fn in_trig_range(a: ExtF80) -> bool {
    a.is_zero() || i32::from(a.exponent()) - extf80::EXP_BIAS < 63
}

fn charge<B: Bus>(core: &mut Core<B>, select: fn(&super::timings::X87Timings) -> i32) {
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
}

pub(super) fn f2xm1<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
        charge(core, |t| t.f2xm1);
        return 0;
    }
    let a = core.fpu.read_st(0);
    let mut status = core.fpu.softfloat_status(true);
    let result = if a.is_nan() || a.is_unsupported() {
        extf80::propagate_nan(a, a, &mut status)
    } else if a.is_zero() {
        a
    } else {
        status.flags |= Flags::INEXACT;
        widen((host(a) * std::f64::consts::LN_2).exp_m1())
    };
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(result, 0);
    }
    charge(core, |t| t.f2xm1);
    0
}

/// Shared shape of FYL2X and FYL2XP1: ST(1) <- ST(1) * log2(f(ST(0))), pop.
fn fyl2x_common<B: Bus>(core: &mut Core<B>, plus_one: bool) -> i32 {
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(1) {
        core.fpu.stack_underflow(1, true);
        return 0;
    }
    let x = core.fpu.read_st(0);
    let y = core.fpu.read_st(1);
    let mut status = core.fpu.softfloat_status(true);

    let result = if x.is_nan() || y.is_nan() || x.is_unsupported() || y.is_unsupported() {
        extf80::propagate_nan(x, y, &mut status)
    } else if !plus_one && x.is_zero() {
        if y.is_zero() || y.is_inf() {
            status.flags |= Flags::INVALID;
            extf80::DEFAULT_NAN
        } else {
            // y * log2(0): signed infinity through the zero-divide path.
            status.flags |= Flags::DIV_ZERO;
            extf80::pack(!y.sign(), extf80::EXP_SPECIAL, 0x8000_0000_0000_0000)
        }
    } else if !plus_one && x.sign() && !x.is_zero() {
        status.flags |= Flags::INVALID;
        extf80::DEFAULT_NAN
    } else {
        let log = if plus_one {
            host(x).ln_1p() / std::f64::consts::LN_2
        } else {
            host(x).log2()
        };
        let value = host(y) * log;
        if value.is_nan() {
            status.flags |= Flags::INVALID;
            extf80::DEFAULT_NAN
        } else {
            status.flags |= Flags::INEXACT;
            widen(value)
        }
    };

    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.pop();
        core.fpu.save_st(result, 0);
    }
    0
}

pub(super) fn fyl2x<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let r = fyl2x_common(core, false);
    charge(core, |t| t.fyl2x);
    r
}

pub(super) fn fyl2xp1<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let r = fyl2x_common(core, true);
    charge(core, |t| t.fyl2xp1);
    r
}

pub(super) fn fptan<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    core.fpu.clear_c2();
    if core.fpu.is_tag_empty(0) || !core.fpu.is_tag_empty(-1) {
        if core.fpu.is_tag_empty(0) {
            core.fpu.exception(super::EX_STACK_UNDERFLOW, false);
        } else {
            core.fpu.exception(super::EX_STACK_OVERFLOW, false);
        }
        if core.fpu.is_invalid_masked() {
            core.fpu.save_st(extf80::DEFAULT_NAN, 0);
            core.fpu.push();
            core.fpu.save_st(extf80::DEFAULT_NAN, 0);
        }
        charge(core, |t| t.fptan);
        return 0;
    }

    let a = core.fpu.read_st(0);
    let mut status = core.fpu.softfloat_status(true);

    if a.is_nan() || a.is_unsupported() {
        let nan = extf80::propagate_nan(a, a, &mut status);
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(nan, 0);
            core.fpu.push();
            core.fpu.save_st(nan, 0);
        }
        charge(core, |t| t.fptan);
        return 0;
    }
    if a.is_inf() {
        status.flags |= Flags::INVALID;
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(extf80::DEFAULT_NAN, 0);
            core.fpu.push();
            core.fpu.save_st(extf80::DEFAULT_NAN, 0);
        }
        charge(core, |t| t.fptan);
        return 0;
    }
    if !in_trig_range(a) {
        // The guest must reduce the argument itself; nothing changes.
        core.fpu.swd |= SW_C2;
        charge(core, |t| t.fptan);
        return 0;
    }

    if !a.is_zero() {
        status.flags |= Flags::INEXACT;
    }
    let result = widen(host(a).tan());
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(result, 0);
        core.fpu.push();
        core.fpu.save_st(extf80::ONE, 0);
    }
    charge(core, |t| t.fptan);
    0
}

pub(super) fn fpatan<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(1) {
        core.fpu.stack_underflow(1, true);
        charge(core, |t| t.fpatan);
        return 0;
    }
    let x = core.fpu.read_st(0);
    let y = core.fpu.read_st(1);
    let mut status = core.fpu.softfloat_status(true);

    let result = if x.is_nan() || y.is_nan() || x.is_unsupported() || y.is_unsupported() {
        extf80::propagate_nan(x, y, &mut status)
    } else {
        if !y.is_zero() {
            status.flags |= Flags::INEXACT;
        }
        widen(host(y).atan2(host(x)))
    };
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.pop();
        core.fpu.save_st(result, 0);
    }
    charge(core, |t| t.fpatan);
    0
}

/// FSIN / FCOS.
pub(super) fn fsincos_single<B: Bus>(core: &mut Core<B>, _fetchdat: u32, cosine: bool) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    core.fpu.clear_c2();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
        charge(core, |t| t.fsin_cos);
        return 0;
    }
    let a = core.fpu.read_st(0);
    let mut status = core.fpu.softfloat_status(true);

    let result = if a.is_nan() || a.is_unsupported() {
        extf80::propagate_nan(a, a, &mut status)
    } else if a.is_inf() {
        status.flags |= Flags::INVALID;
        extf80::DEFAULT_NAN
    } else if !in_trig_range(a) {
        core.fpu.swd |= SW_C2;
        charge(core, |t| t.fsin_cos);
        return 0;
    } else {
        if !a.is_zero() {
            status.flags |= Flags::INEXACT;
        }
        if cosine {
            widen(host(a).cos())
        } else {
            widen(host(a).sin())
        }
    };
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(result, 0);
    }
    charge(core, |t| t.fsin_cos);
    0
}

pub(super) fn fsincos<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    core.fpu.clear_c2();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
        charge(core, |t| t.fsincos);
        return 0;
    }
    if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
        charge(core, |t| t.fsincos);
        return 0;
    }
    let a = core.fpu.read_st(0);
    let mut status = core.fpu.softfloat_status(true);

    if a.is_nan() || a.is_unsupported() {
        let nan = extf80::propagate_nan(a, a, &mut status);
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(nan, 0);
            core.fpu.push();
            core.fpu.save_st(nan, 0);
        }
        charge(core, |t| t.fsincos);
        return 0;
    }
    if a.is_inf() {
        status.flags |= Flags::INVALID;
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(extf80::DEFAULT_NAN, 0);
            core.fpu.push();
            core.fpu.save_st(extf80::DEFAULT_NAN, 0);
        }
        charge(core, |t| t.fsincos);
        return 0;
    }
    if !in_trig_range(a) {
        core.fpu.swd |= SW_C2;
        charge(core, |t| t.fsincos);
        return 0;
    }

    if !a.is_zero() {
        status.flags |= Flags::INEXACT;
    }
    let (sin, cos) = host(a).sin_cos();
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(widen(sin), 0);
        core.fpu.push();
        core.fpu.save_st(widen(cos), 0);
    }
    charge(core, |t| t.fsincos);
    0
}
