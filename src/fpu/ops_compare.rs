//! x87 compare instructions: FCOM/FUCOM and their popping forms, the
//! integer compares, the EFLAGS-writing FCOMI family, FTST and FXAM.

use super::extf80::{self, Relation};
use super::{
    check_pending, enter_mem, enter_reg, fp_enter, Fpu, EX_STACK_UNDERFLOW, SW_C0, SW_C1, SW_C2,
    SW_C3,
};
use crate::context::Core;
use crate::mem::Bus;

/// Memory operand widths of the compare families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum CmpOperand {
    F32,
    F64,
    I16,
    I32,
}

fn charge_cmp<B: Bus>(core: &mut Core<B>, operand: Option<CmpOperand>) {
    let select = |t: &super::timings::X87Timings| match operand {
        None => t.fcom,
        Some(CmpOperand::F32) => t.fcom_32,
        Some(CmpOperand::F64) => t.fcom_64,
        Some(CmpOperand::I16) => t.fcom_i16,
        Some(CmpOperand::I32) => t.fcom_i32,
    };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
}

/// FCOM/FCOMP with a memory operand (float or integer forms).
pub(super) fn fcom_mem<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    addr32: bool,
    operand: CmpOperand,
    pop: bool,
) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let raw = match operand {
        CmpOperand::F32 => u64::from(core.read_ea_l()),
        CmpOperand::F64 => core.read_ea_q(),
        CmpOperand::I16 => u64::from(core.read_ea_w()),
        CmpOperand::I32 => u64::from(core.read_ea_l()),
    };
    if core.cpu.aborted() {
        return 1;
    }

    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        core.fpu.setcc(SW_C0 | SW_C2 | SW_C3);
        if pop && core.fpu.is_invalid_masked() {
            core.fpu.pop();
        }
        charge_cmp(core, Some(operand));
        return 0;
    }

    let mut status = core.fpu.softfloat_status(false);
    let b = match operand {
        CmpOperand::F32 => extf80::from_f32(raw as u32, &mut status),
        CmpOperand::F64 => extf80::from_f64(raw, &mut status),
        CmpOperand::I16 => extf80::from_i32(i32::from(raw as u16 as i16)),
        CmpOperand::I32 => extf80::from_i32(raw as u32 as i32),
    };
    let a = core.fpu.read_st(0);
    let rc = extf80::compare(a, b, &mut status);
    core.fpu.setcc(Fpu::cc_for(rc));
    if !core.fpu.exception_flags(status.flags, false) && pop {
        core.fpu.pop();
    }

    charge_cmp(core, Some(operand));
    0
}

/// FCOM/FCOMP/FUCOM/FUCOMP against ST(i); `pops` is 0, 1 or 2 (FCOMPP).
pub(super) fn fcom_sti<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    quiet: bool,
    pops: u32,
) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let i = (fetchdat & 7) as i32;

    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(i) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        core.fpu.setcc(SW_C0 | SW_C2 | SW_C3);
        if core.fpu.is_invalid_masked() {
            for _ in 0..pops {
                core.fpu.pop();
            }
        }
        charge_cmp(core, None);
        return 0;
    }

    let mut status = core.fpu.softfloat_status(false);
    let a = core.fpu.read_st(0);
    let b = core.fpu.read_st(i);
    let rc = if quiet {
        extf80::compare_quiet(a, b, &mut status)
    } else {
        extf80::compare(a, b, &mut status)
    };
    core.fpu.setcc(Fpu::cc_for(rc));
    if !core.fpu.exception_flags(status.flags, false) {
        for _ in 0..pops {
            core.fpu.pop();
        }
    }

    charge_cmp(core, None);
    0
}

/// FCOMI/FUCOMI(/P): compare into EFLAGS ZF/PF/CF.
pub(super) fn fcomi<B: Bus>(core: &mut Core<B>, fetchdat: u32, quiet: bool, pop: bool) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let i = (fetchdat & 7) as i32;

    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(i) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        if core.fpu.is_invalid_masked() {
            core.cpu.set_zf_pf_cf(true, true, true);
            if pop {
                core.fpu.pop();
            }
        }
        charge_cmp(core, None);
        return 0;
    }

    let mut status = core.fpu.softfloat_status(false);
    let a = core.fpu.read_st(0);
    let b = core.fpu.read_st(i);
    let rc = if quiet {
        extf80::compare_quiet(a, b, &mut status)
    } else {
        extf80::compare(a, b, &mut status)
    };
    match rc {
        Relation::Greater => core.cpu.set_zf_pf_cf(false, false, false),
        Relation::Less => core.cpu.set_zf_pf_cf(false, false, true),
        Relation::Equal => core.cpu.set_zf_pf_cf(true, false, false),
        Relation::Unordered => core.cpu.set_zf_pf_cf(true, true, true),
    }
    if !core.fpu.exception_flags(status.flags, false) && pop {
        core.fpu.pop();
    }

    charge_cmp(core, None);
    0
}

pub(super) fn ftst<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        core.fpu.setcc(SW_C0 | SW_C2 | SW_C3);
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let rc = extf80::compare(core.fpu.read_st(0), extf80::ZERO, &mut status);
        core.fpu.setcc(Fpu::cc_for(rc));
        core.fpu.exception_flags(status.flags, false);
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.ftst);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.ftst);
    0
}

/// FXAM: classify ST(0) into C3/C2/C0, with C1 holding the sign.
pub(super) fn fxam<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    let reg = core.fpu.read_st(0);
    let sign = reg.sign();

    if core.fpu.is_tag_empty(0) {
        core.fpu.setcc(SW_C0 | SW_C1 | SW_C3);
    } else if reg.is_unsupported() {
        core.fpu.setcc(SW_C1);
    } else if reg.is_nan() {
        core.fpu.setcc(SW_C0 | SW_C1);
    } else if reg.is_inf() {
        core.fpu.setcc(SW_C0 | SW_C1 | SW_C2);
    } else if reg.is_zero() {
        core.fpu.setcc(SW_C1 | SW_C3);
    } else if reg.is_denormal() {
        core.fpu.setcc(SW_C1 | SW_C2 | SW_C3);
    } else {
        core.fpu.setcc(SW_C1 | SW_C2);
    }
    // C1 tracks the sign whether or not the register is empty.
    if !sign {
        core.fpu.clear_c1();
    }

    core.cpu.cycles -= core.fpu.cycles(|t| t.fxam);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fxam);
    0
}
