//! x87 arithmetic instructions: the FADD/FMUL/FSUB(R)/FDIV(R) families in
//! their memory and register forms, plus FSQRT, FRNDINT, FSCALE, FXTRACT
//! and the partial remainders.

use super::extf80::{self, ExtF80, Remainder};
use super::{check_pending, fp_enter, SW_C0, SW_C1, SW_C2, SW_C3};
use crate::context::Core;
use crate::mem::Bus;

/// Arithmetic selector matching the D8 `reg` field encoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Operation {
    Add = 0,
    Mul = 1,
    Sub = 4,
    SubR = 5,
    Div = 6,
    DivR = 7,
}

impl Operation {
    /// Decodes a D8-family `reg` field (2/3 are the compare group and never
    /// reach here).
    pub(super) fn from_reg_field(reg: u32) -> Operation {
        match reg {
            0 => Operation::Add,
            1 => Operation::Mul,
            4 => Operation::Sub,
            5 => Operation::SubR,
            6 => Operation::Div,
            _ => Operation::DivR,
        }
    }

    /// Register-destination forms (DC/DE) reverse the subtract and divide
    /// senses relative to the encoding.
    pub(super) fn reversed(self) -> Operation {
        match self {
            Operation::Sub => Operation::SubR,
            Operation::SubR => Operation::Sub,
            Operation::Div => Operation::DivR,
            Operation::DivR => Operation::Div,
            other => other,
        }
    }

    /// Applies the operation to (destination, source).
    fn apply(self, d: ExtF80, s: ExtF80, status: &mut extf80::Status) -> ExtF80 {
        match self {
            Operation::Add => extf80::add(d, s, status),
            Operation::Mul => extf80::mul(d, s, status),
            Operation::Sub => extf80::sub(d, s, status),
            Operation::SubR => extf80::sub(s, d, status),
            Operation::Div => extf80::div(d, s, status),
            Operation::DivR => extf80::div(s, d, status),
        }
    }
}

/// Memory operand widths of the arithmetic families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum MemOperand {
    F32,
    F64,
    I16,
    I32,
}

fn charge_arith<B: Bus>(core: &mut Core<B>, op: Operation, operand: Option<MemOperand>) {
    let select = |t: &super::timings::X87Timings| match (op, operand) {
        (Operation::Mul, None) => t.fmul,
        (Operation::Mul, Some(MemOperand::F32)) => t.fmul_32,
        (Operation::Mul, Some(MemOperand::F64)) => t.fmul_64,
        (Operation::Mul, Some(MemOperand::I16)) => t.fmul_i16,
        (Operation::Mul, Some(MemOperand::I32)) => t.fmul_i32,
        (Operation::Div, None) | (Operation::DivR, None) => t.fdiv,
        (Operation::Div, Some(MemOperand::F32)) | (Operation::DivR, Some(MemOperand::F32)) => {
            t.fdiv_32
        }
        (Operation::Div, Some(MemOperand::F64)) | (Operation::DivR, Some(MemOperand::F64)) => {
            t.fdiv_64
        }
        (Operation::Div, Some(MemOperand::I16)) | (Operation::DivR, Some(MemOperand::I16)) => {
            t.fdiv_i16
        }
        (Operation::Div, Some(MemOperand::I32)) | (Operation::DivR, Some(MemOperand::I32)) => {
            t.fdiv_i32
        }
        (_, None) => t.fadd,
        (_, Some(MemOperand::F32)) => t.fadd_32,
        (_, Some(MemOperand::F64)) => t.fadd_64,
        (_, Some(MemOperand::I16)) => t.fadd_i16,
        (_, Some(MemOperand::I32)) => t.fadd_i32,
    };
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
}

/// Shared body of the eight memory-operand arithmetic encodings.
pub(super) fn arith_mem<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    addr32: bool,
    op: Operation,
    operand: MemOperand,
) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    if addr32 {
        core.fetch_ea_32(fetchdat);
    } else {
        core.fetch_ea_16(fetchdat);
    }
    let seg = crate::cpu::SegReg::from_index(core.cpu.ea_seg);
    if core.seg_check(seg) != 0 {
        return 1;
    }
    let raw = match operand {
        MemOperand::F32 => u64::from(core.read_ea_l()),
        MemOperand::F64 => core.read_ea_q(),
        MemOperand::I16 => u64::from(core.read_ea_w()),
        MemOperand::I32 => u64::from(core.read_ea_l()),
    };
    if core.cpu.aborted() {
        return 1;
    }
    let eaaddr = core.cpu.eaaddr;
    core.fpu.record_data_pointer(eaaddr, 0);

    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
        charge_arith(core, op, Some(operand));
        return 0;
    }

    let mut status = core.fpu.softfloat_status(false);
    let b = match operand {
        MemOperand::F32 => extf80::from_f32(raw as u32, &mut status),
        MemOperand::F64 => extf80::from_f64(raw, &mut status),
        MemOperand::I16 => extf80::from_i32(i32::from(raw as u16 as i16)),
        MemOperand::I32 => extf80::from_i32(raw as u32 as i32),
    };
    let a = core.fpu.read_st(0);
    let result = op.apply(a, b, &mut status);
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(result, 0);
    }

    charge_arith(core, op, Some(operand));
    0
}

/// ST(0) <- ST(0) op ST(j) (the D8 register forms).
pub(super) fn arith_st0_stj<B: Bus>(core: &mut Core<B>, fetchdat: u32, op: Operation) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    let j = (fetchdat & 7) as i32;

    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(j) {
        core.fpu.stack_underflow(0, false);
        charge_arith(core, op, None);
        return 0;
    }
    let mut status = core.fpu.softfloat_status(false);
    let a = core.fpu.read_st(0);
    let b = core.fpu.read_st(j);
    let result = op.apply(a, b, &mut status);
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(result, 0);
    }

    charge_arith(core, op, None);
    0
}

/// ST(i) <- ST(i) op ST(0) (the DC register forms and, with `pop`, the DE
/// popping forms). The caller has already applied the encoding reversal.
pub(super) fn arith_sti_st0<B: Bus>(
    core: &mut Core<B>,
    fetchdat: u32,
    op: Operation,
    pop: bool,
) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    let i = (fetchdat & 7) as i32;

    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(i) {
        core.fpu.stack_underflow(i, pop);
        charge_arith(core, op, None);
        return 0;
    }
    let mut status = core.fpu.softfloat_status(false);
    let d = core.fpu.read_st(i);
    let s = core.fpu.read_st(0);
    let result = op.apply(d, s, &mut status);
    if !core.fpu.exception_flags(status.flags, false) {
        core.fpu.save_st(result, i);
        if pop {
            core.fpu.pop();
        }
    }

    charge_arith(core, op, None);
    0
}

pub(super) fn fsqrt<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let result = extf80::sqrt(core.fpu.read_st(0), &mut status);
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(result, 0);
        }
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fsqrt);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fsqrt);
    0
}

pub(super) fn frndint<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let result = extf80::round_to_int(core.fpu.read_st(0), &mut status);
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(result, 0);
        }
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.frndint);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.frndint);
    0
}

pub(super) fn fscale<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(1) {
        core.fpu.stack_underflow(0, false);
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let result = extf80::scale(core.fpu.read_st(0), core.fpu.read_st(1), &mut status);
        if !core.fpu.exception_flags(status.flags, false) {
            core.fpu.save_st(result, 0);
        }
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fscale);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fscale);
    0
}

pub(super) fn fxtract<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    core.fpu.clear_c1();

    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
    } else if !core.fpu.is_tag_empty(-1) {
        core.fpu.stack_overflow();
    } else {
        let a = core.fpu.read_st(0);
        let mut status = core.fpu.softfloat_status(false);
        let split = if a.is_zero() {
            // FXTRACT of zero: exponent is -inf, significand keeps the zero.
            status.flags |= extf80::Flags::DIV_ZERO;
            Some((
                extf80::pack(true, extf80::EXP_SPECIAL, 0x8000_0000_0000_0000),
                a,
            ))
        } else if a.is_inf() {
            Some((extf80::pack(false, extf80::EXP_SPECIAL, 0x8000_0000_0000_0000), a))
        } else if a.is_nan() || a.is_unsupported() {
            let nan = extf80::propagate_nan(a, a, &mut status);
            Some((nan, nan))
        } else {
            extf80::extract(a, &mut status)
        };
        if let Some((exp_part, sig_part)) = split {
            if !core.fpu.exception_flags(status.flags, false) {
                core.fpu.save_st(exp_part, 0);
                core.fpu.push();
                core.fpu.save_st(sig_part, 0);
            }
        }
    }
    core.cpu.cycles -= core.fpu.cycles(|t| t.fxtract);
    core.fpu.concurrency_budget = core.fpu.concurrency(|t| t.fxtract);
    0
}

/// FPREM / FPREM1. The partial flag from the reduction passes straight
/// through to C2 so the guest can iterate.
pub(super) fn fprem<B: Bus>(core: &mut Core<B>, _fetchdat: u32, round_nearest: bool) -> i32 {
    if fp_enter(core) != 0 {
        return 1;
    }
    if check_pending(core) != 0 {
        return 1;
    }
    core.cpu.pc = core.cpu.pc.wrapping_add(1);
    core.fpu.clear_c1();
    core.fpu.clear_c2();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(1) {
        core.fpu.stack_underflow(0, false);
    } else {
        let mut status = core.fpu.softfloat_status(false);
        let a = core.fpu.read_st(0);
        let b = core.fpu.read_st(1);
        let (outcome, result) = extf80::remainder(a, b, round_nearest, &mut status);
        if !core.fpu.exception_flags(status.flags, false) {
            match outcome {
                Remainder::Partial => {
                    core.fpu.swd |= SW_C2;
                }
                Remainder::Complete { quotient } => {
                    let mut cc = 0;
                    if quotient & 1 != 0 {
                        cc |= SW_C1;
                    }
                    if quotient & 2 != 0 {
                        cc |= SW_C3;
                    }
                    if quotient & 4 != 0 {
                        cc |= SW_C0;
                    }
                    core.fpu.setcc(cc);
                }
            }
            core.fpu.save_st(result, 0);
        }
    }
    let field: fn(&super::timings::X87Timings) -> i32 = if round_nearest {
        |t| t.fprem1
    } else {
        |t| t.fprem
    };
    core.cpu.cycles -= core.fpu.cycles(field);
    core.fpu.concurrency_budget = core.fpu.concurrency(field);
    0
}
