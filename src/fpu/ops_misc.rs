//! x87 control and state instructions: register juggling (FXCH, FFREE,
//! FINCSTP/FDECSTP, FCMOVcc), sign ops, control/status word access, and the
//! four-layout environment save/restore used by FLDENV/FNSTENV/FNSAVE/
//! FRSTOR.

use super::extf80::{self, ExtF80};
use super::{
    enter_mem, enter_reg, Fpu, Tag, CW_EXCEPTIONS_MASK, EX_STACK_UNDERFLOW, SW_BACKWARD,
    SW_STACK_FAULT, SW_SUMMARY,
};
use crate::context::Core;
use crate::cpu::{FLAG_C, FLAG_P, FLAG_Z, REG_AX};
use crate::mem::Bus;

fn charge<B: Bus>(core: &mut Core<B>, select: fn(&super::timings::X87Timings) -> i32) {
    core.cpu.cycles -= core.fpu.cycles(select);
    core.fpu.concurrency_budget = core.fpu.concurrency(select);
}

pub(super) fn fxch<B: Bus>(core: &mut Core<B>, fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let i = (fetchdat & 7) as i32;
    let st0_tag = core.fpu.get_tag(0);
    let sti_tag = core.fpu.get_tag(i);
    let mut st0 = core.fpu.read_st(0);
    let mut sti = core.fpu.read_st(i);

    core.fpu.clear_c1();
    if st0_tag == Tag::Empty || sti_tag == Tag::Empty {
        core.fpu.exception(EX_STACK_UNDERFLOW, false);
        if core.fpu.is_invalid_masked() {
            if st0_tag == Tag::Empty {
                st0 = extf80::DEFAULT_NAN;
            }
            if sti_tag == Tag::Empty {
                sti = extf80::DEFAULT_NAN;
            }
        } else {
            charge(core, |t| t.fxch);
            return 0;
        }
    }
    core.fpu.save_st(st0, i);
    core.fpu.save_st(sti, 0);

    charge(core, |t| t.fxch);
    0
}

pub(super) fn fchs<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
    } else {
        core.fpu.clear_c1();
        let result = core.fpu.read_st(0).negate();
        core.fpu.save_st(result, 0);
    }
    charge(core, |t| t.fchs);
    0
}

pub(super) fn fabs<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    if core.fpu.is_tag_empty(0) {
        core.fpu.stack_underflow(0, false);
    } else {
        core.fpu.clear_c1();
        let result = core.fpu.read_st(0).abs();
        core.fpu.save_st(result, 0);
    }
    charge(core, |t| t.fabs);
    0
}

pub(super) fn fdecstp<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    core.fpu.tos = core.fpu.tos.wrapping_sub(1) & 7;
    charge(core, |t| t.fincdecstp);
    0
}

pub(super) fn fincstp<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    core.fpu.tos = (core.fpu.tos + 1) & 7;
    charge(core, |t| t.fincdecstp);
    0
}

pub(super) fn ffree<B: Bus>(core: &mut Core<B>, fetchdat: u32, pop: bool) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    core.fpu.clear_c1();
    core.fpu.set_tag(Tag::Empty, (fetchdat & 7) as i32);
    if pop {
        core.fpu.pop();
    }
    charge(core, |t| t.ffree);
    0
}

pub(super) fn fnop<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    charge(core, |t| t.fnop);
    0
}

/// FENI/FDISI/FSETPM: 287 relics that execute as no-ops on later parts.
pub(super) fn fdisi_eni<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, false) != 0 {
        return 1;
    }
    charge(core, |t| t.fdisi_eni);
    0
}

/// FCMOVcc. `cond` selects B/E/BE/U; `negate` the N forms.
pub(super) fn fcmov<B: Bus>(core: &mut Core<B>, fetchdat: u32, cond: u32, negate: bool) -> i32 {
    if enter_reg(core, true) != 0 {
        return 1;
    }
    let i = (fetchdat & 7) as i32;
    core.fpu.clear_c1();
    if core.fpu.is_tag_empty(0) || core.fpu.is_tag_empty(i) {
        core.fpu.stack_underflow(0, false);
        charge(core, |t| t.fxch);
        return 0;
    }
    let flags = core.cpu.flags;
    let mut take = match cond {
        0 => flags & FLAG_C != 0,
        1 => flags & FLAG_Z != 0,
        2 => flags & (FLAG_C | FLAG_Z) != 0,
        _ => flags & FLAG_P != 0,
    };
    if negate {
        take = !take;
    }
    if take {
        let value = core.fpu.read_st(i);
        core.fpu.save_st(value, 0);
    }
    charge(core, |t| t.fxch);
    0
}

pub(super) fn fldcw<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let value = core.read_ea_w();
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.set_control_word(value);
    charge(core, |t| t.fldcw);
    0
}

pub(super) fn fnstcw<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    let cwd = core.fpu.control_word();
    if enter_mem(core, fetchdat, addr32, false) != 0 {
        return 1;
    }
    core.write_ea_w(cwd);
    charge(core, |t| t.fstcw_sw);
    i32::from(core.cpu.aborted())
}

pub(super) fn fnstsw<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool) -> i32 {
    let swd = core.fpu.status_word();
    if enter_mem(core, fetchdat, addr32, false) != 0 {
        return 1;
    }
    core.write_ea_w(swd);
    charge(core, |t| t.fstcw_sw);
    i32::from(core.cpu.aborted())
}

pub(super) fn fnstsw_ax<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, false) != 0 {
        return 1;
    }
    let swd = core.fpu.status_word();
    core.cpu.set_reg_w(REG_AX, swd);
    charge(core, |t| t.fstcw_sw);
    0
}

pub(super) fn fnclex<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, false) != 0 {
        return 1;
    }
    core.fpu.swd &= !(SW_BACKWARD | SW_SUMMARY | SW_STACK_FAULT | CW_EXCEPTIONS_MASK);
    charge(core, |t| t.fnop);
    0
}

pub(super) fn fninit<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    if enter_reg(core, false) != 0 {
        return 1;
    }
    core.fpu.init();
    core.cpu.ismmx = 0;
    // A control-word reset can change addressing assumptions of the block
    // being built around this instruction.
    core.jit.cpu_block_end = true;
    charge(core, |t| t.finit);
    0
}

/// Writes the (PE, operand-size)-selected environment header; returns the
/// address of the register area.
fn save_environment<B: Bus>(core: &mut Core<B>, op32: u32) -> u32 {
    // Refresh tags from the stored encodings before the image is built.
    for n in 0..8 {
        if !core.fpu.is_tag_empty(n) {
            let tag = Fpu::tag_of(core.fpu.read_st(n));
            core.fpu.set_tag(tag, n);
        }
    }
    core.fpu.swd = core.fpu.status_word();

    let ea = core.cpu.eaaddr;
    let cw = core.fpu.control_word();
    let sw = core.fpu.swd;
    let tag = core.fpu.tag;

    match (core.cpu.cr0 & 1) | (op32 & 0x100) {
        0x000 => {
            // 16-bit real mode: 20-bit pointers split into offset plus high
            // bits beside the opcode.
            let fp_ip = (u32::from(core.fpu.fcs) << 4).wrapping_add(core.fpu.fip);
            let fp_dp = (u32::from(core.fpu.fds) << 4).wrapping_add(core.fpu.fdp);
            core.write_at_w(ea, cw);
            core.write_at_w(ea.wrapping_add(0x02), sw);
            core.write_at_w(ea.wrapping_add(0x04), tag);
            core.write_at_w(ea.wrapping_add(0x06), fp_ip as u16);
            core.write_at_w(
                ea.wrapping_add(0x08),
                (((fp_ip & 0xf0000) >> 4) as u16) | core.fpu.foo,
            );
            core.write_at_w(ea.wrapping_add(0x0a), fp_dp as u16);
            core.write_at_w(ea.wrapping_add(0x0c), ((fp_dp & 0xf0000) >> 4) as u16);
            ea.wrapping_add(0x0e)
        }
        0x001 => {
            // 16-bit protected mode: selector:offset pairs.
            core.write_at_w(ea, cw);
            core.write_at_w(ea.wrapping_add(0x02), sw);
            core.write_at_w(ea.wrapping_add(0x04), tag);
            core.write_at_w(ea.wrapping_add(0x06), core.fpu.fip as u16);
            core.write_at_w(ea.wrapping_add(0x08), core.fpu.fcs);
            core.write_at_w(ea.wrapping_add(0x0a), core.fpu.fdp as u16);
            core.write_at_w(ea.wrapping_add(0x0c), core.fpu.fds);
            ea.wrapping_add(0x0e)
        }
        0x100 => {
            // 32-bit real mode.
            let fp_ip = (u32::from(core.fpu.fcs) << 4).wrapping_add(core.fpu.fip);
            let fp_dp = (u32::from(core.fpu.fds) << 4).wrapping_add(core.fpu.fdp);
            core.write_at_l(ea, 0xffff_0000 | u32::from(cw));
            core.write_at_l(ea.wrapping_add(0x04), 0xffff_0000 | u32::from(sw));
            core.write_at_l(ea.wrapping_add(0x08), 0xffff_0000 | u32::from(tag));
            core.write_at_l(ea.wrapping_add(0x0c), 0xffff_0000 | (fp_ip & 0xffff));
            core.write_at_l(
                ea.wrapping_add(0x10),
                ((fp_ip & 0xffff_0000) >> 4) | u32::from(core.fpu.foo),
            );
            core.write_at_l(ea.wrapping_add(0x14), 0xffff_0000 | (fp_dp & 0xffff));
            core.write_at_l(ea.wrapping_add(0x18), (fp_dp & 0xffff_0000) >> 4);
            ea.wrapping_add(0x1c)
        }
        _ => {
            // 32-bit protected mode.
            core.write_at_l(ea, 0xffff_0000 | u32::from(cw));
            core.write_at_l(ea.wrapping_add(0x04), 0xffff_0000 | u32::from(sw));
            core.write_at_l(ea.wrapping_add(0x08), 0xffff_0000 | u32::from(tag));
            core.write_at_l(ea.wrapping_add(0x0c), core.fpu.fip);
            core.write_at_l(
                ea.wrapping_add(0x10),
                u32::from(core.fpu.fcs) | (u32::from(core.fpu.foo) << 16),
            );
            core.write_at_l(ea.wrapping_add(0x14), core.fpu.fdp);
            core.write_at_l(ea.wrapping_add(0x18), 0xffff_0000 | u32::from(core.fpu.fds));
            ea.wrapping_add(0x1c)
        }
    }
}

/// Reads the environment header back; returns the register-area address.
fn load_environment<B: Bus>(core: &mut Core<B>, op32: u32) -> u32 {
    let ea = core.cpu.eaaddr;
    let offset;

    match (core.cpu.cr0 & 1) | (op32 & 0x100) {
        0x000 => {
            let tmp = core.read_at_w(ea.wrapping_add(0x0c));
            let fp_dp = (u32::from(tmp) & 0xf000) << 4;
            let tmp = core.read_at_w(ea.wrapping_add(0x0a));
            core.fpu.fdp = fp_dp | u32::from(tmp);
            core.fpu.fds = 0;
            let tmp = core.read_at_w(ea.wrapping_add(0x08));
            let fp_ip = (u32::from(tmp) & 0xf000) << 4;
            let tmp = core.read_at_w(ea.wrapping_add(0x06));
            core.fpu.fip = fp_ip | u32::from(tmp);
            core.fpu.fcs = 0;
            core.fpu.tag = core.read_at_w(ea.wrapping_add(0x04));
            let sw = core.read_at_w(ea.wrapping_add(0x02));
            core.fpu.swd = sw;
            core.fpu.tos = ((sw >> 11) & 7) as u8;
            core.fpu.cwd = core.read_at_w(ea);
            offset = ea.wrapping_add(0x0e);
        }
        0x001 => {
            core.fpu.fds = core.read_at_w(ea.wrapping_add(0x0c));
            core.fpu.fdp = u32::from(core.read_at_w(ea.wrapping_add(0x0a)));
            core.fpu.fcs = core.read_at_w(ea.wrapping_add(0x08));
            core.fpu.fip = u32::from(core.read_at_w(ea.wrapping_add(0x06)));
            core.fpu.tag = core.read_at_w(ea.wrapping_add(0x04));
            let sw = core.read_at_w(ea.wrapping_add(0x02));
            core.fpu.swd = sw;
            core.fpu.tos = ((sw >> 11) & 7) as u8;
            core.fpu.cwd = core.read_at_w(ea);
            offset = ea.wrapping_add(0x0e);
        }
        0x100 => {
            let tmp = core.read_at_l(ea.wrapping_add(0x18));
            let mut fp_dp = (tmp & 0x0fff_f000) << 4;
            let tmp = core.read_at_l(ea.wrapping_add(0x14));
            fp_dp |= tmp & 0xffff;
            core.fpu.fdp = fp_dp;
            core.fpu.fds = 0;
            let tmp = core.read_at_l(ea.wrapping_add(0x10));
            core.fpu.foo = (tmp & 0x07ff) as u16;
            let mut fp_ip = (tmp & 0x0fff_f000) << 4;
            let tmp = core.read_at_l(ea.wrapping_add(0x0c));
            fp_ip |= tmp & 0xffff;
            core.fpu.fip = fp_ip;
            core.fpu.fcs = 0;
            core.fpu.tag = core.read_at_l(ea.wrapping_add(0x08)) as u16;
            let sw = core.read_at_l(ea.wrapping_add(0x04)) as u16;
            core.fpu.swd = sw;
            core.fpu.tos = ((sw >> 11) & 7) as u8;
            core.fpu.cwd = core.read_at_l(ea) as u16;
            offset = ea.wrapping_add(0x1c);
        }
        _ => {
            core.fpu.fds = core.read_at_l(ea.wrapping_add(0x18)) as u16;
            core.fpu.fdp = core.read_at_l(ea.wrapping_add(0x14));
            let tmp = core.read_at_l(ea.wrapping_add(0x10));
            core.fpu.fcs = tmp as u16;
            core.fpu.foo = ((tmp >> 16) & 0x07ff) as u16;
            core.fpu.fip = core.read_at_l(ea.wrapping_add(0x0c));
            core.fpu.tag = core.read_at_l(ea.wrapping_add(0x08)) as u16;
            let sw = core.read_at_l(ea.wrapping_add(0x04)) as u16;
            core.fpu.swd = sw;
            core.fpu.tos = ((sw >> 11) & 7) as u8;
            core.fpu.cwd = core.read_at_l(ea) as u16;
            offset = ea.wrapping_add(0x1c);
        }
    }

    core.fpu.cwd = (core.fpu.cwd & !super::CW_RESERVED) | 0x0040;
    core.fpu.derive_summary();
    offset
}

pub(super) fn fldenv<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool, op32: u32) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    load_environment(core, op32);
    if core.cpu.aborted() {
        return 1;
    }
    for n in 0..8 {
        if !core.fpu.is_tag_empty(n) {
            let tag = Fpu::tag_of(core.fpu.read_st(n));
            core.fpu.set_tag(tag, n);
        }
    }
    charge(core, |t| t.fldenv);
    0
}

pub(super) fn fnstenv<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool, op32: u32) -> i32 {
    if enter_mem(core, fetchdat, addr32, false) != 0 {
        return 1;
    }
    save_environment(core, op32);
    if core.cpu.aborted() {
        return 1;
    }
    // FNSTENV masks everything and clears the summary until the next load.
    core.fpu.cwd |= CW_EXCEPTIONS_MASK;
    core.fpu.swd &= !(SW_BACKWARD | SW_SUMMARY);
    charge(core, |t| t.fstenv);
    0
}

pub(super) fn fnsave<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool, op32: u32) -> i32 {
    if enter_mem(core, fetchdat, addr32, false) != 0 {
        return 1;
    }
    let offset = save_environment(core, op32);
    for n in 0..8 {
        let st = core.fpu.read_st(n);
        core.write_at_q(offset.wrapping_add((n as u32) * 10), st.sig);
        core.write_at_w(offset.wrapping_add((n as u32) * 10 + 8), st.exp);
    }
    if core.cpu.aborted() {
        return 1;
    }
    core.fpu.init();
    core.cpu.ismmx = 0;
    charge(core, |t| t.fsave);
    0
}

pub(super) fn frstor<B: Bus>(core: &mut Core<B>, fetchdat: u32, addr32: bool, op32: u32) -> i32 {
    if enter_mem(core, fetchdat, addr32, true) != 0 {
        return 1;
    }
    let offset = load_environment(core, op32);
    for n in 0..8 {
        let sig = core.read_at_q(offset.wrapping_add((n as u32) * 10));
        let exp = core.read_at_w(offset.wrapping_add((n as u32) * 10 + 8));
        let value = ExtF80 { sig, exp };
        let tag = if core.fpu.is_tag_empty(n) {
            Tag::Empty
        } else {
            Fpu::tag_of(value)
        };
        core.fpu.save_st_tag(value, tag, n);
    }
    if core.cpu.aborted() {
        return 1;
    }
    charge(core, |t| t.frstor);
    0
}
