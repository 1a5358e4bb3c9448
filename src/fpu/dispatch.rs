//! Decode of the eight x87 escape opcodes (D8..DF). Memory forms dispatch
//! on the ModR/M `reg` field, register forms on the full second byte,
//! including the classic undocumented aliases (FSTP1, FCOM2, FXCH4, ...).

use super::ops_arith::{self, MemOperand, Operation};
use super::ops_compare::{self, CmpOperand};
use super::ops_const;
use super::ops_loadstore::{self, IntWidth};
use super::ops_misc;
use super::ops_trans;
use crate::codegen::OpFn;
use crate::context::Core;
use crate::mem::Bus;

fn invalid<B: Bus>(core: &mut Core<B>, _fetchdat: u32) -> i32 {
    core.bus.raise_interrupt(&mut core.cpu, 6);
    1
}

/// Executes one x87 instruction. `fetchdat` carries the ModR/M byte and up
/// to three following bytes; `op32` is the current operand/address-size
/// state (bit 8 data, bit 9 address).
pub fn exec<B: Bus>(core: &mut Core<B>, opcode: u8, fetchdat: u32, op32: u32) -> i32 {
    let modrm = (fetchdat & 0xff) as u8;
    let reg = u32::from(modrm >> 3) & 7;
    let addr32 = op32 & 0x200 != 0;

    let ip = core.cpu.oldpc;
    let cs = core.fpu.fcs;
    core.fpu.record_instruction(opcode, modrm, ip, cs);

    match opcode {
        0xd8 => {
            if modrm < 0xc0 {
                match reg {
                    2 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::F32, false),
                    3 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::F32, true),
                    r => ops_arith::arith_mem(
                        core,
                        fetchdat,
                        addr32,
                        Operation::from_reg_field(r),
                        MemOperand::F32,
                    ),
                }
            } else {
                match reg {
                    2 => ops_compare::fcom_sti(core, fetchdat, false, 0),
                    3 => ops_compare::fcom_sti(core, fetchdat, false, 1),
                    r => ops_arith::arith_st0_stj(core, fetchdat, Operation::from_reg_field(r)),
                }
            }
        }

        0xd9 => {
            if modrm < 0xc0 {
                match reg {
                    0 => ops_loadstore::fld_float(core, fetchdat, addr32, false),
                    2 => ops_loadstore::fst_float(core, fetchdat, addr32, false, false),
                    3 => ops_loadstore::fst_float(core, fetchdat, addr32, false, true),
                    4 => ops_misc::fldenv(core, fetchdat, addr32, op32),
                    5 => ops_misc::fldcw(core, fetchdat, addr32),
                    6 => ops_misc::fnstenv(core, fetchdat, addr32, op32),
                    7 => ops_misc::fnstcw(core, fetchdat, addr32),
                    _ => invalid(core, fetchdat),
                }
            } else {
                match modrm {
                    0xc0..=0xc7 => ops_loadstore::fld_sti(core, fetchdat),
                    0xc8..=0xcf => ops_misc::fxch(core, fetchdat),
                    0xd0 => ops_misc::fnop(core, fetchdat),
                    // FSTP1, the undocumented FSTP ST(i) alias.
                    0xd8..=0xdf => ops_loadstore::fst_sti(core, fetchdat, true),
                    0xe0 => ops_misc::fchs(core, fetchdat),
                    0xe1 => ops_misc::fabs(core, fetchdat),
                    0xe4 => ops_compare::ftst(core, fetchdat),
                    0xe5 => ops_compare::fxam(core, fetchdat),
                    0xe8 => ops_const::fld1(core, fetchdat),
                    0xe9 => ops_const::fldl2t(core, fetchdat),
                    0xea => ops_const::fldl2e(core, fetchdat),
                    0xeb => ops_const::fldpi(core, fetchdat),
                    0xec => ops_const::fldlg2(core, fetchdat),
                    0xed => ops_const::fldln2(core, fetchdat),
                    0xee => ops_const::fldz(core, fetchdat),
                    0xf0 => ops_trans::f2xm1(core, fetchdat),
                    0xf1 => ops_trans::fyl2x(core, fetchdat),
                    0xf2 => ops_trans::fptan(core, fetchdat),
                    0xf3 => ops_trans::fpatan(core, fetchdat),
                    0xf4 => ops_arith::fxtract(core, fetchdat),
                    0xf5 => ops_arith::fprem(core, fetchdat, true),
                    0xf6 => ops_misc::fdecstp(core, fetchdat),
                    0xf7 => ops_misc::fincstp(core, fetchdat),
                    0xf8 => ops_arith::fprem(core, fetchdat, false),
                    0xf9 => ops_trans::fyl2xp1(core, fetchdat),
                    0xfa => ops_arith::fsqrt(core, fetchdat),
                    0xfb => ops_trans::fsincos(core, fetchdat),
                    0xfc => ops_arith::frndint(core, fetchdat),
                    0xfd => ops_arith::fscale(core, fetchdat),
                    0xfe => ops_trans::fsincos_single(core, fetchdat, false),
                    0xff => ops_trans::fsincos_single(core, fetchdat, true),
                    _ => invalid(core, fetchdat),
                }
            }
        }

        0xda => {
            if modrm < 0xc0 {
                match reg {
                    2 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::I32, false),
                    3 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::I32, true),
                    r => ops_arith::arith_mem(
                        core,
                        fetchdat,
                        addr32,
                        Operation::from_reg_field(r),
                        MemOperand::I32,
                    ),
                }
            } else {
                match modrm {
                    0xc0..=0xc7 => ops_misc::fcmov(core, fetchdat, 0, false),
                    0xc8..=0xcf => ops_misc::fcmov(core, fetchdat, 1, false),
                    0xd0..=0xd7 => ops_misc::fcmov(core, fetchdat, 2, false),
                    0xd8..=0xdf => ops_misc::fcmov(core, fetchdat, 3, false),
                    0xe9 => ops_compare::fcom_sti(core, fetchdat, true, 2),
                    _ => invalid(core, fetchdat),
                }
            }
        }

        0xdb => {
            if modrm < 0xc0 {
                match reg {
                    0 => ops_loadstore::fild(core, fetchdat, addr32, IntWidth::I32),
                    2 => ops_loadstore::fist(core, fetchdat, addr32, IntWidth::I32, false),
                    3 => ops_loadstore::fist(core, fetchdat, addr32, IntWidth::I32, true),
                    5 => ops_loadstore::fld_extended(core, fetchdat, addr32),
                    7 => ops_loadstore::fstp_extended(core, fetchdat, addr32),
                    _ => invalid(core, fetchdat),
                }
            } else {
                match modrm {
                    0xc0..=0xc7 => ops_misc::fcmov(core, fetchdat, 0, true),
                    0xc8..=0xcf => ops_misc::fcmov(core, fetchdat, 1, true),
                    0xd0..=0xd7 => ops_misc::fcmov(core, fetchdat, 2, true),
                    0xd8..=0xdf => ops_misc::fcmov(core, fetchdat, 3, true),
                    // FENI/FDISI/FSETPM execute as no-ops on 387+.
                    0xe0 | 0xe1 | 0xe4 => ops_misc::fdisi_eni(core, fetchdat),
                    0xe2 => ops_misc::fnclex(core, fetchdat),
                    0xe3 => ops_misc::fninit(core, fetchdat),
                    0xe8..=0xef => ops_compare::fcomi(core, fetchdat, true, false),
                    0xf0..=0xf7 => ops_compare::fcomi(core, fetchdat, false, false),
                    _ => invalid(core, fetchdat),
                }
            }
        }

        0xdc => {
            if modrm < 0xc0 {
                match reg {
                    2 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::F64, false),
                    3 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::F64, true),
                    r => ops_arith::arith_mem(
                        core,
                        fetchdat,
                        addr32,
                        Operation::from_reg_field(r),
                        MemOperand::F64,
                    ),
                }
            } else {
                match reg {
                    // FCOM2/FCOMP3, undocumented aliases.
                    2 => ops_compare::fcom_sti(core, fetchdat, false, 0),
                    3 => ops_compare::fcom_sti(core, fetchdat, false, 1),
                    r => ops_arith::arith_sti_st0(
                        core,
                        fetchdat,
                        Operation::from_reg_field(r).reversed(),
                        false,
                    ),
                }
            }
        }

        0xdd => {
            if modrm < 0xc0 {
                match reg {
                    0 => ops_loadstore::fld_float(core, fetchdat, addr32, true),
                    2 => ops_loadstore::fst_float(core, fetchdat, addr32, true, false),
                    3 => ops_loadstore::fst_float(core, fetchdat, addr32, true, true),
                    4 => ops_misc::frstor(core, fetchdat, addr32, op32),
                    6 => ops_misc::fnsave(core, fetchdat, addr32, op32),
                    7 => ops_misc::fnstsw(core, fetchdat, addr32),
                    _ => invalid(core, fetchdat),
                }
            } else {
                match modrm {
                    0xc0..=0xc7 => ops_misc::ffree(core, fetchdat, false),
                    // FXCH4 alias.
                    0xc8..=0xcf => ops_misc::fxch(core, fetchdat),
                    0xd0..=0xd7 => ops_loadstore::fst_sti(core, fetchdat, false),
                    0xd8..=0xdf => ops_loadstore::fst_sti(core, fetchdat, true),
                    0xe0..=0xe7 => ops_compare::fcom_sti(core, fetchdat, true, 0),
                    0xe8..=0xef => ops_compare::fcom_sti(core, fetchdat, true, 1),
                    _ => invalid(core, fetchdat),
                }
            }
        }

        0xde => {
            if modrm < 0xc0 {
                match reg {
                    2 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::I16, false),
                    3 => ops_compare::fcom_mem(core, fetchdat, addr32, CmpOperand::I16, true),
                    r => ops_arith::arith_mem(
                        core,
                        fetchdat,
                        addr32,
                        Operation::from_reg_field(r),
                        MemOperand::I16,
                    ),
                }
            } else {
                match modrm {
                    0xd9 => ops_compare::fcom_sti(core, fetchdat, false, 2),
                    // FCOMP5 alias.
                    0xd0..=0xd7 => ops_compare::fcom_sti(core, fetchdat, false, 1),
                    _ => match reg {
                        2 | 3 => invalid(core, fetchdat),
                        r => ops_arith::arith_sti_st0(
                            core,
                            fetchdat,
                            Operation::from_reg_field(r).reversed(),
                            true,
                        ),
                    },
                }
            }
        }

        0xdf => {
            if modrm < 0xc0 {
                match reg {
                    0 => ops_loadstore::fild(core, fetchdat, addr32, IntWidth::I16),
                    2 => ops_loadstore::fist(core, fetchdat, addr32, IntWidth::I16, false),
                    3 => ops_loadstore::fist(core, fetchdat, addr32, IntWidth::I16, true),
                    4 => ops_loadstore::fbld(core, fetchdat, addr32),
                    5 => ops_loadstore::fild(core, fetchdat, addr32, IntWidth::I64),
                    6 => ops_loadstore::fbstp(core, fetchdat, addr32),
                    7 => ops_loadstore::fist(core, fetchdat, addr32, IntWidth::I64, true),
                    _ => invalid(core, fetchdat),
                }
            } else {
                match modrm {
                    0xc0..=0xc7 => ops_misc::ffree(core, fetchdat, true),
                    // FXCH7 / FSTP8 / FSTP9 aliases.
                    0xc8..=0xcf => ops_misc::fxch(core, fetchdat),
                    0xd0..=0xdf => ops_loadstore::fst_sti(core, fetchdat, true),
                    0xe0 => ops_misc::fnstsw_ax(core, fetchdat),
                    0xe8..=0xef => ops_compare::fcomi(core, fetchdat, true, true),
                    0xf0..=0xf7 => ops_compare::fcomi(core, fetchdat, false, true),
                    _ => invalid(core, fetchdat),
                }
            }
        }

        _ => invalid(core, fetchdat),
    }
}

unsafe extern "sysv64" fn opfn<B: Bus, const OP: u8>(ctx: *mut u8, fetchdat: u32) -> u32 {
    let core = &mut *(ctx as *mut Core<B>);
    let op32 = core.cpu.op32;
    exec(core, OP, fetchdat, op32) as u32
}

/// Raw interpreter entry point for an escape opcode, suitable for the
/// translator's generate-call protocol.
pub fn fpu_opfn<B: Bus>(opcode: u8) -> OpFn {
    match opcode {
        0xd8 => opfn::<B, 0xd8>,
        0xd9 => opfn::<B, 0xd9>,
        0xda => opfn::<B, 0xda>,
        0xdb => opfn::<B, 0xdb>,
        0xdc => opfn::<B, 0xdc>,
        0xdd => opfn::<B, 0xdd>,
        0xde => opfn::<B, 0xde>,
        _ => opfn::<B, 0xdf>,
    }
}
