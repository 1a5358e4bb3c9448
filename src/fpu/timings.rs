//! Per-generation x87 instruction cycle tables. The dispatcher charges the
//! base figure for every instruction; on the 486 and later, part of each
//! count overlaps with integer execution and is credited back through the
//! concurrency table.

/// Cycle counts per instruction family. Field names follow the instruction
/// mnemonics; `_32`/`_64` suffixes select the memory operand width and
/// `_i16`/`_i32` the integer-operand forms.
#[derive(Clone, Copy)]
pub struct X87Timings {
    pub f2xm1: i32,
    pub fabs: i32,
    pub fadd: i32,
    pub fadd_32: i32,
    pub fadd_64: i32,
    pub fbld: i32,
    pub fbstp: i32,
    pub fchs: i32,
    pub fclex: i32,
    pub fcom: i32,
    pub fcom_32: i32,
    pub fcom_64: i32,
    pub fcos: i32,
    pub fincdecstp: i32,
    pub fdisi_eni: i32,
    pub fdiv: i32,
    pub fdiv_32: i32,
    pub fdiv_64: i32,
    pub ffree: i32,
    pub fadd_i16: i32,
    pub fadd_i32: i32,
    pub fcom_i16: i32,
    pub fcom_i32: i32,
    pub fdiv_i16: i32,
    pub fdiv_i32: i32,
    pub fild_16: i32,
    pub fild_32: i32,
    pub fild_64: i32,
    pub fmul_i16: i32,
    pub fmul_i32: i32,
    pub finit: i32,
    pub fist_16: i32,
    pub fist_32: i32,
    pub fist_64: i32,
    pub fld: i32,
    pub fld_32: i32,
    pub fld_64: i32,
    pub fld_80: i32,
    pub fld_z1: i32,
    pub fld_const: i32,
    pub fldcw: i32,
    pub fldenv: i32,
    pub fmul: i32,
    pub fmul_32: i32,
    pub fmul_64: i32,
    pub fnop: i32,
    pub fpatan: i32,
    pub fprem: i32,
    pub fprem1: i32,
    pub fptan: i32,
    pub frndint: i32,
    pub frstor: i32,
    pub fsave: i32,
    pub fscale: i32,
    pub fsetpm: i32,
    pub fsin_cos: i32,
    pub fsincos: i32,
    pub fsqrt: i32,
    pub fst: i32,
    pub fst_32: i32,
    pub fst_64: i32,
    pub fst_80: i32,
    pub fstcw_sw: i32,
    pub fstenv: i32,
    pub ftst: i32,
    pub fucom: i32,
    pub fwait: i32,
    pub fxam: i32,
    pub fxch: i32,
    pub fxtract: i32,
    pub fyl2x: i32,
    pub fyl2xp1: i32,
}

pub const X87_TIMINGS_8087: X87Timings = X87Timings {
    f2xm1: 470,
    fabs: 14,
    fadd: 85,
    fadd_32: 105,
    fadd_64: 110,
    fbld: 300,
    fbstp: 530,
    fchs: 15,
    fclex: 5,
    fcom: 45,
    fcom_32: 65,
    fcom_64: 70,
    fcos: 0,
    fincdecstp: 9,
    fdisi_eni: 5,
    fdiv: 198,
    fdiv_32: 220,
    fdiv_64: 225,
    ffree: 11,
    fadd_i16: 120,
    fadd_i32: 125,
    fcom_i16: 80,
    fcom_i32: 85,
    fdiv_i16: 230,
    fdiv_i32: 236,
    fild_16: 50,
    fild_32: 56,
    fild_64: 64,
    fmul_i16: 130,
    fmul_i32: 136,
    finit: 5,
    fist_16: 86,
    fist_32: 88,
    fist_64: 100,
    fld: 20,
    fld_32: 43,
    fld_64: 46,
    fld_80: 57,
    fld_z1: 18,
    fld_const: 19,
    fldcw: 10,
    fldenv: 40,
    fmul: 138,
    fmul_32: 118,
    fmul_64: 161,
    fnop: 13,
    fpatan: 650,
    fprem: 125,
    fprem1: 0,
    fptan: 450,
    frndint: 45,
    frstor: 210,
    fsave: 210,
    fscale: 35,
    fsetpm: 5,
    fsin_cos: 0,
    fsincos: 0,
    fsqrt: 183,
    fst: 18,
    fst_32: 87,
    fst_64: 100,
    fst_80: 55,
    fstcw_sw: 15,
    fstenv: 45,
    ftst: 42,
    fucom: 0,
    fwait: 4,
    fxam: 17,
    fxch: 12,
    fxtract: 50,
    fyl2x: 950,
    fyl2xp1: 850,
};

pub const X87_TIMINGS_287: X87Timings = X87_TIMINGS_8087;

pub const X87_TIMINGS_387: X87Timings = X87Timings {
    f2xm1: 242,
    fabs: 22,
    fadd: 24,
    fadd_32: 24,
    fadd_64: 29,
    fbld: 266,
    fbstp: 512,
    fchs: 25,
    fclex: 11,
    fcom: 24,
    fcom_32: 26,
    fcom_64: 31,
    fcos: 682,
    fincdecstp: 22,
    fdisi_eni: 2,
    fdiv: 88,
    fdiv_32: 89,
    fdiv_64: 94,
    ffree: 18,
    fadd_i16: 71,
    fadd_i32: 57,
    fcom_i16: 71,
    fcom_i32: 56,
    fdiv_i16: 136,
    fdiv_i32: 140,
    fild_16: 61,
    fild_32: 45,
    fild_64: 56,
    fmul_i16: 76,
    fmul_i32: 61,
    finit: 33,
    fist_16: 82,
    fist_32: 79,
    fist_64: 80,
    fld: 14,
    fld_32: 20,
    fld_64: 25,
    fld_80: 44,
    fld_z1: 20,
    fld_const: 24,
    fldcw: 19,
    fldenv: 71,
    fmul: 29,
    fmul_32: 27,
    fmul_64: 32,
    fnop: 12,
    fpatan: 314,
    fprem: 74,
    fprem1: 95,
    fptan: 191,
    frndint: 66,
    frstor: 308,
    fsave: 375,
    fscale: 67,
    fsetpm: 12,
    fsin_cos: 387,
    fsincos: 517,
    fsqrt: 122,
    fst: 11,
    fst_32: 44,
    fst_64: 45,
    fst_80: 53,
    fstcw_sw: 15,
    fstenv: 103,
    ftst: 28,
    fucom: 24,
    fwait: 6,
    fxam: 30,
    fxch: 18,
    fxtract: 70,
    fyl2x: 120,
    fyl2xp1: 257,
};

pub const X87_TIMINGS_486: X87Timings = X87Timings {
    f2xm1: 140,
    fabs: 3,
    fadd: 8,
    fadd_32: 8,
    fadd_64: 8,
    fbld: 75,
    fbstp: 175,
    fchs: 6,
    fclex: 7,
    fcom: 4,
    fcom_32: 4,
    fcom_64: 4,
    fcos: 241,
    fincdecstp: 3,
    fdisi_eni: 3,
    fdiv: 73,
    fdiv_32: 73,
    fdiv_64: 73,
    ffree: 3,
    fadd_i16: 20,
    fadd_i32: 20,
    fcom_i16: 16,
    fcom_i32: 16,
    fdiv_i16: 85,
    fdiv_i32: 85,
    fild_16: 13,
    fild_32: 9,
    fild_64: 10,
    fmul_i16: 23,
    fmul_i32: 22,
    finit: 17,
    fist_16: 29,
    fist_32: 28,
    fist_64: 28,
    fld: 4,
    fld_32: 3,
    fld_64: 3,
    fld_80: 6,
    fld_z1: 4,
    fld_const: 8,
    fldcw: 4,
    fldenv: 34,
    fmul: 16,
    fmul_32: 11,
    fmul_64: 14,
    fnop: 3,
    fpatan: 218,
    fprem: 70,
    fprem1: 72,
    fptan: 200,
    frndint: 21,
    frstor: 131,
    fsave: 154,
    fscale: 30,
    fsetpm: 3,
    fsin_cos: 241,
    fsincos: 291,
    fsqrt: 83,
    fst: 3,
    fst_32: 7,
    fst_64: 8,
    fst_80: 6,
    fstcw_sw: 3,
    fstenv: 67,
    ftst: 4,
    fucom: 4,
    fwait: 3,
    fxam: 8,
    fxch: 4,
    fxtract: 16,
    fyl2x: 196,
    fyl2xp1: 171,
};

/// Cycles of each 486 figure that overlap with subsequent integer
/// instructions; the dispatcher credits these back.
pub const X87_CONCURRENCY_486: X87Timings = X87Timings {
    f2xm1: 2,
    fabs: 2,
    fadd: 5,
    fadd_32: 5,
    fadd_64: 5,
    fbld: 2,
    fbstp: 2,
    fchs: 3,
    fclex: 2,
    fcom: 1,
    fcom_32: 1,
    fcom_64: 1,
    fcos: 2,
    fincdecstp: 2,
    fdisi_eni: 2,
    fdiv: 70,
    fdiv_32: 70,
    fdiv_64: 70,
    ffree: 2,
    fadd_i16: 5,
    fadd_i32: 5,
    fcom_i16: 1,
    fcom_i32: 1,
    fdiv_i16: 70,
    fdiv_i32: 70,
    fild_16: 2,
    fild_32: 2,
    fild_64: 2,
    fmul_i16: 5,
    fmul_i32: 5,
    finit: 2,
    fist_16: 2,
    fist_32: 2,
    fist_64: 2,
    fld: 2,
    fld_32: 2,
    fld_64: 2,
    fld_80: 2,
    fld_z1: 2,
    fld_const: 2,
    fldcw: 2,
    fldenv: 2,
    fmul: 13,
    fmul_32: 8,
    fmul_64: 11,
    fnop: 2,
    fpatan: 2,
    fprem: 2,
    fprem1: 2,
    fptan: 2,
    frndint: 2,
    frstor: 2,
    fsave: 2,
    fscale: 2,
    fsetpm: 2,
    fsin_cos: 2,
    fsincos: 2,
    fsqrt: 70,
    fst: 2,
    fst_32: 2,
    fst_64: 2,
    fst_80: 2,
    fstcw_sw: 2,
    fstenv: 2,
    ftst: 1,
    fucom: 1,
    fwait: 2,
    fxam: 2,
    fxch: 2,
    fxtract: 2,
    fyl2x: 2,
    fyl2xp1: 2,
};
