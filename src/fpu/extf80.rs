//! This module provides the 80-bit extended-precision soft-float arithmetic
//! the x87 core is built on.
//!
//! Values are carried as an explicit-integer-bit significand plus a packed
//! sign/exponent word, exactly as the x87 stores them in memory. All
//! operations take a [`Status`] carrying the rounding mode, the precision
//! control and the accumulated exception flags; nothing here raises a guest
//! exception by itself, the caller routes the flags through the FPU
//! exception pipeline.

use bitflags::bitflags;

/// Exponent bias of the 80-bit format.
pub const EXP_BIAS: i32 = 0x3fff;
/// All-ones exponent marking infinities and NaNs.
pub const EXP_SPECIAL: u16 = 0x7fff;

bitflags! {
    /// IEEE exception flags, bit-aligned with the low six bits of the x87
    /// status word.
    #[derive(Default)]
    pub struct Flags: u8 {
        const INVALID   = 0x01;
        const DENORMAL  = 0x02;
        const DIV_ZERO  = 0x04;
        const OVERFLOW  = 0x08;
        const UNDERFLOW = 0x10;
        const INEXACT   = 0x20;
    }
}

/// Rounding control, encoded as in the x87 control word RC field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rounding {
    Nearest = 0,
    Down = 1,
    Up = 2,
    Chop = 3,
}

/// Precision control, i.e. the significand width results are rounded to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Precision {
    Single,
    Double,
    Extended,
}

/// Rounding state and sticky exception flags for one operation.
#[derive(Clone, Copy, Debug)]
pub struct Status {
    pub rounding: Rounding,
    pub precision: Precision,
    pub flags: Flags,
}

impl Status {
    pub fn new(rounding: Rounding, precision: Precision) -> Self {
        Status {
            rounding,
            precision,
            flags: Flags::empty(),
        }
    }

    #[inline]
    fn raise(&mut self, flags: Flags) {
        self.flags |= flags;
    }
}

/// An 80-bit extended-precision value: 64-bit significand with explicit
/// integer bit, 15-bit exponent and the sign in bit 15 of `exp`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct ExtF80 {
    pub sig: u64,
    pub exp: u16,
}

/// Comparison outcome; the unordered case covers NaN operands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Relation {
    Less,
    Equal,
    Greater,
    Unordered,
}

/// Outcome of a partial-remainder step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Remainder {
    /// Reduction finished; the low quotient bits feed C0/C3/C1.
    Complete { quotient: u64 },
    /// The exponent gap was too large for one step; the guest must run the
    /// instruction again (C2 stays set).
    Partial,
}

pub const fn pack(sign: bool, exp: u16, sig: u64) -> ExtF80 {
    ExtF80 {
        sig,
        exp: exp | if sign { 0x8000 } else { 0 },
    }
}

/// The real indefinite, i.e. the default QNaN used for masked invalid
/// responses.
pub const DEFAULT_NAN: ExtF80 = pack(true, EXP_SPECIAL, 0xc000_0000_0000_0000);

pub const ZERO: ExtF80 = pack(false, 0, 0);
pub const ONE: ExtF80 = pack(false, 0x3fff, 0x8000_0000_0000_0000);

// Rounded-to-nearest 64-bit significands of the load-constant family.
pub const CONST_L2T: ExtF80 = pack(false, 0x4000, 0xd49a_784b_cd1b_8afe);
pub const CONST_L2E: ExtF80 = pack(false, 0x3fff, 0xb8aa_3b29_5c17_f0bc);
pub const CONST_PI: ExtF80 = pack(false, 0x4000, 0xc90f_daa2_2168_c235);
pub const CONST_LG2: ExtF80 = pack(false, 0x3ffd, 0x9a20_9a84_fbcf_f799);
pub const CONST_LN2: ExtF80 = pack(false, 0x3ffe, 0xb172_17f7_d1cf_79ac);

pub const INT16_INDEFINITE: i16 = i16::MIN;
pub const INT32_INDEFINITE: i32 = i32::MIN;
pub const INT64_INDEFINITE: i64 = i64::MIN;

impl ExtF80 {
    #[inline]
    pub fn sign(self) -> bool {
        self.exp & 0x8000 != 0
    }

    #[inline]
    pub fn exponent(self) -> u16 {
        self.exp & 0x7fff
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.exponent() == 0 && self.sig == 0
    }

    #[inline]
    pub fn is_denormal(self) -> bool {
        self.exponent() == 0 && self.sig != 0
    }

    #[inline]
    pub fn is_inf(self) -> bool {
        self.exponent() == EXP_SPECIAL && self.sig == 0x8000_0000_0000_0000
    }

    #[inline]
    pub fn is_nan(self) -> bool {
        self.exponent() == EXP_SPECIAL && (self.sig << 1) != 0
    }

    #[inline]
    pub fn is_signaling_nan(self) -> bool {
        self.exponent() == EXP_SPECIAL
            && self.sig & 0x8000_0000_0000_0000 != 0
            && self.sig & 0x4000_0000_0000_0000 == 0
            && (self.sig << 2) != 0
    }

    /// Encodings the x87 treats as unsupported: unnormals and the
    /// pseudo-NaN/pseudo-infinity forms with a clear integer bit and a
    /// nonzero exponent.
    #[inline]
    pub fn is_unsupported(self) -> bool {
        self.exponent() != 0 && self.sig & 0x8000_0000_0000_0000 == 0
    }

    #[inline]
    pub fn negate(self) -> ExtF80 {
        ExtF80 {
            sig: self.sig,
            exp: self.exp ^ 0x8000,
        }
    }

    #[inline]
    pub fn abs(self) -> ExtF80 {
        ExtF80 {
            sig: self.sig,
            exp: self.exp & 0x7fff,
        }
    }
}

/// Shifts a 128-bit value right, jamming shifted-out bits into the sticky
/// (lowest) bit.
#[inline]
fn shift_right_jam_128(value: u128, count: u32) -> u128 {
    if count == 0 {
        value
    } else if count < 128 {
        let shifted = value >> count;
        let lost = value << (128 - count);
        shifted | u128::from(lost != 0)
    } else {
        u128::from(value != 0)
    }
}

/// Unpacks a finite operand into (sign, effective biased exponent,
/// normalized significand), raising the denormal flag as a side effect.
fn unpack(a: ExtF80, status: &mut Status) -> (bool, i32, u64) {
    let sign = a.sign();
    let mut exp = i32::from(a.exponent());
    let mut sig = a.sig;

    if exp == 0 {
        // Denormals (and pseudo-denormals) behave as exponent 1.
        status.raise(Flags::DENORMAL);
        exp = 1;
    }
    if sig & 0x8000_0000_0000_0000 == 0 {
        let lz = sig.leading_zeros() as i32;
        sig <<= lz;
        exp -= lz;
    }

    (sign, exp, sig)
}

/// NaN propagation: quietens signaling operands, prefers the first NaN, and
/// converts unsupported encodings into the default NaN.
pub fn propagate_nan(a: ExtF80, b: ExtF80, status: &mut Status) -> ExtF80 {
    if a.is_signaling_nan() || b.is_signaling_nan() || a.is_unsupported() || b.is_unsupported() {
        status.raise(Flags::INVALID);
    }
    if a.is_unsupported() || b.is_unsupported() {
        return DEFAULT_NAN;
    }
    if a.is_nan() {
        ExtF80 {
            sig: a.sig | 0x4000_0000_0000_0000,
            exp: a.exp,
        }
    } else {
        ExtF80 {
            sig: b.sig | 0x4000_0000_0000_0000,
            exp: b.exp,
        }
    }
}

/// Whether a 64-bit rounding tail rounds the significand up. `sig` is the
/// value being rounded (its lowest bit decides ties).
#[inline]
fn should_round_up(sign: bool, rounding: Rounding, tail: u64, sig: u64) -> bool {
    match rounding {
        Rounding::Nearest => {
            if tail & 0x8000_0000_0000_0000 == 0 {
                false
            } else if tail << 1 != 0 {
                true
            } else {
                sig & 1 != 0
            }
        }
        Rounding::Down => sign && tail != 0,
        Rounding::Up => !sign && tail != 0,
        Rounding::Chop => false,
    }
}

fn overflow_result(sign: bool, rounding: Rounding, largest_sig: u64, status: &mut Status) -> ExtF80 {
    status.raise(Flags::OVERFLOW | Flags::INEXACT);
    let to_inf = match rounding {
        Rounding::Nearest => true,
        Rounding::Chop => false,
        Rounding::Down => sign,
        Rounding::Up => !sign,
    };
    if to_inf {
        pack(sign, EXP_SPECIAL, 0x8000_0000_0000_0000)
    } else {
        pack(sign, 0x7ffe, largest_sig)
    }
}

/// Rounds and packs a normalized intermediate. The value is
/// `sign * (sig.extra) * 2^(exp - EXP_BIAS - 127)` where `sig:extra` form a
/// 128-bit significand whose top bit is set (except for true zero inputs,
/// which callers return directly). Honors precision control and raises
/// overflow/underflow/inexact as needed.
pub fn round_pack(sign: bool, exp: i32, sig: u64, extra: u64, status: &mut Status) -> ExtF80 {
    match status.precision {
        Precision::Extended => round_pack_64(sign, exp, sig, extra, status),
        Precision::Double => round_pack_reduced(sign, exp, sig, extra, 0x400, 0x7ff, status),
        Precision::Single => {
            round_pack_reduced(sign, exp, sig, extra, 0x40_0000_0000, 0x7f_ffff_ffff, status)
        }
    }
}

fn round_pack_64(sign: bool, mut exp: i32, mut sig: u64, mut extra: u64, status: &mut Status) -> ExtF80 {
    if exp <= 0 {
        // Subnormal range: shift into a zero exponent, keeping sticky bits.
        let shift = (1 - exp) as u32;
        let wide = shift_right_jam_128((u128::from(sig) << 64) | u128::from(extra), shift.min(127));
        sig = (wide >> 64) as u64;
        extra = wide as u64;
        exp = 0;
        if extra != 0 {
            status.raise(Flags::UNDERFLOW | Flags::INEXACT);
        }
        if should_round_up(sign, status.rounding, extra, sig) {
            sig += 1;
            if sig & 0x8000_0000_0000_0000 != 0 {
                // Rounded back up into the smallest normal.
                exp = 1;
            }
        }
        return pack(sign, exp as u16, sig);
    }

    if extra != 0 {
        status.raise(Flags::INEXACT);
    }
    if should_round_up(sign, status.rounding, extra, sig) {
        let (s, carry) = sig.overflowing_add(1);
        sig = s;
        if carry {
            sig = 0x8000_0000_0000_0000;
            exp += 1;
        }
    }
    if exp >= 0x7fff {
        return overflow_result(sign, status.rounding, 0xffff_ffff_ffff_ffff, status);
    }
    pack(sign, exp as u16, sig)
}

/// Reduced-precision rounding: the tail lives in the low significand bits.
/// `half` is half an ULP at the target precision, `mask` the discarded bits.
fn round_pack_reduced(
    sign: bool,
    mut exp: i32,
    mut sig: u64,
    extra: u64,
    half: u64,
    mask: u64,
    status: &mut Status,
) -> ExtF80 {
    if extra != 0 {
        sig |= 1;
    }

    let increment = match status.rounding {
        Rounding::Nearest => half,
        Rounding::Chop => 0,
        Rounding::Down => {
            if sign {
                mask
            } else {
                0
            }
        }
        Rounding::Up => {
            if sign {
                0
            } else {
                mask
            }
        }
    };

    if exp <= 0 {
        let shift = (1 - exp) as u32;
        let wide = shift_right_jam_128(u128::from(sig) << 64, shift.min(127));
        sig = (wide >> 64) as u64;
        if wide as u64 != 0 {
            sig |= 1;
        }
        exp = 0;
        let round_bits = sig & mask;
        if round_bits != 0 {
            status.raise(Flags::UNDERFLOW | Flags::INEXACT);
        }
        sig = sig.wrapping_add(increment);
        let tie = status.rounding == Rounding::Nearest && round_bits == half;
        sig &= !mask;
        if tie {
            sig &= !(mask + 1);
        }
        if sig & 0x8000_0000_0000_0000 != 0 {
            exp = 1;
        }
        return pack(sign, exp as u16, sig);
    }

    let round_bits = sig & mask;
    if round_bits != 0 {
        status.raise(Flags::INEXACT);
    }
    let (s, carry) = sig.overflowing_add(increment);
    sig = s;
    if carry {
        sig = 0x8000_0000_0000_0000;
        exp += 1;
    }
    let tie = status.rounding == Rounding::Nearest && round_bits == half;
    sig &= !mask;
    if tie {
        sig &= !(mask + 1);
    }
    if exp >= 0x7fff {
        return overflow_result(sign, status.rounding, 0xffff_ffff_ffff_ffff & !mask, status);
    }
    pack(sign, exp as u16, sig)
}

/// Addition with the sign of `b` optionally flipped; shared by add and sub.
fn add_magnitudes(a: ExtF80, b: ExtF80, flip_b: bool, status: &mut Status) -> ExtF80 {
    let b = if flip_b { b.negate() } else { b };

    if a.is_unsupported() || b.is_unsupported() || a.is_nan() || b.is_nan() {
        return propagate_nan(a, b, status);
    }
    if a.is_inf() || b.is_inf() {
        if a.is_inf() && b.is_inf() {
            if a.sign() != b.sign() {
                status.raise(Flags::INVALID);
                return DEFAULT_NAN;
            }
            return a;
        }
        return if a.is_inf() { a } else { b };
    }
    if a.is_zero() && b.is_zero() {
        if a.sign() == b.sign() {
            return a;
        }
        return pack(status.rounding == Rounding::Down, 0, 0);
    }
    if a.is_zero() {
        return round_pack_value(b, status);
    }
    if b.is_zero() {
        return round_pack_value(a, status);
    }

    let (sign_a, exp_a, sig_a) = unpack(a, status);
    let (sign_b, exp_b, sig_b) = unpack(b, status);

    if sign_a == sign_b {
        let (mut exp, hi, lo) = if exp_a >= exp_b {
            (exp_a, sig_a, shift_right_jam_128(u128::from(sig_b) << 64, (exp_a - exp_b) as u32))
        } else {
            (exp_b, sig_b, shift_right_jam_128(u128::from(sig_a) << 64, (exp_b - exp_a) as u32))
        };
        let (sum, carry) = (u128::from(hi) << 64).overflowing_add(lo);
        let sum = if carry {
            exp += 1;
            shift_right_jam_128(sum, 1) | (1u128 << 127)
        } else {
            sum
        };
        round_pack(sign_a, exp, (sum >> 64) as u64, sum as u64, status)
    } else {
        let a_key = (exp_a, sig_a);
        let b_key = (exp_b, sig_b);
        if a_key == b_key {
            return pack(status.rounding == Rounding::Down, 0, 0);
        }
        let (sign, exp, big, small, diff) = if a_key > b_key {
            (sign_a, exp_a, sig_a, sig_b, exp_a - exp_b)
        } else {
            (sign_b, exp_b, sig_b, sig_a, exp_b - exp_a)
        };
        let big_w = u128::from(big) << 64;
        let small_w = shift_right_jam_128(u128::from(small) << 64, diff as u32);
        let result = big_w - small_w;
        let lz = result.leading_zeros() as i32;
        let norm = result << lz;
        round_pack(sign, exp - lz, (norm >> 64) as u64, norm as u64, status)
    }
}

pub fn add(a: ExtF80, b: ExtF80, status: &mut Status) -> ExtF80 {
    add_magnitudes(a, b, false, status)
}

pub fn sub(a: ExtF80, b: ExtF80, status: &mut Status) -> ExtF80 {
    add_magnitudes(a, b, true, status)
}

/// Re-rounds an already-valid value so precision control still applies when
/// the other addend is zero.
fn round_pack_value(a: ExtF80, status: &mut Status) -> ExtF80 {
    let (sign, exp, sig) = unpack(a, status);
    round_pack(sign, exp, sig, 0, status)
}

pub fn mul(a: ExtF80, b: ExtF80, status: &mut Status) -> ExtF80 {
    if a.is_unsupported() || b.is_unsupported() || a.is_nan() || b.is_nan() {
        return propagate_nan(a, b, status);
    }
    let sign = a.sign() ^ b.sign();
    if a.is_inf() || b.is_inf() {
        if a.is_zero() || b.is_zero() {
            status.raise(Flags::INVALID);
            return DEFAULT_NAN;
        }
        return pack(sign, EXP_SPECIAL, 0x8000_0000_0000_0000);
    }
    if a.is_zero() || b.is_zero() {
        return pack(sign, 0, 0);
    }

    let (_, exp_a, sig_a) = unpack(a, status);
    let (_, exp_b, sig_b) = unpack(b, status);

    let mut exp = exp_a + exp_b - EXP_BIAS + 1;
    let mut product = u128::from(sig_a) * u128::from(sig_b);
    if product & (1u128 << 127) == 0 {
        product <<= 1;
        exp -= 1;
    }
    round_pack(sign, exp, (product >> 64) as u64, product as u64, status)
}

pub fn div(a: ExtF80, b: ExtF80, status: &mut Status) -> ExtF80 {
    if a.is_unsupported() || b.is_unsupported() || a.is_nan() || b.is_nan() {
        return propagate_nan(a, b, status);
    }
    let sign = a.sign() ^ b.sign();
    if a.is_inf() {
        if b.is_inf() {
            status.raise(Flags::INVALID);
            return DEFAULT_NAN;
        }
        return pack(sign, EXP_SPECIAL, 0x8000_0000_0000_0000);
    }
    if b.is_inf() {
        return pack(sign, 0, 0);
    }
    if b.is_zero() {
        if a.is_zero() {
            status.raise(Flags::INVALID);
            return DEFAULT_NAN;
        }
        status.raise(Flags::DIV_ZERO);
        return pack(sign, EXP_SPECIAL, 0x8000_0000_0000_0000);
    }
    if a.is_zero() {
        return pack(sign, 0, 0);
    }

    let (_, exp_a, sig_a) = unpack(a, status);
    let (_, exp_b, sig_b) = unpack(b, status);

    let mut exp = exp_a - exp_b + EXP_BIAS;
    let mut dividend = u128::from(sig_a) << 63;
    if sig_a < sig_b {
        dividend <<= 1;
        exp -= 1;
    }
    // The chosen scaling keeps the 64-bit quotient's top bit set.
    let divisor = u128::from(sig_b);
    let quotient = (dividend / divisor) as u64;
    let rem = dividend % divisor;
    let tail_dividend = rem << 64;
    let mut extra = (tail_dividend / divisor) as u64;
    if tail_dividend % divisor != 0 {
        extra |= 1;
    }
    round_pack(sign, exp, quotient, extra, status)
}

fn isqrt_u128(n: u128) -> u128 {
    let mut x = n;
    let mut result = 0u128;
    let mut bit = 1u128 << 126;
    while bit > n {
        bit >>= 2;
    }
    while bit != 0 {
        if x >= result + bit {
            x -= result + bit;
            result = (result >> 1) + bit;
        } else {
            result >>= 1;
        }
        bit >>= 2;
    }
    result
}

pub fn sqrt(a: ExtF80, status: &mut Status) -> ExtF80 {
    if a.is_unsupported() || a.is_nan() {
        return propagate_nan(a, a, status);
    }
    if a.is_zero() {
        return a;
    }
    if a.sign() {
        status.raise(Flags::INVALID);
        return DEFAULT_NAN;
    }
    if a.is_inf() {
        return a;
    }

    let (_, exp, sig) = unpack(a, status);
    let e = exp - EXP_BIAS;
    let half_exp = e >> 1;
    let radicand: u128 = if e & 1 == 0 {
        u128::from(sig) << 63
    } else {
        u128::from(sig) << 64
    };
    let root = isqrt_u128(radicand) as u64;
    let rem = radicand - u128::from(root) * u128::from(root);
    let mut extra = 0u64;
    if rem > u128::from(root) {
        extra |= 0x8000_0000_0000_0000;
    }
    if rem != 0 {
        extra |= 1;
    }
    round_pack(false, half_exp + EXP_BIAS, root, extra, status)
}

/// Quiet comparison: only signaling NaNs and unsupported encodings raise
/// Invalid.
pub fn compare_quiet(a: ExtF80, b: ExtF80, status: &mut Status) -> Relation {
    compare_inner(a, b, false, status)
}

/// Signaling comparison (FCOM family): any NaN raises Invalid.
pub fn compare(a: ExtF80, b: ExtF80, status: &mut Status) -> Relation {
    compare_inner(a, b, true, status)
}

fn compare_inner(a: ExtF80, b: ExtF80, signaling: bool, status: &mut Status) -> Relation {
    if a.is_unsupported() || b.is_unsupported() {
        status.raise(Flags::INVALID);
        return Relation::Unordered;
    }
    if a.is_nan() || b.is_nan() {
        if signaling || a.is_signaling_nan() || b.is_signaling_nan() {
            status.raise(Flags::INVALID);
        }
        return Relation::Unordered;
    }
    if a.is_denormal() || b.is_denormal() {
        status.raise(Flags::DENORMAL);
    }

    if a.is_zero() && b.is_zero() {
        return Relation::Equal;
    }
    if a.is_zero() {
        return if b.sign() { Relation::Greater } else { Relation::Less };
    }
    if b.is_zero() {
        return if a.sign() { Relation::Less } else { Relation::Greater };
    }
    if a.sign() != b.sign() {
        return if a.sign() { Relation::Less } else { Relation::Greater };
    }

    let key = |x: ExtF80| (x.exponent(), x.sig);
    if key(a) == key(b) {
        Relation::Equal
    } else if (key(a) < key(b)) != a.sign() {
        Relation::Less
    } else {
        Relation::Greater
    }
}

/// IEEE/x87 partial remainder. `round_nearest` selects FPREM1 semantics;
/// FPREM truncates the quotient.
pub fn remainder(
    a: ExtF80,
    b: ExtF80,
    round_nearest: bool,
    status: &mut Status,
) -> (Remainder, ExtF80) {
    if a.is_unsupported() || b.is_unsupported() || a.is_nan() || b.is_nan() {
        return (Remainder::Complete { quotient: 0 }, propagate_nan(a, b, status));
    }
    if a.is_inf() || b.is_zero() {
        status.raise(Flags::INVALID);
        return (Remainder::Complete { quotient: 0 }, DEFAULT_NAN);
    }
    if b.is_inf() || a.is_zero() {
        return (Remainder::Complete { quotient: 0 }, a);
    }

    let sign = a.sign();
    let (_, exp_a, sig_a) = unpack(a, status);
    let (_, exp_b, sig_b) = unpack(b, status);

    let exp_diff = exp_a - exp_b;
    if exp_diff < -1 {
        // |a| < |b| / 2: nothing to reduce.
        return (Remainder::Complete { quotient: 0 }, a);
    }

    if exp_diff > 63 {
        // Partial reduction: one 62-bit quotient step, C2 reported.
        let dividend = u128::from(sig_a) << 62;
        let divisor = u128::from(sig_b);
        let q = dividend / divisor;
        let rem = dividend - q * divisor;
        let result = if rem == 0 {
            pack(sign, 0, 0)
        } else {
            pack_remainder(sign, exp_a - 62, rem, status)
        };
        return (Remainder::Partial, result);
    }

    let shift = exp_diff.max(0) as u32;
    let dividend = u128::from(sig_a) << shift;
    let divisor = u128::from(sig_b);
    let mut q = (dividend / divisor) as u64;
    let rem = dividend - u128::from(q) * divisor;

    if round_nearest {
        let twice = rem << 1;
        if twice > divisor || (twice == divisor && q & 1 != 0) {
            q = q.wrapping_add(1);
            let flipped = divisor - rem;
            let result = pack_remainder(!sign, exp_b, flipped, status);
            return (Remainder::Complete { quotient: q }, result);
        }
    }

    if rem == 0 {
        return (Remainder::Complete { quotient: q }, pack(sign, 0, 0));
    }
    let result = pack_remainder(sign, exp_b, rem, status);
    (Remainder::Complete { quotient: q }, result)
}

/// Packs a raw remainder `rem * 2^(exp_unit - EXP_BIAS - 63)` (with
/// `rem < 2^64`) into a rounded value.
fn pack_remainder(sign: bool, exp_unit: i32, rem: u128, status: &mut Status) -> ExtF80 {
    let lz = rem.leading_zeros() as i32;
    let norm = rem << lz;
    round_pack(sign, exp_unit + 64 - lz, (norm >> 64) as u64, norm as u64, status)
}

/// FSCALE: a * 2^trunc(b).
pub fn scale(a: ExtF80, b: ExtF80, status: &mut Status) -> ExtF80 {
    if a.is_unsupported() || b.is_unsupported() || a.is_nan() || b.is_nan() {
        return propagate_nan(a, b, status);
    }
    if b.is_inf() {
        if b.sign() {
            if a.is_inf() {
                status.raise(Flags::INVALID);
                return DEFAULT_NAN;
            }
            return pack(a.sign(), 0, 0);
        }
        if a.is_zero() {
            status.raise(Flags::INVALID);
            return DEFAULT_NAN;
        }
        return pack(a.sign(), EXP_SPECIAL, 0x8000_0000_0000_0000);
    }
    if a.is_inf() || a.is_zero() {
        return a;
    }

    // trunc(b), clamped well past the representable exponent range.
    let scale_by = {
        let e = i32::from(b.exponent()) - EXP_BIAS;
        if b.is_zero() || e < 0 {
            0
        } else if e > 30 {
            if b.sign() {
                -0x10000
            } else {
                0x10000
            }
        } else {
            let v = (b.sig >> (63 - e)) as i32;
            if b.sign() {
                -v
            } else {
                v
            }
        }
    };

    let (sign, exp, sig) = unpack(a, status);
    round_pack(sign, exp.saturating_add(scale_by), sig, 0, status)
}

/// FXTRACT: splits into (exponent-as-float, significand with a zero
/// exponent). Returns `None` for the operand classes the caller must
/// special-case (zero, infinity, NaN, unsupported).
pub fn extract(a: ExtF80, status: &mut Status) -> Option<(ExtF80, ExtF80)> {
    if a.is_unsupported() || a.is_nan() || a.is_zero() || a.is_inf() {
        return None;
    }
    let (sign, exp, sig) = unpack(a, status);
    let exp_part = from_i64(i64::from(exp - EXP_BIAS));
    let sig_part = pack(sign, EXP_BIAS as u16, sig);
    Some((exp_part, sig_part))
}

/// FRNDINT: rounds to an integral value in the 80-bit format.
pub fn round_to_int(a: ExtF80, status: &mut Status) -> ExtF80 {
    if a.is_unsupported() || a.is_nan() {
        return propagate_nan(a, a, status);
    }
    if a.is_inf() || a.is_zero() {
        return a;
    }

    let sign = a.sign();
    let (_, exp, sig) = unpack(a, status);
    let e = exp - EXP_BIAS;

    if e >= 63 {
        return a;
    }
    if e < 0 {
        status.raise(Flags::INEXACT);
        let up = match status.rounding {
            // Values in [0.5, 1) round to 1, except the exact half which
            // ties to even zero.
            Rounding::Nearest => e == -1 && (sig << 1) != 0,
            Rounding::Down => sign,
            Rounding::Up => !sign,
            Rounding::Chop => false,
        };
        return if up {
            pack(sign, EXP_BIAS as u16, 0x8000_0000_0000_0000)
        } else {
            pack(sign, 0, 0)
        };
    }

    let frac_bits = (63 - e) as u32;
    let tail = sig << (64 - frac_bits);
    let int_part = sig >> frac_bits;
    if tail == 0 {
        return a;
    }
    status.raise(Flags::INEXACT);
    let int_part = int_part + u64::from(should_round_up(sign, status.rounding, tail, int_part));
    let lz = int_part.leading_zeros() as i32;
    pack(sign, (EXP_BIAS + 63 - lz) as u16, int_part << lz)
}

pub fn from_i32(value: i32) -> ExtF80 {
    from_i64(i64::from(value))
}

pub fn from_i64(value: i64) -> ExtF80 {
    if value == 0 {
        return ZERO;
    }
    let sign = value < 0;
    let magnitude = value.unsigned_abs();
    let lz = magnitude.leading_zeros() as i32;
    pack(sign, (EXP_BIAS + 63 - lz) as u16, magnitude << lz)
}

pub fn from_u64(value: u64) -> ExtF80 {
    if value == 0 {
        return ZERO;
    }
    let lz = value.leading_zeros() as i32;
    pack(false, (EXP_BIAS + 63 - lz) as u16, value << lz)
}

pub fn from_f32(value: u32, status: &mut Status) -> ExtF80 {
    let sign = value >> 31 != 0;
    let exp = ((value >> 23) & 0xff) as i32;
    let frac = u64::from(value & 0x007f_ffff);

    if exp == 0xff {
        if frac == 0 {
            return pack(sign, EXP_SPECIAL, 0x8000_0000_0000_0000);
        }
        if value & 0x0040_0000 == 0 {
            status.raise(Flags::INVALID);
        }
        return pack(sign, EXP_SPECIAL, 0xc000_0000_0000_0000 | frac << 40);
    }
    if exp == 0 {
        if frac == 0 {
            return pack(sign, 0, 0);
        }
        status.raise(Flags::DENORMAL);
        // frac * 2^-149, renormalized exactly.
        let lz = frac.leading_zeros() as i32;
        return pack(sign, (EXP_BIAS + 63 - lz - 149) as u16, frac << lz);
    }
    pack(sign, (exp - 127 + EXP_BIAS) as u16, (frac | 0x0080_0000) << 40)
}

pub fn from_f64(value: u64, status: &mut Status) -> ExtF80 {
    let sign = value >> 63 != 0;
    let exp = ((value >> 52) & 0x7ff) as i32;
    let frac = value & 0x000f_ffff_ffff_ffff;

    if exp == 0x7ff {
        if frac == 0 {
            return pack(sign, EXP_SPECIAL, 0x8000_0000_0000_0000);
        }
        if value & 0x0008_0000_0000_0000 == 0 {
            status.raise(Flags::INVALID);
        }
        return pack(sign, EXP_SPECIAL, 0xc000_0000_0000_0000 | frac << 11);
    }
    if exp == 0 {
        if frac == 0 {
            return pack(sign, 0, 0);
        }
        status.raise(Flags::DENORMAL);
        // frac * 2^-1074, renormalized exactly.
        let lz = frac.leading_zeros() as i32;
        return pack(sign, (EXP_BIAS + 63 - lz - 1074) as u16, frac << lz);
    }
    pack(sign, (exp - 1023 + EXP_BIAS) as u16, (frac | 0x0010_0000_0000_0000) << 11)
}

/// Narrowing to IEEE single/double shares this shape: round the normalized
/// significand at `frac_bits` retained bits (plus the implicit bit).
fn to_narrow(
    a: ExtF80,
    frac_bits: u32,
    exp_bits: u32,
    status: &mut Status,
) -> u64 {
    let exp_max = (1i32 << exp_bits) - 2;
    let bias = (1i32 << (exp_bits - 1)) - 1;
    let sign_shift = frac_bits + exp_bits;
    let inf_bits = u64::from((1u32 << exp_bits) - 1) << frac_bits;

    if a.is_unsupported() {
        status.raise(Flags::INVALID);
        // Narrow indefinite.
        return (1u64 << sign_shift) | inf_bits | (1u64 << (frac_bits - 1));
    }
    if a.is_nan() {
        if a.is_signaling_nan() {
            status.raise(Flags::INVALID);
        }
        let sign = u64::from(a.sign()) << sign_shift;
        let payload = (a.sig >> (63 - frac_bits)) & ((1u64 << frac_bits) - 1);
        return sign | inf_bits | (1u64 << (frac_bits - 1)) | payload;
    }
    if a.is_inf() {
        return (u64::from(a.sign()) << sign_shift) | inf_bits;
    }
    if a.is_zero() {
        return u64::from(a.sign()) << sign_shift;
    }

    let (sign, exp, sig) = unpack(a, status);
    let e = exp - EXP_BIAS;
    let sign_bit = u64::from(sign) << sign_shift;

    if e + bias >= 1 {
        // Normal range before rounding.
        let keep_shift = 63 - frac_bits;
        let mut keep = sig >> keep_shift;
        let tail = sig << (64 - keep_shift);
        if tail != 0 {
            status.raise(Flags::INEXACT);
        }
        keep += u64::from(should_round_up(sign, status.rounding, tail, keep));
        let mut e = e;
        if keep >> (frac_bits + 1) != 0 {
            keep >>= 1;
            e += 1;
        }
        if e + bias > exp_max {
            status.raise(Flags::OVERFLOW | Flags::INEXACT);
            let to_inf = match status.rounding {
                Rounding::Nearest => true,
                Rounding::Chop => false,
                Rounding::Down => sign,
                Rounding::Up => !sign,
            };
            return if to_inf {
                sign_bit | inf_bits
            } else {
                sign_bit | (inf_bits - 1)
            };
        }
        return sign_bit
            | (u64::from((e + bias) as u32) << frac_bits)
            | (keep & ((1u64 << frac_bits) - 1));
    }

    // Denormal (or underflow-to-zero) range.
    let shift = (1 - (e + bias)) as u32 + (63 - frac_bits);
    let wide = shift_right_jam_128(u128::from(sig) << 64, shift.min(127));
    let keep = (wide >> 64) as u64;
    let tail = wide as u64;
    if tail != 0 {
        status.raise(Flags::UNDERFLOW | Flags::INEXACT);
    }
    let keep = keep + u64::from(should_round_up(sign, status.rounding, tail, keep));
    // A carry into the implicit-bit position lands in the exponent field,
    // producing the smallest normal, which is exactly right.
    sign_bit | keep
}

pub fn to_f32(a: ExtF80, status: &mut Status) -> u32 {
    to_narrow(a, 23, 8, status) as u32
}

pub fn to_f64(a: ExtF80, status: &mut Status) -> u64 {
    to_narrow(a, 52, 11, status)
}

/// Shared integral conversion: returns the rounded integer and whether the
/// conversion was exact; `None` means invalid (NaN, infinity, or out of the
/// i64 range before width checks).
fn to_integer(a: ExtF80, status: &mut Status) -> Option<(i64, bool)> {
    if a.is_unsupported() || a.is_nan() || a.is_inf() {
        return None;
    }
    if a.is_zero() {
        return Some((0, true));
    }

    let sign = a.sign();
    let (_, exp, sig) = unpack(a, status);
    let e = exp - EXP_BIAS;

    if e > 63 {
        return None;
    }
    if e < 0 {
        let up = match status.rounding {
            // [0.5, 1) rounds to 1, the exact half ties to even zero.
            Rounding::Nearest => e == -1 && (sig << 1) != 0,
            Rounding::Down => sign,
            Rounding::Up => !sign,
            Rounding::Chop => false,
        };
        let magnitude = i64::from(up);
        return Some((if sign { -magnitude } else { magnitude }, false));
    }

    let frac_bits = (63 - e) as u32;
    let (int_part, tail) = if frac_bits == 0 {
        (sig, 0u64)
    } else {
        (sig >> frac_bits, sig << (64 - frac_bits))
    };
    let exact = tail == 0;
    let magnitude = int_part.checked_add(u64::from(should_round_up(
        sign,
        status.rounding,
        tail,
        int_part,
    )))?;

    if sign {
        if magnitude > 0x8000_0000_0000_0000 {
            return None;
        }
        Some((magnitude.wrapping_neg() as i64, exact))
    } else {
        if magnitude > i64::MAX as u64 {
            return None;
        }
        Some((magnitude as i64, exact))
    }
}

pub fn to_i16(a: ExtF80, status: &mut Status) -> i16 {
    match to_integer(a, status) {
        Some((v, exact)) if v >= i64::from(i16::MIN) && v <= i64::from(i16::MAX) => {
            if !exact {
                status.raise(Flags::INEXACT);
            }
            v as i16
        }
        _ => {
            status.raise(Flags::INVALID);
            INT16_INDEFINITE
        }
    }
}

pub fn to_i32(a: ExtF80, status: &mut Status) -> i32 {
    match to_integer(a, status) {
        Some((v, exact)) if v >= i64::from(i32::MIN) && v <= i64::from(i32::MAX) => {
            if !exact {
                status.raise(Flags::INEXACT);
            }
            v as i32
        }
        _ => {
            status.raise(Flags::INVALID);
            INT32_INDEFINITE
        }
    }
}

pub fn to_i64(a: ExtF80, status: &mut Status) -> i64 {
    match to_integer(a, status) {
        Some((v, exact)) => {
            if !exact {
                status.raise(Flags::INEXACT);
            }
            v
        }
        None => {
            status.raise(Flags::INVALID);
            INT64_INDEFINITE
        }
    }
}

/// Nudges a load-constant's last significand bit for directed rounding
/// (the stored constants are rounded to nearest).
pub fn round_const(value: ExtF80, adjust: i64) -> ExtF80 {
    ExtF80 {
        sig: value.sig.wrapping_add(adjust as u64),
        exp: value.exp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st() -> Status {
        Status::new(Rounding::Nearest, Precision::Extended)
    }

    fn f64_of(value: f64) -> ExtF80 {
        from_f64(value.to_bits(), &mut st())
    }

    fn as_f64(value: ExtF80) -> f64 {
        f64::from_bits(to_f64(value, &mut st()))
    }

    #[test]
    fn f64_round_trip_is_exact() {
        for &v in &[0.0f64, 1.0, -1.0, 0.5, 3.141592653589793, -1e300, 1e-300, 6.25] {
            assert_eq!(as_f64(f64_of(v)), v, "round trip of {}", v);
        }
    }

    #[test]
    fn f32_round_trip_is_exact() {
        let mut s = st();
        for &v in &[1.0f32, -2.5, 1.0e-30, 3.4e38] {
            let wide = from_f32(v.to_bits(), &mut s);
            assert_eq!(f32::from_bits(to_f32(wide, &mut s)), v);
        }
    }

    #[test]
    fn addition_matches_f64() {
        let mut s = st();
        for &(x, y) in &[(1.0f64, 2.0f64), (0.1, 0.2), (-5.5, 5.5), (1e10, -1.0)] {
            let r = add(f64_of(x), f64_of(y), &mut s);
            assert_eq!(as_f64(r), x + y, "{} + {}", x, y);
        }
    }

    #[test]
    fn addition_is_commutative() {
        let mut s = st();
        let a = f64_of(1.5);
        let b = f64_of(2.25);
        assert_eq!(add(a, b, &mut s), add(b, a, &mut s));
    }

    #[test]
    fn subtraction_of_equal_values_is_zero() {
        let mut s = st();
        let r = sub(f64_of(7.25), f64_of(7.25), &mut s);
        assert!(r.is_zero());
        assert!(!r.sign());
    }

    #[test]
    fn multiplication_and_division_match_f64() {
        let mut s = st();
        for &(x, y) in &[(3.0f64, 4.0f64), (0.125, 8.0), (-7.0, 0.5)] {
            assert_eq!(as_f64(mul(f64_of(x), f64_of(y), &mut s)), x * y);
            assert_eq!(as_f64(div(f64_of(x), f64_of(y), &mut s)), x / y);
        }
    }

    #[test]
    fn division_rounds_correctly() {
        let mut s = st();
        // 1/3 narrowed back to double must equal the double division.
        let third = div(ONE, f64_of(3.0), &mut s);
        assert_eq!(as_f64(third), 1.0f64 / 3.0);
        assert!(s.flags.contains(Flags::INEXACT));
    }

    #[test]
    fn divide_by_zero_raises_and_returns_inf() {
        let mut s = st();
        let r = div(ONE, ZERO, &mut s);
        assert!(r.is_inf());
        assert!(!r.sign());
        assert!(s.flags.contains(Flags::DIV_ZERO));
    }

    #[test]
    fn zero_over_zero_is_invalid() {
        let mut s = st();
        let r = div(ZERO, ZERO, &mut s);
        assert!(r.is_nan());
        assert!(s.flags.contains(Flags::INVALID));
    }

    #[test]
    fn sqrt_of_exact_squares() {
        let mut s = st();
        for &v in &[4.0f64, 9.0, 2.25, 1e10] {
            assert_eq!(as_f64(sqrt(f64_of(v), &mut s)), v.sqrt());
        }
        assert!(s.flags.is_empty());
    }

    #[test]
    fn sqrt_rounds_like_the_host() {
        let mut s = st();
        assert_eq!(as_f64(sqrt(f64_of(2.0), &mut s)), 2.0f64.sqrt());
    }

    #[test]
    fn sqrt_of_negative_is_invalid() {
        let mut s = st();
        let r = sqrt(f64_of(-1.0), &mut s);
        assert!(r.is_nan());
        assert!(s.flags.contains(Flags::INVALID));
    }

    #[test]
    fn comparisons() {
        let mut s = st();
        assert_eq!(compare(f64_of(1.0), f64_of(2.0), &mut s), Relation::Less);
        assert_eq!(compare(f64_of(2.0), f64_of(1.0), &mut s), Relation::Greater);
        assert_eq!(compare(f64_of(-1.0), f64_of(1.0), &mut s), Relation::Less);
        assert_eq!(compare(f64_of(-0.0), f64_of(0.0), &mut s), Relation::Equal);
        assert_eq!(compare(f64_of(-3.0), f64_of(-2.0), &mut s), Relation::Less);
        assert!(s.flags.is_empty());
        assert_eq!(compare(DEFAULT_NAN, ONE, &mut s), Relation::Unordered);
        assert!(s.flags.contains(Flags::INVALID));
    }

    #[test]
    fn quiet_compare_only_signals_on_snan() {
        let mut s = st();
        assert_eq!(compare_quiet(DEFAULT_NAN, ONE, &mut s), Relation::Unordered);
        assert!(s.flags.is_empty());
        let snan = pack(false, EXP_SPECIAL, 0x8000_0000_0000_0001);
        assert_eq!(compare_quiet(snan, ONE, &mut s), Relation::Unordered);
        assert!(s.flags.contains(Flags::INVALID));
    }

    #[test]
    fn integer_conversions() {
        let mut s = st();
        assert_eq!(to_i32(f64_of(42.0), &mut s), 42);
        assert_eq!(to_i32(f64_of(-42.0), &mut s), -42);
        assert_eq!(to_i64(f64_of(1e15), &mut s), 1_000_000_000_000_000);
        assert!(s.flags.is_empty());
        // Halfway cases round to even.
        assert_eq!(to_i32(f64_of(2.5), &mut s), 2);
        assert_eq!(to_i32(f64_of(3.5), &mut s), 4);
        assert!(s.flags.contains(Flags::INEXACT));
    }

    #[test]
    fn integer_conversion_overflow_yields_indefinite() {
        let mut s = st();
        assert_eq!(to_i16(f64_of(40000.0), &mut s), INT16_INDEFINITE);
        assert!(s.flags.contains(Flags::INVALID));
        let mut s = st();
        assert_eq!(to_i32(f64_of(1e12), &mut s), INT32_INDEFINITE);
        assert!(s.flags.contains(Flags::INVALID));
        let mut s = st();
        assert_eq!(to_i64(DEFAULT_NAN, &mut s), INT64_INDEFINITE);
        assert!(s.flags.contains(Flags::INVALID));
    }

    #[test]
    fn truncating_conversion() {
        let mut s = Status::new(Rounding::Chop, Precision::Extended);
        assert_eq!(to_i32(f64_of(2.9), &mut s), 2);
        assert_eq!(to_i32(f64_of(-2.9), &mut s), -2);
    }

    #[test]
    fn remainder_small_cases() {
        let mut s = st();
        let (flags, r) = remainder(f64_of(7.0), f64_of(2.0), false, &mut s);
        assert_eq!(as_f64(r), 1.0);
        match flags {
            Remainder::Complete { quotient } => assert_eq!(quotient & 7, 3),
            Remainder::Partial => panic!("unexpected partial reduction"),
        }
        let (_, r) = remainder(f64_of(-7.0), f64_of(2.0), false, &mut s);
        assert_eq!(as_f64(r), -1.0);
    }

    #[test]
    fn remainder_nearest_differs_from_trunc() {
        let mut s = st();
        let (_, r) = remainder(f64_of(5.0), f64_of(3.0), true, &mut s);
        // 5 REM1 3 = -1 (quotient rounds to 2); 5 REM 3 = 2.
        assert_eq!(as_f64(r), -1.0);
        let (_, r) = remainder(f64_of(5.0), f64_of(3.0), false, &mut s);
        assert_eq!(as_f64(r), 2.0);
    }

    #[test]
    fn remainder_large_gap_is_partial() {
        let mut s = st();
        let (flags, r) = remainder(f64_of(1e30), f64_of(3.0), false, &mut s);
        assert_eq!(flags, Remainder::Partial);
        // The partial result must still be an exact multiple-reduction of
        // the dividend: running the reduction again converges.
        let (flags2, r2) = remainder(r, f64_of(3.0), false, &mut s);
        let _ = (flags2, r2);
    }

    #[test]
    fn round_to_int_modes() {
        let mut s = st();
        assert_eq!(as_f64(round_to_int(f64_of(2.5), &mut s)), 2.0);
        assert_eq!(as_f64(round_to_int(f64_of(3.5), &mut s)), 4.0);
        assert_eq!(as_f64(round_to_int(f64_of(0.5), &mut s)), 0.0);
        assert_eq!(as_f64(round_to_int(f64_of(0.75), &mut s)), 1.0);
        let mut s = Status::new(Rounding::Down, Precision::Extended);
        assert_eq!(as_f64(round_to_int(f64_of(2.9), &mut s)), 2.0);
        assert_eq!(as_f64(round_to_int(f64_of(-2.1), &mut s)), -3.0);
        let mut s = Status::new(Rounding::Up, Precision::Extended);
        assert_eq!(as_f64(round_to_int(f64_of(2.1), &mut s)), 3.0);
        let mut s = Status::new(Rounding::Chop, Precision::Extended);
        assert_eq!(as_f64(round_to_int(f64_of(-2.9), &mut s)), -2.0);
    }

    #[test]
    fn scale_shifts_exponent() {
        let mut s = st();
        assert_eq!(as_f64(scale(f64_of(1.5), f64_of(4.0), &mut s)), 24.0);
        assert_eq!(as_f64(scale(f64_of(24.0), f64_of(-4.9), &mut s)), 1.5);
        assert_eq!(as_f64(scale(f64_of(3.0), ZERO, &mut s)), 3.0);
    }

    #[test]
    fn extract_splits_exponent_and_significand() {
        let mut s = st();
        let (e, m) = extract(f64_of(24.0), &mut s).unwrap();
        assert_eq!(as_f64(e), 4.0);
        assert_eq!(as_f64(m), 1.5);
    }

    #[test]
    fn precision_control_rounds_to_double() {
        let mut s = Status::new(Rounding::Nearest, Precision::Double);
        let third = div(ONE, f64_of(3.0), &mut s);
        // With 53-bit precision the extended result equals the double one.
        assert_eq!(as_f64(third), 1.0f64 / 3.0);
        let refined = to_f64(third, &mut Status::new(Rounding::Nearest, Precision::Extended));
        assert_eq!(f64::from_bits(refined), 1.0f64 / 3.0);
    }

    #[test]
    fn negate_twice_is_identity() {
        for &v in &[1.0f64, -2.5, 0.0] {
            let a = f64_of(v);
            assert_eq!(a.negate().negate(), a);
        }
        assert_eq!(DEFAULT_NAN.negate().negate(), DEFAULT_NAN);
    }

    #[test]
    fn abs_is_idempotent() {
        let a = f64_of(-3.75);
        assert_eq!(a.abs(), a.abs().abs());
        assert!(!a.abs().sign());
    }

    #[test]
    fn from_int_is_exact() {
        let mut s = st();
        assert_eq!(as_f64(from_i32(123_456)), 123_456.0);
        assert_eq!(as_f64(from_i64(-987_654_321)), -987_654_321.0);
        assert_eq!(from_i64(0), ZERO);
        assert_eq!(to_i64(from_i64(i64::MIN + 1), &mut s), i64::MIN + 1);
    }

    #[test]
    fn constants_are_normalized_and_close() {
        for c in [CONST_L2T, CONST_L2E, CONST_PI, CONST_LG2, CONST_LN2].iter() {
            assert!(c.sig & 0x8000_0000_0000_0000 != 0);
        }
        let mut s = st();
        let pi = f64::from_bits(to_f64(CONST_PI, &mut s));
        assert!((pi - std::f64::consts::PI).abs() < 1e-15);
        let ln2 = f64::from_bits(to_f64(CONST_LN2, &mut s));
        assert!((ln2 - std::f64::consts::LN_2).abs() < 1e-15);
    }

    #[test]
    fn snan_is_quietened_by_arithmetic() {
        let mut s = st();
        let snan = pack(false, EXP_SPECIAL, 0x8000_0000_0000_0001);
        let r = add(snan, ONE, &mut s);
        assert!(r.is_nan());
        assert!(!r.is_signaling_nan());
        assert!(s.flags.contains(Flags::INVALID));
    }

    #[test]
    fn unsupported_encodings_produce_default_nan() {
        let mut s = st();
        let unnormal = ExtF80 {
            sig: 0x4000_0000_0000_0000,
            exp: 0x4000,
        };
        assert!(unnormal.is_unsupported());
        let r = add(unnormal, ONE, &mut s);
        assert_eq!(r, DEFAULT_NAN);
        assert!(s.flags.contains(Flags::INVALID));
    }
}
