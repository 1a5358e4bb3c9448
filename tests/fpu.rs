//! End-to-end x87 scenarios driven through the escape-opcode dispatcher
//! against a flat-RAM bus.

use dyn86::fpu::dispatch::exec;
use dyn86::fpu::extf80::{self, ExtF80};
use dyn86::fpu::{Tag, SW_C0, SW_C2, SW_C3, SW_STACK_FAULT, SW_SUMMARY, SW_ZERO_DIV};
use dyn86::{Core, RamBus};

type TestCore = Core<RamBus>;

fn core() -> TestCore {
    Core::builder(RamBus::new(0x10000)).build().unwrap()
}

/// Runs one FPU instruction with a 16-bit address-size decode.
fn run(core: &mut TestCore, opcode: u8, fetchdat: u32) -> i32 {
    core.cpu.oldpc = core.cpu.pc;
    exec(core, opcode, fetchdat, 0)
}

/// Runs with 32-bit operand size (16-bit addressing), for the environment
/// layout selection.
fn run_o32(core: &mut TestCore, opcode: u8, fetchdat: u32) -> i32 {
    core.cpu.oldpc = core.cpu.pc;
    exec(core, opcode, fetchdat, 0x100)
}

/// ModR/M byte for the mod=0 rm=6 pure-disp16 memory form.
fn mem16(reg: u32, addr: u32) -> u32 {
    0x06 | (reg << 3) | (addr << 8)
}

fn read_q(core: &mut TestCore, addr: u32) -> u64 {
    let ram = core.bus.ram();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&ram[addr as usize..addr as usize + 8]);
    u64::from_le_bytes(bytes)
}

fn write_q(core: &mut TestCore, addr: u32, value: u64) {
    core.bus.ram_mut()[addr as usize..addr as usize + 8].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn scenario_a_load_store_round_trip() {
    let mut c = core();
    assert_eq!(c.fpu.cwd, 0x037f);
    write_q(&mut c, 0x100, 0x3ff0_0000_0000_0000);

    // FLD qword [0x100]
    assert_eq!(run(&mut c, 0xdd, mem16(0, 0x100)), 0);
    assert_eq!(c.fpu.tos, 7);
    assert_eq!(c.fpu.read_st(0), extf80::ONE);
    // The instruction advanced the PC over ModR/M plus disp16 exactly.
    assert_eq!(c.cpu.pc, 3);

    // FSTP qword [0x108]
    assert_eq!(run(&mut c, 0xdd, mem16(3, 0x108)), 0);
    assert_eq!(read_q(&mut c, 0x108), 0x3ff0_0000_0000_0000);
    assert_eq!(c.fpu.tos, 0);
    assert_eq!(c.fpu.get_tag(-1), Tag::Empty);
    assert_eq!(c.fpu.tag, 0xffff);
}

#[test]
fn scenario_b_add_and_compare() {
    let mut c = core();
    // 1.0f32 at 0x200 for the compare operand.
    c.bus.ram_mut()[0x200..0x204].copy_from_slice(&1.0f32.to_bits().to_le_bytes());

    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xde, 0xc1); // FADDP ST(1), ST(0)
    assert_eq!(c.fpu.tos, 7);
    let mut status = c.fpu.softfloat_status(false);
    assert_eq!(
        extf80::to_f64(c.fpu.read_st(0), &mut status),
        2.0f64.to_bits()
    );

    // FCOM dword [0x200]: 2.0 > 1.0 leaves all condition codes clear.
    run(&mut c, 0xd8, mem16(2, 0x200));
    assert_eq!(c.fpu.swd & (SW_C0 | SW_C2 | SW_C3), 0);
    // One element remains.
    assert_eq!(c.fpu.get_tag(0), Tag::Valid);
    assert_eq!(c.fpu.get_tag(1), Tag::Empty);
}

#[test]
fn scenario_c_divide_by_zero_masked() {
    let mut c = core();
    run(&mut c, 0xd9, 0xee); // FLDZ
    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd8, 0xf1); // FDIV ST(0), ST(1)

    assert_ne!(c.fpu.swd & SW_ZERO_DIV, 0);
    let st0 = c.fpu.read_st(0);
    assert!(st0.is_inf());
    assert!(!st0.sign());
    assert_eq!(c.fpu.get_tag(0), Tag::Special);
    // Masked responses leave no unmasked-pending summary.
    assert_eq!(c.fpu.swd & SW_SUMMARY, 0);
}

#[test]
fn scenario_d_stack_underflow() {
    // Masked: condition codes all set, nothing popped, no fault delivery.
    let mut c = core();
    run(&mut c, 0xd8, 0xd1); // FCOM ST(1) on an empty stack
    assert_ne!(c.fpu.swd & dyn86::fpu::SW_INVALID, 0);
    assert_ne!(c.fpu.swd & SW_STACK_FAULT, 0);
    assert_eq!(c.fpu.swd & (SW_C0 | SW_C2 | SW_C3), SW_C0 | SW_C2 | SW_C3);
    assert_eq!(c.fpu.tos, 0);
    assert!(!c.bus.fpu_fault_raised);

    // Unmasked: the summary latches and the next instruction delivers #MF.
    let mut c = core();
    c.fpu.set_control_word(0x037e); // unmask Invalid
    run(&mut c, 0xd8, 0xd1);
    assert_ne!(c.fpu.swd & SW_SUMMARY, 0);
    run(&mut c, 0xd9, 0xe8); // FLD1 triggers the pending delivery
    assert!(c.bus.fpu_fault_raised);
}

#[test]
fn stack_overflow_sets_c1_and_writes_indefinite() {
    let mut c = core();
    for _ in 0..8 {
        run(&mut c, 0xd9, 0xe8); // FLD1
    }
    run(&mut c, 0xd9, 0xe8); // ninth push overflows
    assert_ne!(c.fpu.swd & SW_STACK_FAULT, 0);
    assert_ne!(c.fpu.swd & dyn86::fpu::SW_C1, 0);
    assert!(c.fpu.read_st(0).is_nan());
}

#[test]
fn invariant_push_pop_restores_top_and_tags() {
    let mut c = core();
    let tag0 = c.fpu.tag;
    let top0 = c.fpu.tos;
    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd9, 0xeb); // FLDPI
    run(&mut c, 0xdd, 0xd8); // FSTP ST(0)
    run(&mut c, 0xdd, 0xd8); // FSTP ST(0)
    assert_eq!(c.fpu.tos, top0);
    assert_eq!(c.fpu.tag, tag0);
}

#[test]
fn invariant_fsave_frstor_round_trip() {
    let mut c = core();
    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd9, 0xeb); // FLDPI
    run(&mut c, 0xd9, 0xe0); // FCHS
    run(&mut c, 0xd8, 0xc1); // FADD ST(0), ST(1)

    // Leave some sticky status behind.
    let saved_regs: Vec<ExtF80> = (0..8).map(|i| c.fpu.read_st(i)).collect();
    let cw = c.fpu.cwd;
    let tos = c.fpu.tos;

    run(&mut c, 0xdd, mem16(6, 0x400)); // FNSAVE [0x400]
    // FNSAVE reinitializes.
    assert_eq!(c.fpu.tag, 0xffff);
    assert_eq!(c.fpu.tos, 0);

    run(&mut c, 0xdd, mem16(4, 0x400)); // FRSTOR [0x400]
    assert_eq!(c.fpu.cwd, cw);
    assert_eq!(c.fpu.tos, tos);
    for i in 0..8 {
        if c.fpu.get_tag(i) != Tag::Empty {
            assert_eq!(c.fpu.read_st(i), saved_regs[i as usize], "ST({})", i);
        }
    }
    let sw = c.fpu.status_word();
    assert_eq!(sw & SW_SUMMARY, 0);
}

#[test]
fn fsave_real_mode_header_is_14_bytes() {
    let mut c = core();
    c.fpu.fcs = 0xf000;
    c.cpu.pc = 0x1234;
    run(&mut c, 0xd9, 0xe8); // FLD1 at 0x1234
    run(&mut c, 0xdd, mem16(6, 0x500)); // FNSAVE at 0x1235, 16-bit real layout

    let ram = c.bus.ram();
    let cw = u16::from_le_bytes([ram[0x500], ram[0x501]]);
    assert_eq!(cw, 0x037f);
    // First register image begins right after the 14-byte header: ST(0)
    // was 1.0.
    let exp = u16::from_le_bytes([ram[0x50e + 8], ram[0x50e + 9]]);
    assert_eq!(exp, 0x3fff);
    // The 20-bit instruction pointer packs as (fcs << 4) | fip, recorded
    // for the FNSAVE itself.
    let ip_lo = u16::from_le_bytes([ram[0x506], ram[0x507]]);
    assert_eq!(ip_lo, 0x1235);
    let ip_hi = u16::from_le_bytes([ram[0x508], ram[0x509]]);
    assert_eq!(ip_hi & 0xf000, 0xf000);
}

#[test]
fn fsave_protected_32_header_is_28_bytes() {
    let mut c = core();
    c.cpu.cr0 = 1;
    run_o32(&mut c, 0xd9, 0xe8); // FLD1
    run_o32(&mut c, 0xdd, mem16(6, 0x600)); // FNSAVE, 32-bit protected

    let ram = c.bus.ram();
    let exp = u16::from_le_bytes([ram[0x61c + 8], ram[0x61c + 9]]);
    assert_eq!(exp, 0x3fff);
}

#[test]
fn invariant_fld_fstp_preserves_doubles() {
    let mut c = core();
    for &v in &[1.0f64, -2.5, 1e-300, 6.02214076e23, 0.1] {
        write_q(&mut c, 0x700, v.to_bits());
        run(&mut c, 0xdd, mem16(0, 0x700)); // FLD
        run(&mut c, 0xdd, mem16(3, 0x708)); // FSTP
        assert_eq!(read_q(&mut c, 0x708), v.to_bits(), "round trip of {}", v);
    }
}

#[test]
fn invariant_fadd_commutes() {
    let a = 1.5f64;
    let b = 0.0625f64;

    let run_pair = |x: f64, y: f64| -> u64 {
        let mut c = core();
        write_q(&mut c, 0x100, x.to_bits());
        write_q(&mut c, 0x108, y.to_bits());
        run(&mut c, 0xdd, mem16(0, 0x100)); // FLD x
        run(&mut c, 0xdc, mem16(0, 0x108)); // FADD qword [y]
        run(&mut c, 0xdd, mem16(3, 0x110)); // FSTP
        read_q(&mut c, 0x110)
    };
    assert_eq!(run_pair(a, b), run_pair(b, a));
}

#[test]
fn invariant_fchs_fchs_is_identity_on_bits() {
    let mut c = core();
    run(&mut c, 0xd9, 0xeb); // FLDPI
    let before = c.fpu.read_st(0);
    run(&mut c, 0xd9, 0xe0); // FCHS
    assert_ne!(c.fpu.read_st(0), before);
    run(&mut c, 0xd9, 0xe0); // FCHS
    assert_eq!(c.fpu.read_st(0), before);

    // NaN sign bits toggle twice as well.
    c.fpu.save_st(extf80::DEFAULT_NAN, 0);
    run(&mut c, 0xd9, 0xe0);
    run(&mut c, 0xd9, 0xe0);
    assert_eq!(c.fpu.read_st(0), extf80::DEFAULT_NAN);
}

#[test]
fn invariant_fabs_is_idempotent() {
    let mut c = core();
    run(&mut c, 0xd9, 0xeb); // FLDPI
    run(&mut c, 0xd9, 0xe0); // FCHS
    run(&mut c, 0xd9, 0xe1); // FABS
    let once = c.fpu.read_st(0);
    run(&mut c, 0xd9, 0xe1); // FABS
    assert_eq!(c.fpu.read_st(0), once);
    assert!(!once.sign());
}

#[test]
fn fist_rounds_by_control_word() {
    let mut c = core();
    write_q(&mut c, 0x100, 2.5f64.to_bits());
    run(&mut c, 0xdd, mem16(0, 0x100)); // FLD 2.5

    // Nearest: ties to even.
    run(&mut c, 0xdb, mem16(2, 0x110)); // FIST dword
    let ram = c.bus.ram();
    assert_eq!(
        i32::from_le_bytes([ram[0x110], ram[0x111], ram[0x112], ram[0x113]]),
        2
    );

    // Chop.
    c.fpu.set_control_word(0x0f7f);
    run(&mut c, 0xdb, mem16(2, 0x114));
    let ram = c.bus.ram();
    assert_eq!(
        i32::from_le_bytes([ram[0x114], ram[0x115], ram[0x116], ram[0x117]]),
        2
    );
}

#[test]
fn fist_overflow_writes_indefinite() {
    let mut c = core();
    write_q(&mut c, 0x100, 1e12f64.to_bits());
    run(&mut c, 0xdd, mem16(0, 0x100)); // FLD 1e12
    run(&mut c, 0xdb, mem16(3, 0x110)); // FISTP dword
    let ram = c.bus.ram();
    assert_eq!(
        u32::from_le_bytes([ram[0x110], ram[0x111], ram[0x112], ram[0x113]]),
        0x8000_0000
    );
    assert_ne!(c.fpu.swd & dyn86::fpu::SW_INVALID, 0);
}

#[test]
fn fbstp_writes_packed_decimal() {
    let mut c = core();
    write_q(&mut c, 0x100, (-123456.0f64).to_bits());
    run(&mut c, 0xdd, mem16(0, 0x100)); // FLD
    run(&mut c, 0xdf, mem16(6, 0x120)); // FBSTP
    let ram = c.bus.ram();
    assert_eq!(ram[0x120], 0x56);
    assert_eq!(ram[0x121], 0x34);
    assert_eq!(ram[0x122], 0x12);
    assert_eq!(ram[0x129], 0x80); // sign byte
    assert_eq!(c.fpu.tos, 0);
}

#[test]
fn fbld_round_trips_bcd() {
    let mut c = core();
    let bcd: [u8; 10] = [0x21, 0x43, 0x65, 0x87, 0, 0, 0, 0, 0, 0];
    c.bus.ram_mut()[0x130..0x13a].copy_from_slice(&bcd);
    run(&mut c, 0xdf, mem16(4, 0x130)); // FBLD
    run(&mut c, 0xdf, mem16(7, 0x140)); // FISTP qword
    assert_eq!(read_q(&mut c, 0x140), 87654321);
}

#[test]
fn fprem_reports_partial_reduction_via_c2() {
    let mut c = core();
    write_q(&mut c, 0x100, 3.0f64.to_bits());
    write_q(&mut c, 0x108, 1e30f64.to_bits());
    run(&mut c, 0xdd, mem16(0, 0x100)); // FLD 3.0 -> ST(1)
    run(&mut c, 0xdd, mem16(0, 0x108)); // FLD 1e30 -> ST(0)
    run(&mut c, 0xd9, 0xf8); // FPREM
    assert_ne!(c.fpu.swd & SW_C2, 0);

    // Iterating must converge to a complete reduction.
    let mut guard = 0;
    while c.fpu.swd & SW_C2 != 0 {
        run(&mut c, 0xd9, 0xf8);
        guard += 1;
        assert!(guard < 64, "FPREM failed to converge");
    }
    // |remainder| < 3.0.
    let mut status = c.fpu.softfloat_status(false);
    let rem = f64::from_bits(extf80::to_f64(c.fpu.read_st(0), &mut status));
    assert!(rem.abs() < 3.0);
}

#[test]
fn fsin_out_of_range_sets_c2_and_keeps_operand() {
    let mut c = core();
    write_q(&mut c, 0x100, 1e300f64.to_bits());
    run(&mut c, 0xdd, mem16(0, 0x100));
    let before = c.fpu.read_st(0);
    run(&mut c, 0xd9, 0xfe); // FSIN
    assert_ne!(c.fpu.swd & SW_C2, 0);
    assert_eq!(c.fpu.read_st(0), before);
}

#[test]
fn fxam_classifies_and_signs() {
    let mut c = core();
    run(&mut c, 0xd9, 0xe5); // FXAM on empty
    assert_eq!(
        c.fpu.swd & (SW_C0 | dyn86::fpu::SW_C1 | SW_C2 | SW_C3),
        SW_C0 | SW_C3
    );

    run(&mut c, 0xd9, 0xee); // FLDZ
    run(&mut c, 0xd9, 0xe5);
    assert_eq!(c.fpu.swd & (SW_C0 | SW_C2 | SW_C3), SW_C3);

    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd9, 0xe0); // FCHS
    run(&mut c, 0xd9, 0xe5);
    assert_eq!(c.fpu.swd & (SW_C0 | SW_C2 | SW_C3), SW_C2);
    assert_ne!(c.fpu.swd & dyn86::fpu::SW_C1, 0); // negative
}

#[test]
fn fcomi_writes_eflags() {
    let mut c = core();
    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd9, 0xee); // FLDZ -> ST0=0, ST1=1
    run(&mut c, 0xdb, 0xf1); // FCOMI ST(0), ST(1): 0 < 1 -> CF
    assert_eq!(c.cpu.flags & 0x45, 0x01);
}

#[test]
fn fxch_swaps_registers() {
    let mut c = core();
    run(&mut c, 0xd9, 0xe8); // FLD1
    run(&mut c, 0xd9, 0xee); // FLDZ
    run(&mut c, 0xd9, 0xc9); // FXCH ST(1)
    assert_eq!(c.fpu.read_st(0), extf80::ONE);
    assert!(c.fpu.read_st(1).is_zero());
}

#[test]
fn fninit_requests_block_end() {
    let mut c = core();
    run(&mut c, 0xd9, 0xe8);
    run(&mut c, 0xdb, 0xe3); // FNINIT
    assert_eq!(c.fpu.tag, 0xffff);
    assert_eq!(c.fpu.cwd, 0x037f);
    assert!(c.jit.cpu_block_end);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn balanced_push_pop_sequences_restore_state(pushes in 1usize..8) {
            let mut c = core();
            let tag0 = c.fpu.tag;
            let top0 = c.fpu.tos;
            for _ in 0..pushes {
                run(&mut c, 0xd9, 0xe8); // FLD1
            }
            for _ in 0..pushes {
                run(&mut c, 0xdd, 0xd8); // FSTP ST(0)
            }
            prop_assert_eq!(c.fpu.tos, top0);
            prop_assert_eq!(c.fpu.tag, tag0);
        }

        #[test]
        fn fchs_twice_is_identity_for_any_double(bits in any::<u64>()) {
            let mut c = core();
            write_q(&mut c, 0x100, bits);
            run(&mut c, 0xdd, mem16(0, 0x100)); // FLD (may be NaN/inf/denormal)
            if c.fpu.get_tag(0) != Tag::Empty {
                let before = c.fpu.read_st(0);
                run(&mut c, 0xd9, 0xe0);
                run(&mut c, 0xd9, 0xe0);
                prop_assert_eq!(c.fpu.read_st(0), before);
            }
        }
    }
}
