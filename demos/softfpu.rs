//! Drives the software x87 through the escape-opcode dispatcher: loads two
//! doubles from guest memory, adds them, and stores the sum back.

use dyn86::fpu::dispatch::exec;
use dyn86::{Core, RamBus};

fn main() {
    let mut core = Core::builder(RamBus::new(0x10000))
        .build()
        .expect("core construction failed");

    let a = 1.5f64;
    let b = 0.0625f64;
    core.bus.ram_mut()[0x100..0x108].copy_from_slice(&a.to_bits().to_le_bytes());
    core.bus.ram_mut()[0x108..0x110].copy_from_slice(&b.to_bits().to_le_bytes());

    // FLD qword [0x100]; FADD qword [0x108]; FSTP qword [0x110], all in
    // the 16-bit pure-displacement addressing form.
    exec(&mut core, 0xdd, 0x06 | (0x100 << 8), 0);
    exec(&mut core, 0xdc, 0x06 | (0x108 << 8), 0);
    exec(&mut core, 0xdd, 0x1e | (0x110 << 8), 0);

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&core.bus.ram()[0x110..0x118]);
    let sum = f64::from_bits(u64::from_le_bytes(bytes));

    println!("{} + {} = {}", a, b, sum);
    println!("status word: {:04x}", core.fpu.status_word());
    assert_eq!(sum, a + b);
}
