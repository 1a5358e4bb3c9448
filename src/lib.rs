//! The dyn86 crate provides a dynamic recompilation (JIT) core and a
//! software x87 floating-point unit for emulating the IA-32 instruction
//! set on an x86-64 host.
//!
//! The translator turns guest basic blocks into host machine code held in
//! a fixed ring of executable buffers, tracks them per physical page for
//! self-modifying-code detection, and falls back to interpreter calls for
//! anything without a specialized emitter. The x87 core implements the
//! full 80-bit extended-precision stack machine over a soft-float path,
//! including the environment save/restore images and the exception
//! pipeline.
//!
//! The guest memory subsystem, interpreter opcode tables and interrupt
//! delivery stay outside the crate and connect through [`mem::Bus`],
//! [`codegen::builder::OpcodeTables`] and [`mem::MemHandlers`].

pub mod codegen;
pub mod context;
pub mod cpu;
pub mod error;
pub mod exec;
pub mod fpu;
pub mod mem;

pub use codegen::{BlockHandle, OpFn, Translator};
pub use context::{Core, CoreBuilder};
pub use error::Error;
pub use mem::{Bus, MemHandlers, PageMap, RamBus};
