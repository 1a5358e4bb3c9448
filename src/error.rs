//! This module provides an `Error` type for the crate using the [`thiserror`] crate.
use thiserror::Error;

/// The `Error` type.
///
/// Only host-side conditions surface here: guest faults are recorded in
/// [`crate::cpu::CpuState`]`::abrt` and never unwind the host.
#[derive(Debug, Error)]
pub enum Error {
    /// The translator's executable code region could not be allocated.
    #[error("unable to allocate executable block ring")]
    ExecAllocFailed,
    /// The block hash table could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// Wraps ['std::io::Error'].
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Wraps ['mmap_rs::Error'].
    #[error(transparent)]
    Mmap(#[from] mmap_rs::Error),
}
