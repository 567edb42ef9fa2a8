//! Low-level x86_64 instruction wrappers.

pub mod interrupts;
pub mod port;
pub mod tables;
