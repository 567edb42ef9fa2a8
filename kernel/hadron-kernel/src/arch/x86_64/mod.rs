//! x86_64 architecture support.

pub mod gdt;
pub mod hw;
pub mod idt;
pub mod instructions;
pub mod structures;
pub mod syscall;

pub use instructions::port::{Port, PortRead, PortWrite, ReadOnlyPort, WriteOnlyPort};
