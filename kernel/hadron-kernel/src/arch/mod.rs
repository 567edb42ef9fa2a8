//! Architecture-specific modules and uniform facade.
//!
//! x86-64 only; the kernel this crate builds targets a single architecture
//! per the purpose statement, so there is no aarch64 sibling to select
//! between.

pub mod x86_64;

/// CPU-local initialization: GDT, TSS, IDT, SYSCALL MSRs. Must run once,
/// very early, before interrupts are enabled or any syscall can arrive.
///
/// # Safety
///
/// Must be called exactly once during early boot, before interrupts are
/// enabled.
pub unsafe fn cpu_init() {
    unsafe {
        x86_64::gdt::init();
        x86_64::idt::init();
        x86_64::syscall::init();
    }
}
