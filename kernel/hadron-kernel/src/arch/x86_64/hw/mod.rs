//! Arch-critical hardware timing primitives.
//!
//! No-SMP, no-preemption (see the concurrency model), so the only piece of
//! `arch/x86/kernel/`-style infrastructure this kernel needs is a
//! monotonic clock source for xHCI's millisecond timeouts; there is no
//! APIC, PIT, or HPET driver to initialize.

pub mod tsc;
