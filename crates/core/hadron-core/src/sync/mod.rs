//! Spin-lock primitives for single-CPU interior mutability.
//!
//! [`SpinLock`] is a plain test-and-test-and-set spin lock for data that is
//! never touched from interrupt context. [`IrqSpinLock`] additionally masks
//! interrupts for the duration of the critical section, which is mandatory
//! for any state an interrupt handler (the xHCI event-ring doorbell, the
//! timer tick) can also reach.

mod irq_spinlock;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
