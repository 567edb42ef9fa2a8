//! A spin lock that additionally masks interrupts for the critical section.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Mutual exclusion over `T`, masking interrupts on the current CPU while
/// held.
///
/// Required for anything an interrupt handler can also touch: the xHCI
/// event-ring cursor, the scheduler run queue, the process table. Nested
/// acquisition is safe; each guard saves and restores its own flags.
pub struct IrqSpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for IrqSpinLock<T> {}
unsafe impl<T: ?Sized + Send> Send for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked lock wrapping `data`.
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> IrqSpinLock<T> {
    /// Masks interrupts, then spins until the lock is acquired.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        loop {
            let flags = save_flags_and_cli();
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return IrqSpinLockGuard {
                    lock: self,
                    saved_flags: flags,
                    _not_send: core::marker::PhantomData,
                };
            }
            restore_flags(flags);
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning. On failure, interrupts
    /// are left exactly as they were found.
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let flags = save_flags_and_cli();
        match self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(IrqSpinLockGuard {
                lock: self,
                saved_flags: flags,
                _not_send: core::marker::PhantomData,
            }),
            Err(_) => {
                restore_flags(flags);
                None
            }
        }
    }

    /// Returns a mutable reference to the data, bypassing the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for IrqSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("IrqSpinLock").field("data", &*guard).finish(),
            None => f
                .debug_struct("IrqSpinLock")
                .field("data", &"<locked>")
                .finish(),
        }
    }
}

/// RAII guard releasing an [`IrqSpinLock`] and restoring the caller's
/// interrupt flag state on drop.
///
/// Deliberately `!Send`: the flags it restores belong to the CPU that took
/// them, and migrating the guard to another CPU (or task, under a
/// cooperative scheduler that could resume elsewhere) would restore the
/// wrong CPU's saved state.
pub struct IrqSpinLockGuard<'a, T: ?Sized> {
    lock: &'a IrqSpinLock<T>,
    saved_flags: usize,
    _not_send: core::marker::PhantomData<*const ()>,
}

impl<T: ?Sized> !Send for IrqSpinLockGuard<'_, T> {}

impl<T: ?Sized> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        restore_flags(self.saved_flags);
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn save_flags_and_cli() -> usize {
    let flags: u64;
    unsafe {
        core::arch::asm!(
            "pushfq",
            "pop {flags}",
            "cli",
            flags = out(reg) flags,
            options(nomem, preserves_flags),
        );
    }
    flags as usize
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn restore_flags(flags: usize) {
    const IF_BIT: u64 = 1 << 9;
    if flags as u64 & IF_BIT != 0 {
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn save_flags_and_cli() -> usize {
    let daif: u64;
    unsafe {
        core::arch::asm!("mrs {daif}, DAIF", daif = out(reg) daif, options(nomem, nostack));
        core::arch::asm!("msr DAIFSet, #0xf", options(nomem, nostack));
    }
    daif as usize
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn restore_flags(flags: usize) {
    let daif = flags as u64;
    unsafe {
        core::arch::asm!("msr DAIF, {daif}", daif = in(reg) daif, options(nomem, nostack));
    }
}

#[cfg(not(target_os = "none"))]
fn save_flags_and_cli() -> usize {
    0
}

#[cfg(not(target_os = "none"))]
fn restore_flags(_flags: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        let lock = IrqSpinLock::new(0u32);
        *lock.lock() = 7;
        assert_eq!(*lock.lock(), 7);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = IrqSpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
