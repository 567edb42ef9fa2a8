//! Monotonic clock backing xHCI's millisecond timeouts.
//!
//! Calibrated against the legacy port-0x80 I/O delay (writing a byte to
//! 0x80 takes approximately one microsecond on real hardware, the same
//! trick used to pace PIT/8259 programming sequences) since there is no
//! PIT or HPET driver in this kernel's scope.

use core::sync::atomic::{AtomicU64, Ordering};

use hadron_drivers::xhci::MonotonicClock;
use hadron_pci::port::Port;

use crate::arch::x86_64::hw::tsc::read_tsc;

const CALIBRATION_IO_WAITS: u64 = 1_000;

static TSC_PER_MS: AtomicU64 = AtomicU64::new(0);
static BOOT_TSC: AtomicU64 = AtomicU64::new(0);

fn io_wait() {
    let port = Port::<u8>::new(0x80);
    // SAFETY: port 0x80 is the standard unused POST-code diagnostic port;
    // writing to it is side-effect-free beyond the bus delay it incurs.
    unsafe { port.write(0) };
}

/// Calibrates the TSC frequency against [`CALIBRATION_IO_WAITS`] port-0x80
/// delays (~1 microsecond apiece) and records the boot TSC value as epoch.
/// Must run once, early in boot, before any [`KernelClock`] is used.
pub fn calibrate() {
    let start = read_tsc();
    for _ in 0..CALIBRATION_IO_WAITS {
        io_wait();
    }
    let end = read_tsc();
    let ticks_per_us = (end - start) / CALIBRATION_IO_WAITS;
    TSC_PER_MS.store(ticks_per_us * 1000, Ordering::Release);
    BOOT_TSC.store(start, Ordering::Release);
}

/// A [`MonotonicClock`] backed by the calibrated TSC.
pub struct KernelClock;

/// The single, process-wide clock instance. A unit struct with no state of
/// its own (all calibration lives in the statics above), so a `'static`
/// reference to it is free to hand to anything that outlives boot, such as
/// [`hadron_drivers::xhci::XhciController`].
pub static CLOCK: KernelClock = KernelClock;

impl MonotonicClock for KernelClock {
    fn now_ms(&self) -> u64 {
        let tsc_per_ms = TSC_PER_MS.load(Ordering::Acquire).max(1);
        let elapsed = read_tsc().saturating_sub(BOOT_TSC.load(Ordering::Acquire));
        elapsed / tsc_per_ms
    }

    fn udelay(&self, d: core::time::Duration) {
        let tsc_per_ms = TSC_PER_MS.load(Ordering::Acquire).max(1);
        let ticks = (tsc_per_ms * d.as_micros() as u64) / 1000;
        let start = read_tsc();
        while read_tsc().saturating_sub(start) < ticks {
            core::hint::spin_loop();
        }
    }
}
