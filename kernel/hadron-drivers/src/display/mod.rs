//! Display driver registration.
//!
//! Boot code calls [`set_hhdm_offset`] once the direct map is known, then
//! [`registry`] to probe and select a concrete driver.

pub mod bochs_vga;

use bochs_vga::BochsVga;
use hadron_driver_api::display::DisplayRegistry;

static BOCHS_VGA: BochsVga = BochsVga::new();
static REGISTRY: DisplayRegistry = DisplayRegistry::new();

/// Records the HHDM offset used to resolve BAR physical addresses into
/// kernel-visible virtual ones. Must be called before [`registry`]'s
/// `select` is invoked.
pub fn set_hhdm_offset(offset: u64) {
    bochs_vga::set_hhdm_offset(offset);
}

/// Registers every built-in display driver and returns the shared registry.
/// Idempotent: safe to call more than once, though registration is normally
/// done exactly once at boot.
pub fn registry() -> &'static DisplayRegistry {
    static REGISTERED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
    if !REGISTERED.swap(true, core::sync::atomic::Ordering::AcqRel) {
        REGISTRY.register(&BOCHS_VGA);
    }
    &REGISTRY
}
