//! Named virtual address regions.
//!
//! The kernel's address space has exactly two regions this crate hands out
//! sub-allocations from: the heap, grown on demand by the bump allocator in
//! [`crate::region`], and the MMIO lease window, from which the PCI/xHCI
//! driver borrows a fixed-size slot for each controller's register set.

pub use hadron_core::addr::VirtRegion;

use hadron_core::addr::VirtAddr;

/// Size in bytes of the window leased out for MMIO register mappings.
///
/// Matches the configured tunable the bootloader reserves above the 4 GiB
/// mark specifically so mapping a BAR never competes with RAM or the heap
/// for virtual address space.
pub const MMIO_WINDOW_SIZE: u64 = 2 * 1024 * 1024;

/// Base address of the kernel heap region.
///
/// Chosen arbitrarily within the canonical higher half, well clear of the
/// direct physical map and any bootloader-reserved ranges.
pub const KERNEL_HEAP_BASE: u64 = 0xFFFF_9000_0000_0000;

/// Size of the kernel heap region.
pub const KERNEL_HEAP_SIZE: u64 = 64 * 1024 * 1024;

/// Base address of the MMIO lease window.
pub const MMIO_WINDOW_BASE: u64 = 0xFFFF_A000_0000_0000;

/// Returns the kernel heap's virtual region.
#[must_use]
pub fn kernel_heap_region() -> VirtRegion {
    VirtRegion::new(VirtAddr::new_truncate(KERNEL_HEAP_BASE), KERNEL_HEAP_SIZE)
}

/// Returns the MMIO lease window's virtual region.
#[must_use]
pub fn mmio_window_region() -> VirtRegion {
    VirtRegion::new(VirtAddr::new_truncate(MMIO_WINDOW_BASE), MMIO_WINDOW_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_do_not_overlap() {
        let heap = kernel_heap_region();
        let mmio = mmio_window_region();
        let heap_end = heap.base().as_u64() + heap.max_size();
        assert!(heap_end <= mmio.base().as_u64());
    }
}
