//! DMA-identity memory allocation.
//!
//! The kernel maps all physical RAM linearly at a fixed HHDM (higher-half
//! direct map) offset established by paging at boot, before any driver in
//! this crate runs. A [`DmaBuffer`] is the only way code in this crate
//! obtains a physical address: it owns the backing memory and derives the
//! physical address from the HHDM offset, so no raw integer is ever treated
//! as an owning pointer.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use hadron_core::addr::{PhysAddr, VirtAddr};

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Records the HHDM offset paging established at boot. Must be called
/// exactly once before any [`DmaBuffer`] is allocated.
pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// A zeroed, page-aligned DMA-capable allocation exposing both its virtual
/// and physical address.
pub struct DmaBuffer {
    ptr: *mut u8,
    len: usize,
    layout: Layout,
}

// SAFETY: the buffer is only ever accessed through `&self`/`&mut self`
// methods that go through volatile MMIO-adjacent reads/writes; no two
// controllers share a buffer.
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// Allocates a zeroed buffer of `len` bytes, aligned to 4096 bytes (the
    /// alignment every xHCI ring, context, and scratchpad page requires).
    #[must_use]
    pub fn new(len: usize) -> Self {
        let layout = Layout::from_size_align(len.max(1), 4096).expect("valid DMA layout");
        // SAFETY: layout has nonzero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "DMA allocation failed");
        Self { ptr, len, layout }
    }

    /// The buffer's virtual base address, usable by kernel code.
    #[must_use]
    pub fn virt_base(&self) -> VirtAddr {
        VirtAddr::new(self.ptr as u64)
    }

    /// The buffer's physical base address, programmable into a device
    /// register.
    #[must_use]
    pub fn phys_base(&self) -> PhysAddr {
        PhysAddr::new(self.ptr as u64 - hhdm_offset())
    }

    /// The buffer's length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty (always false; kept for clippy parity
    /// with `len`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw mutable byte slice view of the buffer.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe this allocation, and we hold &mut self.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Raw byte slice view of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe this allocation.
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/layout match the allocation made in `new`.
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phys_base_tracks_hhdm_offset() {
        set_hhdm_offset(0);
        let buf = DmaBuffer::new(64);
        assert_eq!(buf.virt_base().as_u64(), buf.phys_base().as_u64());
    }

    #[test]
    fn buffer_starts_zeroed() {
        let buf = DmaBuffer::new(32);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }
}
