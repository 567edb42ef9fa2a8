//! Boot-time configuration surface.
//!
//! A single [`KernelConfig`] value is built once during [`crate::boot::kernel_init`]
//! from compile-time defaults (no Limine boot-information field changes any
//! tunable named here, so construction never fails) and handed down by
//! reference; it is immutable for the remainder of the kernel's life.

use hadron_core::log::LogLevel;

/// Maximum kernel log level compiled in. Sinks at or below this level
/// receive messages.
pub const MAX_LOG_LEVEL: LogLevel = LogLevel::Debug;

/// Maximum number of process slots in the scheduler's fixed table.
pub const MAX_PROCESS_SLOTS: usize = 16;

/// Size in bytes of a freshly created user process's stack.
pub const USER_STACK_SIZE: usize = 16 * 1024;

/// Number of TRB slots in an xHCI command ring (including the LINK TRB).
pub const COMMAND_RING_SIZE: usize = 256;

/// Number of TRB slots in the xHCI event ring.
pub const EVENT_RING_SIZE: usize = 256;

/// Maximum number of HID mice tracked concurrently.
pub const MAX_HID_MICE: usize = 4;

/// Size in bytes of a leased MMIO virtual window.
pub const MMIO_WINDOW_SIZE: usize = 2 * 1024 * 1024;

/// Lower bound (inclusive) of the virtual window `PROCESS_SPAWN_ELF` loads
/// an executable's `PT_LOAD` segments and entry point into.
pub const PROCESS_IMAGE_MIN_VADDR: u64 = 0x00C0_0000;

/// Upper bound (exclusive) of the process image load window.
pub const PROCESS_IMAGE_MAX_VADDR: u64 = 0x0100_0000;

/// Maximum size in bytes of a file `PROCESS_SPAWN_ELF` will read off disk
/// before validating it as an executable.
pub const PROCESS_IMAGE_MAX_FILE_SIZE: usize = 1024 * 1024;

/// Size in bytes of the kernel heap's static backing region.
///
/// Paging is assumed complete before core startup (the bootloader identity-
/// maps physical RAM), so the heap needs no VMM of its own: a statically
/// sized BSS region is already backed, and [`crate::heap`] hands it straight
/// to the global allocator.
pub const KERNEL_HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Boot-time kernel configuration.
///
/// Distinct from the bare constants above only in that it also carries
/// values Limine actually supplies at boot (the HHDM offset); the rest are
/// compile-time constants surfaced here so call sites can read everything
/// relevant to a subsystem off one value instead of mixing `crate::config::*`
/// constants with ad hoc boot-info plumbing.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Offset added to a physical address to obtain its kernel-visible
    /// higher-half direct-map virtual address.
    pub hhdm_offset: u64,
}

impl KernelConfig {
    /// Builds the boot-time configuration from the HHDM offset Limine
    /// reported. Every other tunable is a compile-time constant.
    #[must_use]
    pub const fn new(hhdm_offset: u64) -> Self {
        Self { hhdm_offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_carries_hhdm_offset() {
        let cfg = KernelConfig::new(0xffff_8000_0000_0000);
        assert_eq!(cfg.hhdm_offset, 0xffff_8000_0000_0000);
    }
}
