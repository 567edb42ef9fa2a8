//! xHCI register offsets and bitflags (xHCI 1.1 specification).

use bitflags::bitflags;

// ---------------------------------------------------------------------------
// Capability register block (relative to MMIO base)
// ---------------------------------------------------------------------------

/// Capability register length (byte offset to operational registers).
pub const CAPLENGTH: u64 = 0x00;
/// Host Controller Interface Version Number.
pub const HCIVERSION: u64 = 0x02;
/// Structural Parameters 1 (max slots, max ports).
pub const HCSPARAMS1: u64 = 0x04;
/// Structural Parameters 2 (scratchpad buffer counts).
pub const HCSPARAMS2: u64 = 0x08;
/// Capability Parameters 1 (extended capabilities pointer).
pub const HCCPARAMS1: u64 = 0x10;
/// Doorbell Array Offset.
pub const DBOFF: u64 = 0x14;
/// Runtime Register Space Offset.
pub const RTSOFF: u64 = 0x18;

/// Extracts MaxSlots from HCSPARAMS1.
#[must_use]
pub const fn hcsparams1_max_slots(v: u32) -> u8 {
    (v & 0xFF) as u8
}

/// Extracts MaxPorts from HCSPARAMS1.
#[must_use]
pub const fn hcsparams1_max_ports(v: u32) -> u8 {
    (v >> 24) as u8
}

/// Extracts the Max Scratchpad Buffers field from HCSPARAMS2 (split across
/// bits 31:27 (high 5 bits) and 25:21 (low 5 bits)).
#[must_use]
pub const fn hcsparams2_max_scratchpad_bufs(v: u32) -> u32 {
    ((v >> 27) & 0x1F) << 5 | ((v >> 21) & 0x1F)
}

/// Extended Capabilities Pointer field of HCCPARAMS1 (dword offset from MMIO
/// base, not from the capability registers).
#[must_use]
pub const fn hccparams1_ext_caps_offset(v: u32) -> u64 {
    (u64::from(v >> 16) & 0xFFFF) * 4
}

// ---------------------------------------------------------------------------
// Operational register block (relative to `op = mmio + CAPLENGTH`)
// ---------------------------------------------------------------------------

/// USB Command register.
pub const USBCMD: u64 = 0x00;
/// USB Status register.
pub const USBSTS: u64 = 0x04;
/// Device Notification Control.
pub const DNCTRL: u64 = 0x14;
/// Command Ring Control Register (low 32 bits).
pub const CRCR_LO: u64 = 0x18;
/// Command Ring Control Register (high 32 bits).
pub const CRCR_HI: u64 = 0x1C;
/// Device Context Base Address Array Pointer (low 32 bits).
pub const DCBAAP_LO: u64 = 0x30;
/// Device Context Base Address Array Pointer (high 32 bits).
pub const DCBAAP_HI: u64 = 0x34;
/// Configure register (enabled device slots).
pub const CONFIG: u64 = 0x38;
/// Base offset of the port register sets; stride 16 bytes per port.
pub const PORTSC_BASE: u64 = 0x400;
/// Byte stride between successive ports' register sets.
pub const PORTSC_STRIDE: u64 = 0x10;

bitflags! {
    /// USBCMD register bits.
    #[derive(Debug, Clone, Copy)]
    pub struct UsbCmd: u32 {
        /// Run/Stop.
        const RUN = 1 << 0;
        /// Host Controller Reset.
        const HCRST = 1 << 1;
        /// Interrupter Enable.
        const INTE = 1 << 2;
        /// Host System Error Enable.
        const HSEE = 1 << 3;
    }
}

bitflags! {
    /// USBSTS register bits.
    #[derive(Debug, Clone, Copy)]
    pub struct UsbSts: u32 {
        /// HC Halted.
        const HCH = 1 << 0;
        /// Controller Not Ready.
        const CNR = 1 << 11;
    }
}

bitflags! {
    /// PORTSC register bits.
    #[derive(Debug, Clone, Copy)]
    pub struct PortSc: u32 {
        /// Current Connect Status.
        const CCS = 1 << 0;
        /// Port Enabled.
        const PED = 1 << 1;
        /// Port Reset.
        const PR = 1 << 4;
        /// Port Power.
        const PP = 1 << 9;
        /// Connect Status Change.
        const CSC = 1 << 17;
        /// Port Reset Change.
        const PRC = 1 << 21;
    }
}

/// Mask of all RW1C ("write 1 to clear") change bits in PORTSC. Used to
/// acknowledge status changes without disturbing other fields, since
/// PORTSC mixes RW, RW1C, and RO bits in one register.
pub const PORTSC_CHANGE_MASK: u32 = 0x00FE_0000;

/// Command register for USB Legacy Support (first xHCI extended capability
/// with ID 1).
pub const USB_LEGACY_SUPPORT_CAP_ID: u32 = 1;
/// OS-owned semaphore bit in the USB Legacy Support Capability register.
pub const USBLEGSUP_OS_OWNED: u32 = 1 << 24;
/// BIOS-owned semaphore bit in the USB Legacy Support Capability register.
pub const USBLEGSUP_BIOS_OWNED: u32 = 1 << 16;

// ---------------------------------------------------------------------------
// Runtime register block (relative to `rt = mmio + RTSOFF`)
// ---------------------------------------------------------------------------

/// Offset of interrupter 0's register set within the runtime space.
pub const IR0_BASE: u64 = 0x20;
/// Interrupter Management register.
pub const IMAN: u64 = 0x00;
/// Interrupter Moderation register.
pub const IMOD: u64 = 0x04;
/// Event Ring Segment Table Size register.
pub const ERSTSZ: u64 = 0x08;
/// Event Ring Segment Table Base Address register.
pub const ERSTBA_LO: u64 = 0x10;
/// ERSTBA high 32 bits.
pub const ERSTBA_HI: u64 = 0x14;
/// Event Ring Dequeue Pointer register.
pub const ERDP_LO: u64 = 0x18;
/// ERDP high 32 bits.
pub const ERDP_HI: u64 = 0x1C;

bitflags! {
    /// IMAN register bits.
    #[derive(Debug, Clone, Copy)]
    pub struct IMan: u32 {
        /// Interrupt Pending.
        const IP = 1 << 0;
        /// Interrupt Enable.
        const IE = 1 << 1;
    }
}

/// Event Handler Busy bit, OR'd into the low dword written to ERDP.
pub const ERDP_EVENT_HANDLER_BUSY: u32 = 1 << 3;
