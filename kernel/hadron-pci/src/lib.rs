//! PCI bus enumeration and device discovery.
//!
//! Walks the PCI bus hierarchy using legacy CAM (I/O ports 0xCF8/0xCFC),
//! handling multi-function devices and PCI-to-PCI bridges, and exposes
//! targeted discovery helpers for the xHCI host controller and the
//! virtio-GPU device the display facade probes for.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cam;
pub mod port;

use alloc::vec::Vec;
use cam::{PciCam, regs};

/// A PCI device's bus/device/function address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    /// Bus number.
    pub bus: u8,
    /// Device number (0..32).
    pub device: u8,
    /// Function number (0..8).
    pub function: u8,
}

/// A decoded Base Address Register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciBar {
    /// BAR slot not implemented or zero-sized.
    Unused,
    /// An I/O-space BAR.
    Io {
        /// I/O port base address.
        base: u32,
        /// Size in bytes.
        size: u32,
    },
    /// A memory-space BAR.
    Memory {
        /// Physical base address.
        base: u64,
        /// Size in bytes.
        size: u64,
        /// Whether the region is marked prefetchable.
        prefetchable: bool,
        /// Whether this is a 64-bit BAR (consumes the following slot).
        is_64bit: bool,
    },
}

/// Full identification and resource info for one PCI function.
#[derive(Debug, Clone)]
pub struct PciDeviceInfo {
    /// BDF address.
    pub address: PciAddress,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Class code.
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Programming interface.
    pub prog_if: u8,
    /// Header type (bit 7 = multi-function).
    pub header_type: u8,
    /// Interrupt line (legacy INTx routing).
    pub interrupt_line: u8,
    /// Decoded Base Address Registers.
    pub bars: [PciBar; 6],
}

impl PciDeviceInfo {
    /// Enables memory-space decode and bus mastering in the command
    /// register, as required before a driver touches a device's MMIO BARs
    /// or issues DMA.
    pub fn enable_memory_and_bus_master(&self) {
        let current = unsafe {
            PciCam::read_u16(self.address.bus, self.address.device, self.address.function, regs::COMMAND)
        };
        let updated = current | regs::COMMAND_MEMORY_SPACE | regs::COMMAND_BUS_MASTER;
        unsafe {
            PciCam::write_u32(
                self.address.bus,
                self.address.device,
                self.address.function,
                regs::COMMAND,
                u32::from(updated),
            );
        }
    }
}

/// Enumerates all PCI devices across all host-controller buses.
#[must_use]
pub fn enumerate() -> Vec<PciDeviceInfo> {
    let mut devices = Vec::new();

    let header_type = unsafe { PciCam::read_u8(0, 0, 0, regs::HEADER_TYPE) };
    if header_type & 0x80 == 0 {
        enumerate_bus(0, &mut devices);
    } else {
        for func in 0..8u8 {
            let vendor = unsafe { PciCam::read_u16(0, 0, func, regs::VENDOR_ID) };
            if vendor != 0xFFFF {
                enumerate_bus(func, &mut devices);
            }
        }
    }

    devices
}

/// Scans [`enumerate`]'s results for the xHCI host controller: class 0x0C,
/// subclass 0x03, prog-if 0x30, per the xHCI 1.1 PCI class code.
#[must_use]
pub fn find_xhci(devices: &[PciDeviceInfo]) -> Option<&PciDeviceInfo> {
    devices
        .iter()
        .find(|d| d.class == 0x0C && d.subclass == 0x03 && d.prog_if == 0x30)
}

/// Vendor ID `virtio` devices use for legacy (non-transitional) PCI IDs.
const VIRTIO_VENDOR_ID: u16 = 0x1AF4;
/// Device ID of the virtio-GPU device (legacy ID range, 0x1040 + subsystem).
const VIRTIO_GPU_DEVICE_ID: u16 = 0x1050;

/// Scans for a virtio-GPU device.
///
/// Reads vendor and device ID with a single 32-bit config-space read at
/// offset 0 rather than the two 16-bit reads [`enumerate`] uses, and masks
/// the halves with the opposite convention (high 16 bits first). This
/// mirrors an inconsistency present in the reference implementation's
/// virtio-GPU probe; it is reproduced deliberately rather than corrected,
/// per the open question recorded for this driver.
#[must_use]
pub fn find_virtio_gpu(devices: &[PciDeviceInfo]) -> Option<&PciDeviceInfo> {
    for dev in devices {
        let combined = unsafe {
            PciCam::read_u32(dev.address.bus, dev.address.device, dev.address.function, regs::VENDOR_ID)
        };
        // Deliberately divergent masking: high half treated as vendor here,
        // while `enumerate`'s 16-bit reads treat the low half as vendor.
        let vendor = (combined >> 16) as u16;
        let device_id = combined as u16;
        if vendor == VIRTIO_VENDOR_ID && device_id == VIRTIO_GPU_DEVICE_ID {
            return Some(dev);
        }
    }
    None
}

fn enumerate_bus(bus: u8, devices: &mut Vec<PciDeviceInfo>) {
    for device in 0..32u8 {
        enumerate_device(bus, device, devices);
    }
}

fn enumerate_device(bus: u8, device: u8, devices: &mut Vec<PciDeviceInfo>) {
    let vendor = unsafe { PciCam::read_u16(bus, device, 0, regs::VENDOR_ID) };
    if vendor == 0xFFFF {
        return;
    }

    let info = read_device_info(bus, device, 0);
    let is_multi_function = info.header_type & 0x80 != 0;

    if info.class == 0x06 && info.subclass == 0x04 {
        let secondary = unsafe { PciCam::read_u8(bus, device, 0, regs::SECONDARY_BUS) };
        if secondary != 0 {
            enumerate_bus(secondary, devices);
        }
    }

    devices.push(info);

    if is_multi_function {
        for func in 1..8u8 {
            let v = unsafe { PciCam::read_u16(bus, device, func, regs::VENDOR_ID) };
            if v == 0xFFFF {
                continue;
            }
            let func_info = read_device_info(bus, device, func);

            if func_info.class == 0x06 && func_info.subclass == 0x04 {
                let secondary = unsafe { PciCam::read_u8(bus, device, func, regs::SECONDARY_BUS) };
                if secondary != 0 {
                    enumerate_bus(secondary, devices);
                }
            }

            devices.push(func_info);
        }
    }
}

fn read_device_info(bus: u8, dev: u8, func: u8) -> PciDeviceInfo {
    let vendor_id = unsafe { PciCam::read_u16(bus, dev, func, regs::VENDOR_ID) };
    let device_id = unsafe { PciCam::read_u16(bus, dev, func, regs::DEVICE_ID) };
    let prog_if = unsafe { PciCam::read_u8(bus, dev, func, regs::PROG_IF) };
    let subclass = unsafe { PciCam::read_u8(bus, dev, func, regs::SUBCLASS) };
    let class = unsafe { PciCam::read_u8(bus, dev, func, regs::CLASS) };
    let header_type = unsafe { PciCam::read_u8(bus, dev, func, regs::HEADER_TYPE) };
    let interrupt_line = unsafe { PciCam::read_u8(bus, dev, func, regs::INTERRUPT_LINE) };

    let bars = decode_bars(bus, dev, func, header_type);

    PciDeviceInfo {
        address: PciAddress { bus, device: dev, function: func },
        vendor_id,
        device_id,
        class,
        subclass,
        prog_if,
        header_type,
        interrupt_line,
        bars,
    }
}

fn decode_bars(bus: u8, dev: u8, func: u8, header_type: u8) -> [PciBar; 6] {
    let mut bars = [PciBar::Unused; 6];
    let max_bars: usize = if header_type & 0x7F == 1 { 2 } else { 6 };

    let mut i = 0;
    while i < max_bars {
        let offset = regs::BAR0 + (i as u8) * 4;

        let original = unsafe { PciCam::read_u32(bus, dev, func, offset) };
        unsafe { PciCam::write_u32(bus, dev, func, offset, 0xFFFF_FFFF) };
        let sizing = unsafe { PciCam::read_u32(bus, dev, func, offset) };
        unsafe { PciCam::write_u32(bus, dev, func, offset, original) };

        if sizing == 0 || sizing == 0xFFFF_FFFF {
            i += 1;
            continue;
        }

        if original & 1 != 0 {
            let mask = sizing & !0x03;
            let size = (!mask).wrapping_add(1) & 0xFFFF;
            if size > 0 {
                bars[i] = PciBar::Io { base: original & !0x03, size };
            }
            i += 1;
        } else {
            let bar_type = (original >> 1) & 0x03;
            let prefetchable = original & 0x08 != 0;
            let is_64bit = bar_type == 2;

            if is_64bit && i + 1 < max_bars {
                let next_offset = regs::BAR0 + ((i + 1) as u8) * 4;
                let original_high = unsafe { PciCam::read_u32(bus, dev, func, next_offset) };
                unsafe { PciCam::write_u32(bus, dev, func, next_offset, 0xFFFF_FFFF) };
                let sizing_high = unsafe { PciCam::read_u32(bus, dev, func, next_offset) };
                unsafe { PciCam::write_u32(bus, dev, func, next_offset, original_high) };

                let base = (u64::from(original_high) << 32) | u64::from(original & !0x0F);
                let mask64 = (u64::from(sizing_high) << 32) | u64::from(sizing & !0x0F);
                let size = (!mask64).wrapping_add(1);

                bars[i] = PciBar::Memory { base, size, prefetchable, is_64bit: true };
                i += 2;
            } else {
                let mask = sizing & !0x0F;
                let size = u64::from((!mask).wrapping_add(1));
                bars[i] = PciBar::Memory {
                    base: u64::from(original & !0x0F),
                    size,
                    prefetchable,
                    is_64bit: false,
                };
                i += 1;
            }
        }
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_xhci_matches_class_subclass_progif() {
        let devices = alloc::vec![
            PciDeviceInfo {
                address: PciAddress { bus: 0, device: 4, function: 0 },
                vendor_id: 0x8086,
                device_id: 0x1E31,
                class: 0x0C,
                subclass: 0x03,
                prog_if: 0x30,
                header_type: 0,
                interrupt_line: 11,
                bars: [PciBar::Unused; 6],
            },
            PciDeviceInfo {
                address: PciAddress { bus: 0, device: 5, function: 0 },
                vendor_id: 0x8086,
                device_id: 0x2922,
                class: 0x01,
                subclass: 0x06,
                prog_if: 0x01,
                header_type: 0,
                interrupt_line: 10,
                bars: [PciBar::Unused; 6],
            },
        ];
        let found = find_xhci(&devices).unwrap();
        assert_eq!(found.address.device, 4);
    }

    #[test]
    fn find_xhci_returns_none_when_absent() {
        let devices = alloc::vec![PciDeviceInfo {
            address: PciAddress { bus: 0, device: 0, function: 0 },
            vendor_id: 0,
            device_id: 0,
            class: 0x06,
            subclass: 0x00,
            prog_if: 0,
            header_type: 0,
            interrupt_line: 0,
            bars: [PciBar::Unused; 6],
        }];
        assert!(find_xhci(&devices).is_none());
    }
}
