//! Bochs VGA (BGA) PCI display driver.
//!
//! Drives the Bochs/QEMU VGA adapter (vendor 0x1234, device 0x1111) using the
//! VBE DISPI interface for mode setting and a PCI BAR0 linear framebuffer.
//! Implements [`hadron_driver_api::display::DisplayDriver`].

use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use hadron_core::addr::VirtAddr;
use hadron_core::sync::IrqSpinLock;
use hadron_driver_api::display::DisplayDriver;
use hadron_pci::{PciBar, port::Port};

/// Bochs VGA PCI vendor ID.
const BGA_VENDOR_ID: u16 = 0x1234;
/// Bochs VGA PCI device ID.
const BGA_DEVICE_ID: u16 = 0x1111;

/// VBE DISPI index I/O port.
const VBE_DISPI_INDEX_PORT: u16 = 0x01CE;
/// VBE DISPI data I/O port.
const VBE_DISPI_DATA_PORT: u16 = 0x01CF;

const DISPI_INDEX_ID: u16 = 0x00;
const DISPI_INDEX_XRES: u16 = 0x01;
const DISPI_INDEX_YRES: u16 = 0x02;
const DISPI_INDEX_BPP: u16 = 0x03;
const DISPI_INDEX_ENABLE: u16 = 0x04;

const DISPI_ENABLED: u16 = 0x01;
const DISPI_LFB_ENABLED: u16 = 0x40;

/// Minimum expected BGA version.
const BGA_VERSION_MIN: u16 = 0xB0C0;

const DEFAULT_WIDTH: u16 = 1024;
const DEFAULT_HEIGHT: u16 = 768;
const DEFAULT_BPP: u16 = 32;
const BYTES_PER_PIXEL: u32 = 4;

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Records the HHDM offset paging established at boot. Must be called
/// before [`BochsVga::init`] runs.
pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// Wrapper for the VBE DISPI index/data register pair.
struct DispiPorts {
    index: Port<u16>,
    data: Port<u16>,
}

impl DispiPorts {
    const fn new() -> Self {
        Self { index: Port::new(VBE_DISPI_INDEX_PORT), data: Port::new(VBE_DISPI_DATA_PORT) }
    }

    /// # Safety
    /// Port I/O side effects; caller must ensure no concurrent DISPI access.
    unsafe fn read(&self, index: u16) -> u16 {
        unsafe {
            self.index.write(index);
            self.data.read()
        }
    }

    /// # Safety
    /// Port I/O side effects; caller must ensure no concurrent DISPI access.
    unsafe fn write(&self, index: u16, value: u16) {
        unsafe {
            self.index.write(index);
            self.data.write(value);
        }
    }
}

struct ModeState {
    fb_virt: VirtAddr,
    width: u32,
    height: u32,
    pitch: u32,
}

/// Bochs VGA display driver.
pub struct BochsVga {
    dispi: DispiPorts,
    state: IrqSpinLock<Option<ModeState>>,
}

impl BochsVga {
    /// Creates an uninitialized driver. Call [`DisplayDriver::probe`] and
    /// [`DisplayDriver::init`] (normally via `DisplayRegistry::select`)
    /// before using it.
    #[must_use]
    pub const fn new() -> Self {
        Self { dispi: DispiPorts::new(), state: IrqSpinLock::new(None) }
    }

    fn find_device() -> Option<hadron_pci::PciDeviceInfo> {
        hadron_pci::enumerate()
            .into_iter()
            .find(|d| d.vendor_id == BGA_VENDOR_ID && d.device_id == BGA_DEVICE_ID)
    }
}

impl Default for BochsVga {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayDriver for BochsVga {
    fn probe(&self) -> bool {
        Self::find_device().is_some()
    }

    fn init(&self) -> bool {
        let Some(dev) = Self::find_device() else {
            return false;
        };
        dev.enable_memory_and_bus_master();

        // SAFETY: reading the BGA version register via DISPI ports.
        let version = unsafe { self.dispi.read(DISPI_INDEX_ID) };
        if version < BGA_VERSION_MIN {
            hadron_core::warn!("bochs-vga: unsupported BGA version {version:#06x}");
            return false;
        }

        let (bar0_phys, _) = match dev.bars[0] {
            PciBar::Memory { base, size, .. } => (base, size),
            _ => return false,
        };
        let fb_virt = VirtAddr::new(bar0_phys + hhdm_offset());

        // SAFETY: writing DISPI registers to configure the display mode.
        unsafe {
            self.dispi.write(DISPI_INDEX_ENABLE, 0);
            self.dispi.write(DISPI_INDEX_XRES, DEFAULT_WIDTH);
            self.dispi.write(DISPI_INDEX_YRES, DEFAULT_HEIGHT);
            self.dispi.write(DISPI_INDEX_BPP, DEFAULT_BPP);
            self.dispi.write(DISPI_INDEX_ENABLE, DISPI_ENABLED | DISPI_LFB_ENABLED);
        }

        let pitch = u32::from(DEFAULT_WIDTH) * BYTES_PER_PIXEL;
        let fb_byte_count = pitch as usize * usize::from(DEFAULT_HEIGHT);
        // SAFETY: the framebuffer BAR was just enabled and is writable for
        // its full advertised size, which bounds `fb_byte_count`.
        unsafe {
            ptr::write_bytes(fb_virt.as_mut_ptr::<u8>(), 0, fb_byte_count);
        }

        hadron_core::info!(
            "bochs-vga: mode set {DEFAULT_WIDTH}x{DEFAULT_HEIGHT}x{DEFAULT_BPP}, fb at {:#x}",
            fb_virt.as_u64()
        );

        *self.state.lock() = Some(ModeState {
            fb_virt,
            width: u32::from(DEFAULT_WIDTH),
            height: u32::from(DEFAULT_HEIGHT),
            pitch,
        });
        true
    }

    fn is_ready(&self) -> bool {
        self.state.lock().is_some()
    }

    fn width(&self) -> u32 {
        self.state.lock().as_ref().map_or(0, |s| s.width)
    }

    fn height(&self) -> u32 {
        self.state.lock().as_ref().map_or(0, |s| s.height)
    }

    fn draw_pixel(&self, x: u32, y: u32, color: u32) {
        let guard = self.state.lock();
        let Some(state) = guard.as_ref() else { return };
        if x >= state.width || y >= state.height {
            return;
        }
        let offset = u64::from(y) * u64::from(state.pitch) + u64::from(x) * u64::from(BYTES_PER_PIXEL);
        let ptr = (state.fb_virt.as_u64() + offset) as *mut u32;
        // SAFETY: bounds checked above, ptr is within the mapped framebuffer.
        unsafe { ptr::write_volatile(ptr, color) };
    }

    fn fill_rect(&self, x: u32, y: u32, w: u32, h: u32, color: u32) {
        let guard = self.state.lock();
        let Some(state) = guard.as_ref() else { return };
        let x_end = (x + w).min(state.width);
        let y_end = (y + h).min(state.height);
        if x >= x_end || y >= y_end {
            return;
        }
        for row in y..y_end {
            let row_offset = u64::from(row) * u64::from(state.pitch) + u64::from(x) * u64::from(BYTES_PER_PIXEL);
            let row_ptr = (state.fb_virt.as_u64() + row_offset) as *mut u32;
            for col in 0..(x_end - x) {
                // SAFETY: row/col clamped to the framebuffer above.
                unsafe { ptr::write_volatile(row_ptr.add(col as usize), color) };
            }
        }
    }

    fn present(&self) {
        // The linear framebuffer is always live once mode-set; nothing to
        // flush.
    }
}

// SAFETY: DISPI access is stateless port I/O and all mutable state lives
// behind `state`'s IrqSpinLock.
unsafe impl Send for BochsVga {}
unsafe impl Sync for BochsVga {}
