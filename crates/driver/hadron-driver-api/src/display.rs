//! Display driver trait and boot-time registry.
//!
//! Concrete drivers register themselves once, at boot, in probe order by
//! calling [`DisplayRegistry::register`]. This stands in for "loading a
//! driver module's init entry point" the way the kernel loads user
//! processes: the driver's code is compiled into the kernel image rather
//! than loaded from disk as a separate relocatable, since the ELF loader
//! is specified to load a single policy-bounded process image, not a
//! position-independent driver module. Selection walks the registry once
//! and picks the first driver whose `probe` reports present hardware.

use hadron_core::sync::IrqSpinLock;
use planck_noalloc::vec::ArrayVec;

/// Maximum number of display drivers that can be registered.
pub const MAX_DISPLAY_DRIVERS: usize = 4;

/// A probeable framebuffer-style display.
///
/// All methods must be safe to call repeatedly and cheaply; `draw_pixel`
/// in particular is called once per pixel by callers drawing shapes, so
/// implementations should avoid anything costlier than a bounds check and
/// a store.
pub trait DisplayDriver: Send + Sync {
    /// Returns whether this driver's hardware is present. Called once per
    /// registered driver, in registration order, until one returns `true`.
    fn probe(&self) -> bool;

    /// Initializes the display. Called exactly once, immediately after a
    /// successful `probe`. Returns whether initialization succeeded.
    fn init(&self) -> bool;

    /// Whether the display is initialized and ready to accept draw calls.
    fn is_ready(&self) -> bool;

    /// Framebuffer width in pixels.
    fn width(&self) -> u32;

    /// Framebuffer height in pixels.
    fn height(&self) -> u32;

    /// Writes a single pixel. Out-of-bounds coordinates are silently
    /// ignored rather than panicking, matching the "dropped while not
    /// ready" contract for the facade as a whole.
    fn draw_pixel(&self, x: u32, y: u32, color: u32);

    /// Fills an axis-aligned rectangle with a solid color, clipped to the
    /// framebuffer bounds.
    fn fill_rect(&self, x: u32, y: u32, w: u32, h: u32, color: u32);

    /// Flushes pending draw operations to the visible framebuffer.
    fn present(&self);
}

struct NullDisplay;

impl DisplayDriver for NullDisplay {
    fn probe(&self) -> bool {
        false
    }
    fn init(&self) -> bool {
        false
    }
    fn is_ready(&self) -> bool {
        false
    }
    fn width(&self) -> u32 {
        0
    }
    fn height(&self) -> u32 {
        0
    }
    fn draw_pixel(&self, _x: u32, _y: u32, _color: u32) {}
    fn fill_rect(&self, _x: u32, _y: u32, _w: u32, _h: u32, _color: u32) {}
    fn present(&self) {}
}

static NULL_DISPLAY: NullDisplay = NullDisplay;

/// An ordered collection of registered display drivers plus the currently
/// selected one, if any.
pub struct DisplayRegistry {
    drivers: IrqSpinLock<ArrayVec<&'static dyn DisplayDriver, MAX_DISPLAY_DRIVERS>>,
    selected: IrqSpinLock<Option<&'static dyn DisplayDriver>>,
}

impl DisplayRegistry {
    /// Creates an empty registry with nothing selected.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            drivers: IrqSpinLock::new(ArrayVec::new()),
            selected: IrqSpinLock::new(None),
        }
    }

    /// Registers a driver. Registration order is probe order: the first
    /// registered driver is probed first during [`DisplayRegistry::select`].
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_DISPLAY_DRIVERS`] drivers are registered;
    /// this is a boot-time configuration error, not a runtime condition.
    pub fn register(&self, driver: &'static dyn DisplayDriver) {
        self.drivers
            .lock()
            .try_push(driver)
            .expect("display driver registry full");
    }

    /// Walks the registry in registration order, probing and initializing
    /// the first driver that reports present hardware.
    ///
    /// Returns `true` if a driver was selected and initialized.
    pub fn select(&self) -> bool {
        let drivers = self.drivers.lock();
        for &driver in drivers.as_slice() {
            if driver.probe() && driver.init() {
                *self.selected.lock() = Some(driver);
                return true;
            }
        }
        false
    }

    /// Returns the selected driver, or a no-op driver if none was selected
    /// (or `select` was never called).
    ///
    /// Operations routed through the no-op driver return zero-sized
    /// results and never panic, matching the "not-ready" contract of the
    /// original facade.
    #[must_use]
    pub fn current(&self) -> &'static dyn DisplayDriver {
        self.selected.lock().unwrap_or(&NULL_DISPLAY)
    }
}

impl Default for DisplayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeDriver {
        present: bool,
        init_calls: AtomicU32,
        ready: AtomicBool,
    }

    impl DisplayDriver for FakeDriver {
        fn probe(&self) -> bool {
            self.present
        }
        fn init(&self) -> bool {
            self.init_calls.fetch_add(1, Ordering::Relaxed);
            self.ready.store(true, Ordering::Relaxed);
            true
        }
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::Relaxed)
        }
        fn width(&self) -> u32 {
            800
        }
        fn height(&self) -> u32 {
            600
        }
        fn draw_pixel(&self, _x: u32, _y: u32, _color: u32) {}
        fn fill_rect(&self, _x: u32, _y: u32, _w: u32, _h: u32, _color: u32) {}
        fn present(&self) {}
    }

    static ABSENT: FakeDriver = FakeDriver {
        present: false,
        init_calls: AtomicU32::new(0),
        ready: AtomicBool::new(false),
    };
    static PRESENT: FakeDriver = FakeDriver {
        present: true,
        init_calls: AtomicU32::new(0),
        ready: AtomicBool::new(false),
    };

    #[test]
    fn selects_first_probing_driver() {
        let registry = DisplayRegistry::new();
        registry.register(&ABSENT);
        registry.register(&PRESENT);
        assert!(registry.select());
        assert_eq!(registry.current().width(), 800);
        assert!(registry.current().is_ready());
    }

    #[test]
    fn falls_back_to_null_driver() {
        let registry = DisplayRegistry::new();
        registry.register(&ABSENT);
        assert!(!registry.select());
        assert_eq!(registry.current().width(), 0);
        assert!(!registry.current().is_ready());
    }
}
