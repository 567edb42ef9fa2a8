//! `MOUSE_READ`/`MOUSE_SET_POS`/`MOUSE_SET_BOUNDS` syscall handlers.
//!
//! The syscall ABI carries no mouse index argument (unlike the driver's own
//! [`HidMouseManager`], which tracks up to [`crate::config::MAX_HID_MICE`]
//! concurrently); every call here addresses [`PRIMARY_MOUSE`], slot 0. A
//! system with more than one pointing device still only exposes the first
//! one bound to userspace.

use hadron_core::error::Errno;
use hadron_core::sync::SpinLock;
use hadron_drivers::hid_mouse::{HidMouseManager, MouseBounds};

use super::userptr::UserSlice;

const EFAULT: isize = Errno::Fault.as_errno();

/// Index into the manager's mouse table that the syscall ABI exposes.
const PRIMARY_MOUSE: usize = 0;

/// Byte length of the `MOUSE_READ` output record: five `i32` fields
/// (x, y, dx, dy, wheel), four `u8` flags (buttons, pressed, released,
/// valid), and 8 bytes of reserved padding.
const MOUSE_READ_RECORD_SIZE: usize = 32;

static MANAGER: SpinLock<HidMouseManager> = SpinLock::new(HidMouseManager::new());

/// The controller driving the primary mouse, bound once during boot device
/// enumeration. There is no hardware-interrupt path in this kernel, so the
/// only recurring opportunity to advance it is [`poll`], called from every
/// syscall trap.
#[cfg(target_os = "none")]
static CONTROLLER: SpinLock<Option<hadron_drivers::xhci::XhciController<'static>>> = SpinLock::new(None);

/// The process-wide HID mouse manager, shared with the per-trap poll that
/// feeds it fresh xHCI reports.
pub fn manager() -> &'static SpinLock<HidMouseManager> {
    &MANAGER
}

/// Binds the controller driving the primary mouse and scans its device
/// slots for boot-protocol mice. Called once from boot after xHCI device
/// enumeration.
#[cfg(target_os = "none")]
pub fn bind_controller(controller: hadron_drivers::xhci::XhciController<'static>) {
    MANAGER.lock().bind(&controller);
    *CONTROLLER.lock() = Some(controller);
}

/// Polls the bound controller, if any, for fresh HID reports. A no-op if
/// [`bind_controller`] was never called (no xHCI device found at boot).
#[cfg(target_os = "none")]
pub fn poll() {
    let mut controller = CONTROLLER.lock();
    if let Some(controller) = controller.as_mut() {
        MANAGER.lock().poll(controller, &crate::time::CLOCK);
    }
}

/// Encodes the primary mouse's current state into the 32-byte `MOUSE_READ`
/// record layout and copies it to `out_ptr`. The call table carries no
/// separate length argument; the record size is fixed.
pub fn sys_mouse_read(out_ptr: usize) -> isize {
    let Ok(slice) = UserSlice::new(out_ptr, MOUSE_READ_RECORD_SIZE) else {
        return EFAULT;
    };

    let manager = MANAGER.lock();
    let Some(mouse) = manager.state(PRIMARY_MOUSE) else {
        return -1;
    };

    let (x, y) = mouse.position();
    let (dx, dy) = mouse.delta();
    let mut record = [0u8; MOUSE_READ_RECORD_SIZE];
    record[0..4].copy_from_slice(&x.to_le_bytes());
    record[4..8].copy_from_slice(&y.to_le_bytes());
    record[8..12].copy_from_slice(&dx.to_le_bytes());
    record[12..16].copy_from_slice(&dy.to_le_bytes());
    record[16..20].copy_from_slice(&mouse.wheel().to_le_bytes());
    record[20] = mouse.buttons();
    record[21] = mouse.pressed();
    record[22] = mouse.released();
    record[23] = u8::from(mouse.has_report());

    // SAFETY: `slice` was validated above for exactly this many bytes.
    unsafe { slice.as_mut_slice().copy_from_slice(&record) };
    0
}

/// Forces the primary mouse's absolute position, clamped to whatever bounds
/// are currently set. A no-op (but still returns 0) if no mouse is bound.
pub fn sys_mouse_set_pos(x: i64, y: i64) -> isize {
    let mut manager = MANAGER.lock();
    if let Some(mouse) = manager.state_mut(PRIMARY_MOUSE) {
        mouse.set_position(x as i32, y as i32);
    }
    0
}

/// Builds the bounds rectangle a `MOUSE_SET_BOUNDS` call describes, or
/// `None` if it is degenerate.
///
/// A degenerate rectangle (`min_x >= max_x` or `min_y >= max_y`) must
/// disable bounds entirely rather than being installed: `hid_mouse.rs`'s
/// clamp calls use `Ord::clamp`, which panics if `min > max`, so a fully
/// user-controlled syscall argument must never reach it unchecked.
fn bounds_from_args(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Option<MouseBounds> {
    (min_x < max_x && min_y < max_y).then_some(MouseBounds { min_x, max_x, min_y, max_y })
}

/// Sets the clamp rectangle for the primary mouse. `packed_max` carries
/// `(max_x << 32) | max_y`, matching `DRAW_FILL_RECT`'s width/height
/// packing convention.
pub fn sys_mouse_set_bounds(min_x: i64, min_y: i64, packed_max: u64) -> isize {
    let max_x = (packed_max >> 32) as i32;
    let max_y = packed_max as u32 as i32;
    let bounds = bounds_from_args(min_x as i32, min_y as i32, max_x, max_y);
    MANAGER.lock().set_bounds(PRIMARY_MOUSE, bounds);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_from_args_accepts_well_formed_rectangle() {
        let bounds = bounds_from_args(0, 0, 100, 100);
        assert_eq!(bounds, Some(MouseBounds { min_x: 0, max_x: 100, min_y: 0, max_y: 100 }));
    }

    #[test]
    fn bounds_from_args_rejects_degenerate_x_range() {
        assert_eq!(bounds_from_args(100, 0, 100, 100), None);
        assert_eq!(bounds_from_args(100, 0, 50, 100), None);
    }

    #[test]
    fn bounds_from_args_rejects_degenerate_y_range() {
        assert_eq!(bounds_from_args(0, 100, 100, 100), None);
        assert_eq!(bounds_from_args(0, 100, 100, 50), None);
    }
}
