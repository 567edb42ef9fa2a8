//! `DRAW_*`/`WM_CREATE_WINDOW` syscall handlers.
//!
//! Every draw call is a thin pass-through to whichever [`DisplayDriver`] the
//! boot sequence selected via [`hadron_drivers::display::registry`]; all of
//! them fail with `-1` while no driver has been selected, since the
//! registry's `NullDisplay` fallback reports `is_ready() == false`.

use hadron_core::sync::SpinLock;
use hadron_driver_api::DisplayDriver;

/// Maximum number of windows `WM_CREATE_WINDOW` can hand out. Not named by
/// the call table; the window manager itself (compositing, input routing)
/// is out of scope, so this is just enough bookkeeping to hand back a
/// stable id and validate later calls against it.
const MAX_WINDOWS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Window {
    width: u32,
    height: u32,
}

const EMPTY_WINDOW: Option<Window> = None;
static WINDOWS: SpinLock<[Option<Window>; MAX_WINDOWS]> = SpinLock::new([EMPTY_WINDOW; MAX_WINDOWS]);

fn current() -> &'static dyn DisplayDriver {
    hadron_drivers::display::registry().current()
}

/// Writes one pixel. Fails if no display is ready.
pub fn sys_draw_pixel(x: u32, y: u32, color: u32) -> isize {
    let display = current();
    if !display.is_ready() {
        return -1;
    }
    display.draw_pixel(x, y, color);
    0
}

/// Fills an axis-aligned rectangle. `packed_wh` carries `(w << 32) | h`.
pub fn sys_draw_fill_rect(x: u32, y: u32, packed_wh: u64, color: u32) -> isize {
    let display = current();
    if !display.is_ready() {
        return -1;
    }
    let w = (packed_wh >> 32) as u32;
    let h = packed_wh as u32;
    display.fill_rect(x, y, w, h, color);
    0
}

/// Flushes pending draw operations to the visible framebuffer.
pub fn sys_draw_present() -> isize {
    let display = current();
    if !display.is_ready() {
        return -1;
    }
    display.present();
    0
}

/// Allocates a window id for a `w`x`h` surface.
///
/// Returns `-1` if either dimension is outside `[1, 4096]` or the window
/// table is full.
pub fn sys_wm_create_window(w: u32, h: u32) -> isize {
    if w == 0 || w > 4096 || h == 0 || h > 4096 {
        return -1;
    }
    let mut windows = WINDOWS.lock();
    let Some(slot) = windows.iter().position(Option::is_none) else {
        return -1;
    };
    windows[slot] = Some(Window { width: w, height: h });
    slot as isize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_window_rejects_out_of_range_dimensions() {
        assert_eq!(sys_wm_create_window(0, 10), -1);
        assert_eq!(sys_wm_create_window(10, 4097), -1);
    }

    #[test]
    fn create_window_accepts_boundary_dimensions() {
        assert!(sys_wm_create_window(1, 4096) >= 0);
        assert!(sys_wm_create_window(4096, 1) >= 0);
    }
}
