//! Syscall ABI: argument decoding, user-pointer validation, and dispatch.
//!
//! Entry is `syscall`; the number lives in RAX, up to four arguments in
//! RDI/RSI/RDX/R10, and the return value is written back into RAX. See each
//! submodule for the calls it implements; [`syscall_trap`] is the single
//! entry point [`crate::arch::x86_64::syscall::syscall_entry`]'s trap stub
//! calls after parking the caller's registers.

pub mod userptr;

// display, fs, mem, and mouse touch only host-testable collaborators
// (hadron-driver-api, hadron-fat, hadron-drivers, the heap allocator); only
// process touches crate::proc's arch-gated scheduler entry points, so it
// alone needs gating, mirroring crate::proc's own per-item split.
mod display;
mod fs;
mod mem;
mod mouse;
#[cfg(target_os = "none")]
mod process;

pub use fs::mount as mount_filesystem;
pub use mouse::manager as mouse_manager;
#[cfg(target_os = "none")]
pub(crate) use mouse::bind_controller as bind_mouse_controller;
#[cfg(target_os = "none")]
pub(crate) use process::load_elf_image as load_boot_elf_image;

#[cfg(target_os = "none")]
use crate::arch::x86_64::syscall::TrapFrame;

const SYS_SERIAL_PUTCHAR: u64 = 1;
const SYS_SERIAL_PUTS: u64 = 2;
const SYS_PROCESS_CREATE: u64 = 3;
const SYS_PROCESS_YIELD: u64 = 4;
const SYS_PROCESS_EXIT: u64 = 5;
const SYS_THREAD_CREATE: u64 = 6;
const SYS_PROCESS_SPAWN_ELF: u64 = 7;
const SYS_DRAW_PIXEL: u64 = 10;
const SYS_DRAW_FILL_RECT: u64 = 11;
const SYS_DRAW_PRESENT: u64 = 12;
const SYS_WM_CREATE_WINDOW: u64 = 13;
const SYS_FILE_OPEN: u64 = 20;
const SYS_FILE_READ: u64 = 21;
const SYS_FILE_WRITE: u64 = 22;
const SYS_FILE_CLOSE: u64 = 23;
const SYS_USER_KMALLOC: u64 = 24;
const SYS_USER_KFREE: u64 = 25;
const SYS_USER_MEMCPY: u64 = 26;
const SYS_USER_MEMCMP: u64 = 27;
const SYS_MOUSE_READ: u64 = 30;
const SYS_MOUSE_SET_POS: u64 = 31;
const SYS_MOUSE_SET_BOUNDS: u64 = 32;

/// Maximum bytes `SERIAL_PUTS` will scan for a NUL terminator. Not named by
/// the call table (unlike the path-taking calls' 128-byte cap); chosen
/// generously for a debug line without letting a missing terminator scan
/// unbounded user memory.
const SERIAL_PUTS_MAX_LEN: usize = 256;

/// Reinterprets the low 32 bits of a syscall argument as a signed value.
/// Used for coordinates and deltas, which travel as 64-bit register
/// arguments but are logically `i32`.
fn sign32(arg: u64) -> i32 {
    arg as u32 as i32
}

/// Decodes and performs the call named by `frame.rax`, writing its return
/// value into `frame.rax`.
///
/// Returns whether this call should trigger a reschedule, per the dispatch
/// rule in [`crate::proc::schedule`]'s contract: always for
/// `PROCESS_YIELD`/`PROCESS_EXIT`, only on success for
/// `THREAD_CREATE`/`PROCESS_SPAWN_ELF`, never otherwise.
#[cfg(target_os = "none")]
fn dispatch(frame: &mut TrapFrame) -> bool {
    // There is no hardware-interrupt path in this kernel (see
    // crate::arch::x86_64::idt's module documentation), so every syscall
    // trap doubles as the xHCI driver's polling opportunity.
    mouse::poll();

    let (ret, request_switch): (u64, bool) = match frame.rax {
        SYS_SERIAL_PUTCHAR => {
            crate::log::putchar(frame.rdi as u8);
            (0, false)
        }
        SYS_SERIAL_PUTS => {
            // SAFETY: copy_user_cstring validates the range before reading it.
            let ret = match unsafe {
                userptr::copy_user_cstring(frame.rdi as usize, SERIAL_PUTS_MAX_LEN)
            } {
                Some(s) => {
                    for byte in s.bytes() {
                        crate::log::putchar(byte);
                    }
                    0
                }
                None => u64::MAX,
            };
            (ret, false)
        }
        SYS_PROCESS_CREATE => (process::sys_process_create(frame.rdi) as u64, false),
        SYS_PROCESS_YIELD => (0, true),
        SYS_PROCESS_EXIT => {
            crate::proc::exit_current();
            (0, true)
        }
        SYS_THREAD_CREATE => {
            let (ret, switch) = process::sys_thread_create(frame.rdi);
            (ret as u64, switch)
        }
        SYS_PROCESS_SPAWN_ELF => {
            let (ret, switch) = process::sys_process_spawn_elf(frame.rdi as usize);
            (ret as u64, switch)
        }
        SYS_DRAW_PIXEL => {
            let ret = display::sys_draw_pixel(frame.rdi as u32, frame.rsi as u32, frame.rdx as u32);
            (ret as u64, false)
        }
        SYS_DRAW_FILL_RECT => {
            let ret =
                display::sys_draw_fill_rect(frame.rdi as u32, frame.rsi as u32, frame.rdx, frame.r10 as u32);
            (ret as u64, false)
        }
        SYS_DRAW_PRESENT => (display::sys_draw_present() as u64, false),
        SYS_WM_CREATE_WINDOW => {
            let ret = display::sys_wm_create_window(frame.rdi as u32, frame.rsi as u32);
            (ret as u64, false)
        }
        SYS_FILE_OPEN => (fs::sys_open(frame.rdi as usize, frame.rsi as usize) as u64, false),
        SYS_FILE_READ => {
            let ret = fs::sys_read(frame.rdi as usize, frame.rsi as usize, frame.rdx as usize);
            (ret as u64, false)
        }
        SYS_FILE_WRITE => {
            let ret = fs::sys_write(frame.rdi as usize, frame.rsi as usize, frame.rdx as usize);
            (ret as u64, false)
        }
        SYS_FILE_CLOSE => (fs::sys_close(frame.rdi as usize) as u64, false),
        SYS_USER_KMALLOC => (mem::sys_kmalloc(frame.rdi as usize) as u64, false),
        SYS_USER_KFREE => (mem::sys_kfree(frame.rdi as usize) as u64, false),
        SYS_USER_MEMCPY => {
            let ret = mem::sys_memcpy(frame.rdi as usize, frame.rsi as usize, frame.rdx as usize);
            (ret as u64, false)
        }
        SYS_USER_MEMCMP => {
            let ret = mem::sys_memcmp(frame.rdi as usize, frame.rsi as usize, frame.rdx as usize);
            (ret as u64, false)
        }
        SYS_MOUSE_READ => (mouse::sys_mouse_read(frame.rdi as usize) as u64, false),
        SYS_MOUSE_SET_POS => {
            let ret = mouse::sys_mouse_set_pos(i64::from(sign32(frame.rdi)), i64::from(sign32(frame.rsi)));
            (ret as u64, false)
        }
        SYS_MOUSE_SET_BOUNDS => {
            let ret = mouse::sys_mouse_set_bounds(
                i64::from(sign32(frame.rdi)),
                i64::from(sign32(frame.rsi)),
                frame.rdx,
            );
            (ret as u64, false)
        }
        _ => (u64::MAX, false),
    };
    frame.rax = ret;
    request_switch
}

/// Called by [`crate::arch::x86_64::syscall::syscall_entry`] after parking
/// the caller's registers at `frame`. Dispatches the call, then asks the
/// scheduler which process to resume next.
///
/// # Safety
///
/// `frame` must point at a live [`TrapFrame`] just parked by the trap
/// stub; `user_rsp` must be that caller's user-mode stack pointer.
#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
unsafe extern "C" fn syscall_trap(frame: *mut TrapFrame, user_rsp: u64) -> u64 {
    // SAFETY: caller's obligation.
    let frame_ref = unsafe { &mut *frame };
    let request_switch = dispatch(frame_ref);
    crate::proc::schedule(frame as u64, user_rsp, request_switch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign32_reinterprets_low_bits() {
        assert_eq!(sign32(0xFFFF_FFFF), -1);
        assert_eq!(sign32(5), 5);
        assert_eq!(sign32(0x1_0000_0005), 5, "high bits beyond 32 are ignored");
    }
}
