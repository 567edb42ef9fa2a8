//! `PROCESS_CREATE`/`THREAD_CREATE`/`PROCESS_SPAWN_ELF` syscall handlers.
//!
//! All three ultimately admit a new runnable slot via [`crate::proc::create_user`];
//! there is no separate thread or per-process address-space concept (see
//! [`crate::proc`]'s module documentation), so `THREAD_CREATE` differs from
//! `PROCESS_CREATE` only in that the dispatcher requests a reschedule on its
//! success. `PROCESS_SPAWN_ELF` additionally reads and loads an executable
//! before admitting it.

use hadron_elf::ElfFile;

use super::fs;
use super::userptr::copy_user_cstring;
use crate::config::{PROCESS_IMAGE_MAX_FILE_SIZE, PROCESS_IMAGE_MAX_VADDR, PROCESS_IMAGE_MIN_VADDR};

/// Admits a new process at `entry`. Never triggers a reschedule by itself.
pub fn sys_process_create(entry: u64) -> isize {
    match crate::proc::create_user(entry) {
        Ok(pid) => pid as isize,
        Err(_) => -1,
    }
}

/// Admits a new runnable slot at `entry`. Returns whether admission
/// succeeded alongside the slot id/`-1`; the dispatcher requests a
/// reschedule only on success.
pub fn sys_thread_create(entry: u64) -> (isize, bool) {
    match crate::proc::create_user(entry) {
        Ok(tid) => (tid as isize, true),
        Err(_) => (-1, false),
    }
}

/// Checks that `[vaddr, vaddr + memsz)` falls entirely within the process
/// image load window.
fn segment_in_window(vaddr: u64, memsz: u64) -> bool {
    let Some(end) = vaddr.checked_add(memsz) else {
        return false;
    };
    vaddr >= PROCESS_IMAGE_MIN_VADDR && vaddr < PROCESS_IMAGE_MAX_VADDR && end <= PROCESS_IMAGE_MAX_VADDR
}

/// Copies a segment's file-backed bytes to its load address and zero-fills
/// the remaining `.bss` tail.
///
/// # Safety
///
/// `vaddr` must address `memsz` bytes of writable, mapped memory — which
/// [`segment_in_window`] only checks lies within the reserved load window,
/// not that it is actually backed. This kernel has no per-process address
/// space, so the window is carved out of the kernel's own linear mapping.
unsafe fn copy_segment(vaddr: u64, data: &[u8], memsz: u64) {
    let dst = vaddr as *mut u8;
    // SAFETY: caller's obligation; `data.len() <= memsz` per the loader.
    unsafe {
        core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        if memsz as usize > data.len() {
            dst.add(data.len()).write_bytes(0, memsz as usize - data.len());
        }
    }
}

/// Reads an ELF64 executable at `path`, validates and copies its
/// `PT_LOAD` segments into the process image window.
///
/// Returns the entry point on success. Shared by [`sys_process_spawn_elf`]
/// and [`crate::boot::kernel_init`], which loads the initial boot process
/// the same way rather than through the syscall path.
///
/// # Errors
///
/// Fails if `path` can't be read, the ELF fails to parse, the ELF has no
/// `PT_LOAD` segments, or any segment (or the entry point) falls outside
/// the process image load window.
pub(crate) fn load_elf_image(path: &str) -> Option<u64> {
    let data = fs::read_file_by_path(path).ok()?;
    if data.len() > PROCESS_IMAGE_MAX_FILE_SIZE {
        return None;
    }

    let elf = ElfFile::parse(&data).ok()?;
    let image = elf.load_segments(0).ok()?;
    if image.segments.is_empty() {
        return None;
    }
    if !segment_in_window(image.entry_point, 0) {
        return None;
    }
    for segment in &image.segments {
        if !segment_in_window(segment.vaddr, segment.memsz) {
            return None;
        }
    }

    for segment in &image.segments {
        // SAFETY: every segment was just checked to lie within the
        // reserved process image window.
        unsafe { copy_segment(segment.vaddr, segment.data, segment.memsz) };
    }

    Some(image.entry_point)
}

/// Reads an ELF64 executable named by a user C-string path, loads its
/// `PT_LOAD` segments into the process image window, and admits it as a
/// new runnable slot.
///
/// Returns `(-1, false)` if the path fails validation, the file can't be
/// read, the ELF fails to parse, any segment falls outside the load
/// window, or the slot table is full. Returns `(pid, true)` on success —
/// a successful spawn always triggers a reschedule.
pub fn sys_process_spawn_elf(path_ptr: usize) -> (isize, bool) {
    // SAFETY: copy_user_cstring validates the range before reading it.
    let Some(path) = (unsafe { copy_user_cstring(path_ptr, fs::MAX_PATH_LEN) }) else {
        return (-1, false);
    };

    let Some(entry) = load_elf_image(&path) else {
        return (-1, false);
    };

    match crate::proc::create_user(entry) {
        Ok(pid) => (pid as isize, true),
        Err(_) => (-1, false),
    }
}
