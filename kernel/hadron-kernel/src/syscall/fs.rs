//! `FILE_OPEN`/`FILE_READ`/`FILE_WRITE`/`FILE_CLOSE` syscall handlers.
//!
//! Backed by a single [`FatFs`] mount over whatever [`BlockDevice`] the boot
//! sequence installs (see [`mount`]) and a fixed-size open-file table, the
//! same fixed-slot-table shape [`crate::proc`] uses for processes.

use alloc::vec::Vec;

use hadron_core::error::{Errno, ToErrno};
use hadron_core::sync::SpinLock;
use hadron_driver_api::BlockDevice;
use hadron_fat::{DirEntry, FatError, FatFs};

use super::userptr::{UserSlice, copy_user_cstring};

const EFAULT: isize = Errno::Fault.as_errno();
const EBADF: isize = Errno::BadF.as_errno();

/// Maximum length in bytes of a path argument, NUL not included. Shared by
/// every path-taking call (`FILE_OPEN`, `PROCESS_SPAWN_ELF`).
pub const MAX_PATH_LEN: usize = 128;

/// Maximum number of files open at once.
const MAX_OPEN_FILES: usize = 32;

/// Open-for-write flag for `FILE_OPEN`'s `flags` argument.
pub const O_WRITE: usize = 1 << 0;

struct OpenFile {
    entry: DirEntry,
    cursor: u64,
    writable: bool,
}

const EMPTY_FILE: Option<OpenFile> = None;
static OPEN_FILES: SpinLock<[Option<OpenFile>; MAX_OPEN_FILES]> =
    SpinLock::new([EMPTY_FILE; MAX_OPEN_FILES]);

static MOUNT: SpinLock<Option<FatFs<'static>>> = SpinLock::new(None);

/// Mounts the volume on `device` as the single filesystem every
/// `FILE_*`/`PROCESS_SPAWN_ELF` call reads from. Called once during boot if
/// a block device was found; left unmounted otherwise.
///
/// # Errors
///
/// Propagates [`FatError`] if the boot sector fails validation.
pub fn mount(device: &'static dyn BlockDevice) -> Result<(), FatError> {
    let fs = FatFs::mount(device)?;
    *MOUNT.lock() = Some(fs);
    Ok(())
}

/// Reads the full content of `path` from the mounted volume. Used by
/// `PROCESS_SPAWN_ELF`, which has no file-descriptor lifetime of its own.
///
/// # Errors
///
/// Returns [`FatError::NotFound`] if nothing is mounted or the lookup
/// fails, or whatever error the read itself produces.
pub fn read_file_by_path(path: &str) -> Result<Vec<u8>, FatError> {
    let guard = MOUNT.lock();
    let fs = guard.as_ref().ok_or(FatError::NotFound)?;
    let entry = fs.lookup(path)?;
    fs.read_file(&entry)
}

/// Opens `path`, returning a file descriptor (an index into the open-file
/// table) or a negative errno.
pub fn sys_open(path_ptr: usize, flags: usize) -> isize {
    // SAFETY: copy_user_cstring validates the range before reading it.
    let Some(path) = (unsafe { copy_user_cstring(path_ptr, MAX_PATH_LEN) }) else {
        return EFAULT;
    };

    let guard = MOUNT.lock();
    let Some(fs) = guard.as_ref() else {
        return Errno::NoEnt.as_errno();
    };
    let entry = match fs.lookup(&path) {
        Ok(entry) if !entry.is_dir => entry,
        Ok(_) => return Errno::Inval.as_errno(),
        Err(e) => return e.to_errno(),
    };
    drop(guard);

    let mut files = OPEN_FILES.lock();
    let Some(fd) = files.iter().position(Option::is_none) else {
        return Errno::NoMem.as_errno();
    };
    files[fd] = Some(OpenFile { entry, cursor: 0, writable: flags & O_WRITE != 0 });
    fd as isize
}

/// Reads up to `len` bytes from `fd`'s current cursor into `buf_ptr`,
/// advancing the cursor by the amount actually read.
pub fn sys_read(fd: usize, buf_ptr: usize, len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf_ptr, len) else {
        return EFAULT;
    };

    let mut files = OPEN_FILES.lock();
    let Some(Some(file)) = files.get_mut(fd) else {
        return EBADF;
    };

    let guard = MOUNT.lock();
    let Some(fs) = guard.as_ref() else {
        return Errno::NoEnt.as_errno();
    };
    let content = match fs.read_file(&file.entry) {
        Ok(c) => c,
        Err(e) => return e.to_errno(),
    };

    let start = (file.cursor as usize).min(content.len());
    let end = (start + len).min(content.len());
    let n = end - start;

    // SAFETY: `slice` was validated above for exactly `len` bytes; `n <= len`.
    unsafe { slice.as_mut_slice()[..n].copy_from_slice(&content[start..end]) };
    file.cursor += n as u64;
    n as isize
}

/// Writes `len` bytes from `buf_ptr` at `fd`'s current cursor, advancing it.
///
/// Rejects the write with `-EINVAL` if it would grow the file past its
/// current allocation, matching [`FatFs::write_file`]'s no-growth contract.
pub fn sys_write(fd: usize, buf_ptr: usize, len: usize) -> isize {
    let Ok(slice) = UserSlice::new(buf_ptr, len) else {
        return EFAULT;
    };

    let mut files = OPEN_FILES.lock();
    let Some(Some(file)) = files.get_mut(fd) else {
        return EBADF;
    };
    if !file.writable {
        return Errno::Perm.as_errno();
    }

    let guard = MOUNT.lock();
    let Some(fs) = guard.as_ref() else {
        return Errno::NoEnt.as_errno();
    };

    let mut content = match fs.read_file(&file.entry) {
        Ok(c) => c,
        Err(e) => return e.to_errno(),
    };
    let start = file.cursor as usize;
    let end = start + len;
    if end > file.entry.size as usize {
        return Errno::Inval.as_errno();
    }
    if content.len() < end {
        content.resize(end, 0);
    }

    // SAFETY: `slice` was validated above for exactly `len` bytes.
    let bytes = unsafe { slice.as_slice() };
    content[start..end].copy_from_slice(bytes);

    if let Err(e) = fs.write_file(&file.entry, &content) {
        return e.to_errno();
    }
    file.cursor += len as u64;
    len as isize
}

/// Closes `fd`, freeing its open-file table slot.
pub fn sys_close(fd: usize) -> isize {
    let mut files = OPEN_FILES.lock();
    let Some(slot) = files.get_mut(fd) else {
        return EBADF;
    };
    if slot.take().is_none() {
        return EBADF;
    }
    0
}
