//! Shared conventions for subsystem error types.
//!
//! Each subsystem (`hadron-fat`, `hadron-elf`, the xHCI driver, the
//! scheduler) defines its own error enum local to that crate rather than
//! funneling everything through one kernel-wide type — a FAT cluster-chain
//! loop and a malformed ELF program header are not the same kind of
//! failure and shouldn't share variants. What they do share is how a
//! subsystem error becomes a syscall return value: a negative `errno`-style
//! `isize`. [`ToErrno`] is that one point of contact.

/// Converts a subsystem error into the negative `isize` returned to
/// userspace from the syscall dispatcher.
///
/// Implemented once per subsystem error enum; the syscall layer calls
/// `.to_errno()` at the boundary instead of matching on subsystem-specific
/// variants itself, so adding a new error variant never requires touching
/// the dispatcher.
pub trait ToErrno {
    /// Returns the negative errno value for this error.
    fn to_errno(&self) -> isize;
}

/// Standard POSIX-ish errno values used across subsystem error enums.
///
/// Not exhaustive; subsystems map their variants onto whichever of these
/// best describes the failure as seen by a caller in userspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(isize)]
pub enum Errno {
    /// Operation not permitted.
    Perm = 1,
    /// No such file or directory.
    NoEnt = 2,
    /// I/O error.
    Io = 5,
    /// Bad file descriptor / handle.
    BadF = 9,
    /// Out of memory.
    NoMem = 12,
    /// Bad address (invalid user pointer or buffer range).
    Fault = 14,
    /// Invalid argument.
    Inval = 22,
    /// Value too large (e.g. cluster chain entry out of FAT range).
    Overflow = 75,
    /// Executable format error.
    NoExec = 8,
    /// No child process / process slot.
    Srch = 3,
}

impl Errno {
    /// Returns the errno as the negative `isize` a syscall handler returns.
    #[must_use]
    pub const fn as_errno(self) -> isize {
        -(self as isize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_negative() {
        assert_eq!(Errno::Fault.as_errno(), -14);
        assert_eq!(Errno::Inval.as_errno(), -22);
    }
}
