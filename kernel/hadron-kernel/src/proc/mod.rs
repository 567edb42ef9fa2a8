//! Fixed-slot process table and cooperative scheduler.
//!
//! Single CPU, no preemption (see the concurrency model): the only
//! reschedule point is a syscall return. [`schedule`] is called once per
//! trap by `crate::syscall::syscall_trap` and decides which process's
//! parked [`TrapFrame`] to resume next. There is no per-process address
//! space (all processes share the kernel's linear mapping), so a process
//! is nothing more than a slot: an entry point, a private kernel scratch
//! stack for parking trap frames, and a private user-mode stack.

extern crate alloc;

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use hadron_core::sync::SpinLock;

#[cfg(target_os = "none")]
use crate::arch::x86_64::syscall::{self, TRAP_FRAME_SIZE, TrapFrame};
use crate::config::{MAX_PROCESS_SLOTS, USER_STACK_SIZE};

/// Size of a process's dedicated kernel scratch stack: just enough to
/// park one parked trap frame, rounded up to a 16-byte boundary with a
/// little headroom for the initial `mov rsp, [..]` landing.
///
/// Host test builds have no trap frame to size against (the arch module
/// is kernel-target-only); a fixed stand-in keeps [`ProcessSlot`] and
/// [`pick_next_ready`] testable without it.
#[cfg(target_os = "none")]
const KERNEL_STACK_SIZE: usize = TRAP_FRAME_SIZE.next_multiple_of(16) + 16;
#[cfg(not(target_os = "none"))]
const KERNEL_STACK_SIZE: usize = 128;

/// Lifecycle state of a [`ProcessSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    /// Slot is free and may be claimed by [`create_user`].
    Unused,
    /// Parked, eligible to be picked by [`pick_next_ready`].
    Ready,
    /// Currently the one process executing (at most one, single CPU).
    Running,
    /// Exited or faulted; its buffers have been freed.
    Dead,
}

/// One entry in the fixed-size process table.
struct ProcessSlot {
    state: ProcessState,
    /// Kernel-stack pointer at which the last trap parked this process's
    /// register frame, or (for a not-yet-run process) where its
    /// fabricated initial frame lives.
    saved_rsp: u64,
    /// This process's user-mode RSP.
    saved_user_rsp: u64,
    /// Entry point, kept for diagnostics; the live value actually used to
    /// resume execution lives in the parked frame's RCX slot.
    entry: u64,
    kernel_stack: Option<Box<[u8]>>,
    user_stack: Option<Box<[u8]>>,
}

impl ProcessSlot {
    const fn empty() -> Self {
        Self {
            state: ProcessState::Unused,
            saved_rsp: 0,
            saved_user_rsp: 0,
            entry: 0,
            kernel_stack: None,
            user_stack: None,
        }
    }

    fn kernel_stack_top(&self) -> u64 {
        let stack = self.kernel_stack.as_ref().expect("slot has no kernel stack");
        stack.as_ptr() as u64 + stack.len() as u64
    }
}

/// Errors the scheduler and process table can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every slot is in use; [`create_user`] cannot admit another process.
    SlotTableFull,
    /// No slot is `Ready` or `Running`; there is nothing left to schedule.
    /// Fatal — the caller has no process left to hand the CPU to.
    NoRunnableProcess,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotTableFull => write!(f, "process slot table is full"),
            Self::NoRunnableProcess => write!(f, "no runnable process remains"),
        }
    }
}

const EMPTY_SLOT: ProcessSlot = ProcessSlot::empty();

static PROCESS_TABLE: SpinLock<[ProcessSlot; MAX_PROCESS_SLOTS]> =
    SpinLock::new([EMPTY_SLOT; MAX_PROCESS_SLOTS]);

/// Index of the slot currently `Running`.
static CURRENT: AtomicUsize = AtomicUsize::new(0);

fn alloc_stack(len: usize) -> Box<[u8]> {
    alloc::vec![0u8; len].into_boxed_slice()
}

/// Writes a fabricated [`TrapFrame`] at the top of `kernel_stack`, as if
/// `entry` had just trapped in, and returns its address.
#[cfg(target_os = "none")]
fn fabricate_frame(kernel_stack: &mut [u8], entry: u64) -> u64 {
    let frame_addr =
        kernel_stack.as_ptr() as u64 + kernel_stack.len() as u64 - TRAP_FRAME_SIZE as u64;
    // SAFETY: frame_addr falls within kernel_stack (computed from its own
    // base and length) and is suitably aligned for TrapFrame (u64 fields,
    // byte-array base is at least 8-aligned from the global allocator).
    unsafe {
        core::ptr::write(frame_addr as *mut TrapFrame, TrapFrame::fabricate(entry));
    }
    frame_addr
}

/// Registers the kernel's first user-mode process and jumps to it. Never
/// returns.
///
/// `entry` and `user_stack_top` describe a binary the boot sequence has
/// already loaded and mapped (e.g. via the ELF loader); this function
/// only wires up the scheduling bookkeeping and performs the initial
/// transition to user mode.
///
/// # Panics
///
/// Panics if called more than once (slot 0 would no longer be `Unused`).
#[cfg(target_os = "none")]
pub fn register_boot_process(entry: u64, user_stack_top: u64) -> ! {
    let mut table = PROCESS_TABLE.lock();
    let slot = &mut table[0];
    assert!(
        slot.state == ProcessState::Unused,
        "register_boot_process called after another process exists"
    );

    let mut kernel_stack = alloc_stack(KERNEL_STACK_SIZE);
    let frame_addr = fabricate_frame(&mut kernel_stack, entry);
    let kernel_stack_top = kernel_stack.as_ptr() as u64 + kernel_stack.len() as u64;

    slot.state = ProcessState::Running;
    slot.saved_rsp = frame_addr;
    slot.saved_user_rsp = user_stack_top;
    slot.entry = entry;
    slot.kernel_stack = Some(kernel_stack);
    slot.user_stack = None;
    drop(table);

    CURRENT.store(0, Ordering::Release);
    syscall::set_current_kernel_stack_top(kernel_stack_top);
    syscall::set_resume_user_rsp(user_stack_top);

    hadron_core::info!("proc: launching boot process, entry={entry:#x}");

    // SAFETY: frame_addr was just written by fabricate_frame above, and
    // the kernel/user RSP globals were set immediately before this call.
    unsafe { syscall::resume_process(frame_addr) }
}

/// Creates a new user process ready to run, with its own
/// [`crate::config::USER_STACK_SIZE`]-byte user stack.
///
/// Returns the slot index (used as a process handle) on success.
#[cfg(target_os = "none")]
pub fn create_user(entry: u64) -> Result<usize, SchedError> {
    let mut table = PROCESS_TABLE.lock();
    let index = table
        .iter()
        .position(|s| s.state == ProcessState::Unused)
        .ok_or(SchedError::SlotTableFull)?;

    let user_stack = alloc_stack(USER_STACK_SIZE);
    let user_stack_top = user_stack.as_ptr() as u64 + user_stack.len() as u64;
    let mut kernel_stack = alloc_stack(KERNEL_STACK_SIZE);
    let frame_addr = fabricate_frame(&mut kernel_stack, entry);

    let slot = &mut table[index];
    slot.state = ProcessState::Ready;
    slot.saved_rsp = frame_addr;
    slot.saved_user_rsp = user_stack_top;
    slot.entry = entry;
    slot.kernel_stack = Some(kernel_stack);
    slot.user_stack = Some(user_stack);

    hadron_core::debug!("proc: created slot {index} entry={entry:#x}");
    Ok(index)
}

/// Scans slots in a circular order starting just after `current`, looking
/// for the first `Ready` one. Skips `Unused`/`Dead`/`Running` slots.
fn pick_next_ready(table: &[ProcessSlot; MAX_PROCESS_SLOTS], current: usize) -> Option<usize> {
    (1..=MAX_PROCESS_SLOTS)
        .map(|offset| (current + offset) % MAX_PROCESS_SLOTS)
        .find(|&i| table[i].state == ProcessState::Ready)
}

/// The scheduling contract invoked once per syscall trap.
///
/// Parks the currently running process's `saved_rsp`/`saved_user_rsp`
/// (`frame_addr`/`user_rsp`, as captured by the trap stub). If
/// `request_switch` is set (a yielding or blocking call) the current
/// slot is marked `Ready` and [`pick_next_ready`] selects the next
/// process; otherwise the same process keeps running. A process that
/// has already been marked `Dead` by [`exit_current`] is always switched
/// away from regardless of `request_switch`.
///
/// Programs the arch-level "where does the next trap land, what user RSP
/// do we resume with" globals for whichever process is chosen, and
/// returns its `saved_rsp` for
/// [`crate::arch::x86_64::syscall::resume_process`] to resume from.
///
/// # Panics
///
/// Panics if no process is left to run ([`SchedError::NoRunnableProcess`])
/// — there is no recovery path for an empty process table.
#[cfg(target_os = "none")]
pub fn schedule(frame_addr: u64, user_rsp: u64, request_switch: bool) -> u64 {
    let mut table = PROCESS_TABLE.lock();
    let current = CURRENT.load(Ordering::Acquire);

    if table[current].state == ProcessState::Running {
        table[current].saved_rsp = frame_addr;
        table[current].saved_user_rsp = user_rsp;
        if request_switch {
            table[current].state = ProcessState::Ready;
        }
    }

    let next = if table[current].state == ProcessState::Running {
        current
    } else {
        pick_next_ready(&table, current).unwrap_or_else(|| panic!("{}", SchedError::NoRunnableProcess))
    };

    table[next].state = ProcessState::Running;
    CURRENT.store(next, Ordering::Release);

    let kernel_stack_top = table[next].kernel_stack_top();
    let saved_rsp = table[next].saved_rsp;
    let saved_user_rsp = table[next].saved_user_rsp;
    drop(table);

    syscall::set_current_kernel_stack_top(kernel_stack_top);
    syscall::set_resume_user_rsp(saved_user_rsp);
    saved_rsp
}

/// Marks the currently running process `Dead` and frees its stacks. Must
/// be followed by a call to [`schedule`] with `request_switch = true` to
/// hand the CPU to a different process.
pub fn exit_current() {
    let mut table = PROCESS_TABLE.lock();
    let current = CURRENT.load(Ordering::Acquire);
    let slot = &mut table[current];
    slot.state = ProcessState::Dead;
    slot.kernel_stack = None;
    slot.user_stack = None;
}

/// Returns the slot index of the currently running process.
pub fn current() -> usize {
    CURRENT.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_states(
        states: [ProcessState; MAX_PROCESS_SLOTS],
    ) -> [ProcessSlot; MAX_PROCESS_SLOTS] {
        states.map(|state| {
            let mut slot = ProcessSlot::empty();
            slot.state = state;
            slot
        })
    }

    #[test]
    fn pick_next_ready_scans_circularly_from_current() {
        use ProcessState::{Ready, Running, Unused};
        let mut states = [Unused; MAX_PROCESS_SLOTS];
        states[0] = Running;
        states[3] = Ready;
        states[7] = Ready;
        let table = table_with_states(states);

        assert_eq!(pick_next_ready(&table, 0), Some(3));
        assert_eq!(pick_next_ready(&table, 3), Some(7));
        // Wraps around past the end back to index 3.
        assert_eq!(pick_next_ready(&table, 7), Some(3));
    }

    #[test]
    fn pick_next_ready_skips_dead_and_unused() {
        use ProcessState::{Dead, Ready, Running, Unused};
        let mut states = [Unused; MAX_PROCESS_SLOTS];
        states[0] = Running;
        states[1] = Dead;
        states[2] = Unused;
        states[5] = Ready;
        let table = table_with_states(states);

        assert_eq!(pick_next_ready(&table, 0), Some(5));
    }

    #[test]
    fn pick_next_ready_returns_none_when_nothing_ready() {
        use ProcessState::{Running, Unused};
        let mut states = [Unused; MAX_PROCESS_SLOTS];
        states[0] = Running;
        let table = table_with_states(states);

        assert_eq!(pick_next_ready(&table, 0), None);
    }

    #[test]
    fn sched_error_display_is_human_readable() {
        extern crate std;
        use std::string::ToString;
        assert_eq!(
            SchedError::SlotTableFull.to_string(),
            "process slot table is full"
        );
        assert_eq!(
            SchedError::NoRunnableProcess.to_string(),
            "no runnable process remains"
        );
    }
}
