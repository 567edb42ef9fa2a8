//! SYSCALL/SYSRET mechanism: MSR programming and the trap entry/exit stubs.
//!
//! There is no SMP here (see the concurrency model), so the "current
//! process" bookkeeping the teacher keeps behind per-CPU GS-relative slots
//! collapses to two plain globals: where the next trap from the running
//! process should park its frame, and what user RSP to restore on the way
//! back out. [`crate::proc`] updates both before resuming a process.

use core::sync::atomic::{AtomicU64, Ordering};

const IA32_EFER: u32 = 0xC000_0080;
const MSR_STAR: u32 = 0xC000_0081;
const MSR_LSTAR: u32 = 0xC000_0082;
const MSR_SFMASK: u32 = 0xC000_0084;

const EFER_SCE: u64 = 1 << 0;
/// Mask IF and DF on syscall entry; the handler runs with interrupts off
/// (see the concurrency model) until it deliberately re-enables them.
const SFMASK_VALUE: u64 = 0x600;

/// # Safety
///
/// `msr` must name a valid, readable MSR on this CPU.
unsafe fn rdmsr(msr: u32) -> u64 {
    let (lo, hi): (u32, u32);
    unsafe {
        core::arch::asm!("rdmsr", in("ecx") msr, out("eax") lo, out("edx") hi, options(nomem, nostack));
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// # Safety
///
/// `msr` must name a valid, writable MSR on this CPU, and `value` must be
/// a value that MSR accepts.
unsafe fn wrmsr(msr: u32, value: u64) {
    let lo = value as u32;
    let hi = (value >> 32) as u32;
    unsafe {
        core::arch::asm!("wrmsr", in("ecx") msr, in("eax") lo, in("edx") hi, options(nomem, nostack));
    }
}

/// The general-purpose register frame a syscall trap parks on the kernel
/// stack. Field order matches the push sequence in [`syscall_entry`]
/// ascending from `rsp` (`rax` is pushed last, so it sits at offset 0).
///
/// The dispatcher references `rax` (syscall number in, return value out),
/// `rdi`/`rsi`/`rdx`/`r10` (arguments), and `rcx`/`r11` (return RIP/RFLAGS
/// under `sysretq`) by name; the remaining fields are callee-saved
/// registers preserved across the trap untouched.
#[repr(C)]
pub struct TrapFrame {
    pub rax: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub r10: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub rcx: u64,
}

impl TrapFrame {
    /// A frame as if the process had just trapped in with `rcx` (return
    /// RIP) set to `entry` and `r11` (return RFLAGS) set to `0x202`
    /// (interrupts enabled, reserved bit 1 set). Used by
    /// [`crate::proc::create_user`] to fabricate a process's first entry.
    #[must_use]
    pub const fn fabricate(entry: u64) -> Self {
        Self {
            rax: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            r10: 0,
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            r11: 0x202,
            rcx: entry,
        }
    }
}

/// Size in bytes of the region [`syscall_entry`] pushes per trap.
pub const TRAP_FRAME_SIZE: usize = core::mem::size_of::<TrapFrame>();

/// Top of the kernel scratch stack the *currently running* process's next
/// trap should push its frame onto. Updated by [`crate::proc::schedule`]
/// before every resume.
static CURRENT_KERNEL_RSP: AtomicU64 = AtomicU64::new(0);

/// The user RSP [`resume_process`] restores before `sysretq`/`iretq`.
static RESUME_USER_RSP: AtomicU64 = AtomicU64::new(0);

/// Sets the kernel-stack top the next trap for the running process will
/// park its frame at.
pub fn set_current_kernel_stack_top(top: u64) {
    CURRENT_KERNEL_RSP.store(top, Ordering::Release);
}

/// Sets the user RSP that the next `resume_process` call restores.
pub fn set_resume_user_rsp(rsp: u64) {
    RESUME_USER_RSP.store(rsp, Ordering::Release);
}

/// Programs STAR/LSTAR/SFMASK and sets `EFER.SCE`. Must run once during
/// early boot, after the GDT is loaded (STAR encodes the kernel/user
/// segment bases by offset into it).
///
/// # Safety
///
/// Must be called exactly once, after [`super::gdt::init`] and before any
/// user-mode code can execute a `syscall` instruction.
pub unsafe fn init() {
    unsafe {
        let efer = rdmsr(IA32_EFER);
        wrmsr(IA32_EFER, efer | EFER_SCE);

        // STAR[47:32] = kernel CS (kernel SS = +8); STAR[63:48] = user CS
        // base for SYSRET (user SS = base+8, user CS = base+16), per the
        // GDT layout gdt::init lays down (kernel_code, kernel_data,
        // user_data, user_code).
        let kernel_code = u64::from(super::gdt::selectors().kernel_code.as_u16());
        let user_data = u64::from(super::gdt::selectors().user_data.as_u16());
        let star = (kernel_code << 32) | ((user_data - 8) << 48);
        wrmsr(MSR_STAR, star);

        wrmsr(MSR_LSTAR, syscall_entry as usize as u64);
        wrmsr(MSR_SFMASK, SFMASK_VALUE);
    }

    hadron_core::debug!("syscall: SYSCALL/SYSRET initialized");
}

unsafe extern "C" {
    /// Defined in `crate::syscall`: decodes `frame`, performs the call,
    /// writes the return value into `frame.rax`, asks the scheduler for
    /// the next process to resume, and returns its saved RSP.
    fn syscall_trap(frame: *mut TrapFrame, user_rsp: u64) -> u64;
}

/// `syscall` lands here. Parks the caller's general-purpose registers on
/// the current process's kernel scratch stack, dispatches the call, and
/// tail-calls [`resume_process`] with whichever process the scheduler
/// picked next (possibly, but not necessarily, the same one).
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "mov r8, rsp",
        "mov rsp, [{cur_kernel_rsp}]",
        "push rcx",
        "push r11",
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "push r10",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rax",
        "mov rdi, rsp",
        "mov rsi, r8",
        "call {dispatch}",
        "mov rdi, rax",
        "jmp {resume}",
        cur_kernel_rsp = sym CURRENT_KERNEL_RSP,
        dispatch = sym syscall_trap,
        resume = sym resume_process,
    );
}

/// Resumes a process from a parked [`TrapFrame`] at `saved_rsp`, restoring
/// [`RESUME_USER_RSP`] as its user stack. Branches on the sign bit of the
/// restored RIP (RCX): negative (bit 63 set) means a kernel-mode caller,
/// handled via `iretq`; positive means ring 3, handled via the faster
/// `sysretq`. Used both as the tail of [`syscall_entry`] and directly by
/// [`crate::proc`] to launch a process for the first time.
///
/// # Safety
///
/// `saved_rsp` must point at a valid [`TrapFrame`] on a mapped stack, and
/// [`RESUME_USER_RSP`] must already hold the user RSP to restore.
#[unsafe(naked)]
pub unsafe extern "C" fn resume_process(saved_rsp: u64) -> ! {
    core::arch::naked_asm!(
        "mov rsp, rdi",
        "pop rax",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop r10",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "pop r11",
        "pop rcx",
        "test rcx, rcx",
        "js 2f",
        "mov rsp, [{resume_user_rsp}]",
        "sysretq",
        "2:",
        "mov r10, [{resume_user_rsp}]",
        "push 0x10",
        "push r10",
        "push r11",
        "push 0x08",
        "push rcx",
        "iretq",
        resume_user_rsp = sym RESUME_USER_RSP,
    );
}
