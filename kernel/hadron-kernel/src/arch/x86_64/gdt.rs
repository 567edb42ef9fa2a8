//! GDT initialization, static instance, and TSS setup.
//!
//! No `LazyLock` exists in this tree's core crate, and there is no SMP or
//! per-CPU indirection to hide behind one: the GDT and TSS are plain
//! `static`s built once by [`init`], guarded by [`INITIALIZED`] instead of
//! lazy-initialized on first access.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use super::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector, TaskStateSegment};

/// Double-fault handler stack size (16 KiB).
const DOUBLE_FAULT_STACK_SIZE: usize = 16384;

/// IST index used for the double-fault handler (IST1, 1-indexed).
pub const DOUBLE_FAULT_IST_INDEX: u8 = 1;

/// Dedicated stack for the double-fault handler.
#[repr(align(16))]
#[allow(dead_code)] // Used only for its address; the array itself backs the double-fault stack.
struct AlignedStack([u8; DOUBLE_FAULT_STACK_SIZE]);

static DOUBLE_FAULT_STACK: AlignedStack = AlignedStack([0; DOUBLE_FAULT_STACK_SIZE]);

/// Wrapper around `UnsafeCell<T>` that is `Sync`.
///
/// The TSS is only mutated by `set_tss_rsp0` with interrupts disabled, so
/// there is no data race from software. The CPU reads it on ring transitions
/// but does not race with writes between interrupt entry and IRET.
#[repr(transparent)]
struct SyncUnsafeCell<T>(UnsafeCell<T>);

// SAFETY: Access is synchronized by disabling interrupts before mutation.
// Only `set_tss_rsp0` writes to the inner value, and it runs with interrupts
// disabled during context switches.
unsafe impl<T> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    const fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }

    fn get(&self) -> *mut T {
        self.0.get()
    }
}

/// Static Task State Segment, wrapped in `SyncUnsafeCell` to allow mutation
/// of RSP0 during context switches without UB (the CPU reads the TSS
/// directly from memory). Built in place by [`init`]; zeroed until then.
static TSS: SyncUnsafeCell<TaskStateSegment> = SyncUnsafeCell::new(TaskStateSegment::new());

/// Cached segment selectors from GDT initialization.
pub struct Selectors {
    /// Kernel code segment selector.
    pub kernel_code: SegmentSelector,
    /// Kernel data segment selector.
    pub kernel_data: SegmentSelector,
    /// User code segment selector.
    pub user_code: SegmentSelector,
    /// User data segment selector.
    pub user_data: SegmentSelector,
    /// TSS selector.
    pub tss: SegmentSelector,
}

static GDT_TABLE: GlobalDescriptorTable<8> = GlobalDescriptorTable::new();
static mut SELECTORS: Option<Selectors> = None;
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the GDT, reloads all segment registers, and loads the TSS.
///
/// # Safety
///
/// Must be called exactly once during early kernel initialization, before
/// interrupts are enabled.
pub unsafe fn init() {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }

    // SAFETY: the IST stack is 'static; only the BSP runs this (no SMP).
    unsafe {
        (*TSS.get()).interrupt_stack_table[(DOUBLE_FAULT_IST_INDEX - 1) as usize] = {
            let stack_start = &DOUBLE_FAULT_STACK as *const _ as u64;
            stack_start + DOUBLE_FAULT_STACK_SIZE as u64
        };
    }

    // SAFETY: `GDT_TABLE` is `'static`; the mutable alias is only used here,
    // before `init` returns, and the table is read-only for the rest of
    // boot (`load` requires `&'static self`).
    let gdt: &'static mut GlobalDescriptorTable<8> =
        unsafe { &mut *(core::ptr::addr_of!(GDT_TABLE) as *mut GlobalDescriptorTable<8>) };

    let kernel_code = gdt.append(Descriptor::kernel_code_segment());
    let kernel_data = gdt.append(Descriptor::kernel_data_segment());
    // user_data before user_code: SYSRET requires SS at STAR[63:48]+8, CS at STAR[63:48]+16.
    let user_data = gdt.append(Descriptor::user_data_segment());
    let user_code = gdt.append(Descriptor::user_code_segment());
    // SAFETY: the TSS is fully initialized above; only its address is read here.
    let tss = gdt.append(Descriptor::tss_segment(unsafe { &*TSS.get() }));

    // SAFETY: single BSP writer, happens-before every later read via `INITIALIZED`.
    #[allow(static_mut_refs)]
    unsafe {
        SELECTORS = Some(Selectors { kernel_code, kernel_data, user_code, user_data, tss });
    }
    let selectors = selectors_ref();

    // SAFETY: the GDT contains valid descriptors built above. Segment
    // register reloads match the GDT layout (kernel_code in CS, kernel_data
    // in DS/SS, null in ES/FS/GS, TSS in TR).
    unsafe {
        gdt.load();
        reload_segments(selectors);
        super::instructions::tables::ltr(selectors.tss);
    }

    hadron_core::debug!("gdt: initialized");
}

/// Reloads CS via a far return (the only way to change CS without an
/// interrupt/call) and DS/SS/ES/FS/GS directly.
///
/// # Safety
///
/// `sel` must name valid, just-loaded GDT entries.
unsafe fn reload_segments(sel: &Selectors) {
    unsafe {
        core::arch::asm!(
            "push {code_sel}",
            "lea {tmp}, [2f + rip]",
            "push {tmp}",
            "retfq",
            "2:",
            code_sel = in(reg) u64::from(sel.kernel_code.as_u16()),
            tmp = lateout(reg) _,
        );
        let data = sel.kernel_data.as_u16();
        let zero: u16 = 0;
        core::arch::asm!("mov ds, {0:x}", in(reg) data);
        core::arch::asm!("mov ss, {0:x}", in(reg) data);
        core::arch::asm!("mov es, {0:x}", in(reg) zero);
        core::arch::asm!("mov fs, {0:x}", in(reg) zero);
        core::arch::asm!("mov gs, {0:x}", in(reg) zero);
    }
}

fn selectors_ref() -> &'static Selectors {
    // SAFETY: written exactly once by `init` before any caller can observe
    // `INITIALIZED == true`.
    #[allow(static_mut_refs)]
    unsafe {
        SELECTORS.as_ref().expect("gdt::init must run before selectors() is used")
    }
}

/// Updates RSP0 in the TSS (ring 3 → ring 0 stack pointer).
///
/// The CPU reads this value from memory on every interrupt/exception from
/// ring 3, so writing to it takes effect immediately (no TR reload needed).
///
/// # Safety
///
/// `rsp` must point to the top of a valid, mapped kernel stack, and the
/// caller must hold off a concurrent read (disable interrupts around the
/// call during a context switch).
pub unsafe fn set_tss_rsp0(rsp: u64) {
    unsafe {
        (*TSS.get()).privilege_stack_table[0] = rsp;
    }
}

/// Returns a reference to the cached segment selectors.
pub fn selectors() -> &'static Selectors {
    selectors_ref()
}
