//! IDT setup: a minimal set of CPU exception handlers.
//!
//! There is no hardware-interrupt path in this kernel (no SMP, no timer
//! preemption — see the concurrency model): the only vectors that can ever
//! fire are CPU exceptions. Handlers here are a safety backstop, not part
//! of the specified behavior: each logs the fault and halts, since no
//! recovery path is specified for a fault raised by kernel or user code.

use core::sync::atomic::{AtomicBool, Ordering};

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use super::structures::gdt::DescriptorTablePointer;

const PRESENT_INTERRUPT_GATE: u8 = 0x8E;
const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// A single IDT gate descriptor (64-bit interrupt gate).
#[derive(Clone, Copy)]
#[repr(C)]
struct Entry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl Entry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, ist: 0, type_attr: 0, offset_mid: 0, offset_high: 0, reserved: 0 }
    }

    fn set_handler(&mut self, handler: unsafe extern "C" fn() -> !, ist: u8) {
        let addr = handler as u64;
        self.offset_low = addr as u16;
        self.selector = KERNEL_CODE_SELECTOR;
        self.ist = ist;
        self.type_attr = PRESENT_INTERRUPT_GATE;
        self.offset_mid = (addr >> 16) as u16;
        self.offset_high = (addr >> 32) as u32;
        self.reserved = 0;
    }
}

/// 256-entry Interrupt Descriptor Table.
#[repr(C, align(16))]
struct InterruptDescriptorTable {
    entries: [Entry; 256],
}

static mut IDT: InterruptDescriptorTable = InterruptDescriptorTable { entries: [Entry::missing(); 256] };
static INITIALIZED: AtomicBool = AtomicBool::new(false);

macro_rules! exception_stub_noerr {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() -> ! {
            core::arch::naked_asm!("push 0", "push {v}", "jmp {common}", v = const $vector, common = sym common_entry);
        }
    };
}

macro_rules! exception_stub_err {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() -> ! {
            core::arch::naked_asm!("push {v}", "jmp {common}", v = const $vector, common = sym common_entry);
        }
    };
}

exception_stub_noerr!(divide_error_stub, 0);
exception_stub_noerr!(invalid_opcode_stub, 6);
exception_stub_err!(double_fault_stub, 8);
exception_stub_err!(general_protection_stub, 13);
exception_stub_err!(page_fault_stub, 14);

#[unsafe(naked)]
unsafe extern "C" fn common_entry() -> ! {
    // Stack at entry: [vector][error_code][RIP][CS][RFLAGS][RSP][SS].
    core::arch::naked_asm!(
        "mov rdi, [rsp]",
        "mov rsi, [rsp + 8]",
        "mov rdx, [rsp + 16]",
        "call {handler}",
        handler = sym exception_handler,
    );
}

extern "C" fn exception_handler(vector: u64, error_code: u64, fault_rip: u64) -> ! {
    hadron_core::error!(
        "unhandled exception vector={vector} error_code={error_code:#x} rip={fault_rip:#x}"
    );
    loop {
        super::instructions::interrupts::hlt();
    }
}

/// Builds and loads the IDT. Must run after [`super::gdt::init`] (CS must
/// already be valid) and before interrupts are enabled.
///
/// # Safety
///
/// Must be called exactly once during early kernel initialization.
pub unsafe fn init() {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }

    // SAFETY: single BSP writer during early boot, before any fault can fire.
    #[allow(static_mut_refs)]
    unsafe {
        IDT.entries[0].set_handler(divide_error_stub, 0);
        IDT.entries[6].set_handler(invalid_opcode_stub, 0);
        IDT.entries[8].set_handler(double_fault_stub, DOUBLE_FAULT_IST_INDEX);
        IDT.entries[13].set_handler(general_protection_stub, 0);
        IDT.entries[14].set_handler(page_fault_stub, 0);

        let ptr = DescriptorTablePointer {
            limit: (core::mem::size_of::<InterruptDescriptorTable>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u64,
        };
        super::instructions::tables::lidt(&ptr);
    }

    hadron_core::debug!("idt: initialized");
}
