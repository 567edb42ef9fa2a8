//! Limine boot stub for the Hadron kernel.
//!
//! This is the Limine-specific entry point: it declares the bootloader
//! requests, asserts the base revision is supported, reads the HHDM offset
//! out of the response, and calls
//! [`kernel_init`](hadron_kernel::boot::kernel_init). Everything else
//! (GDT/IDT/heap/xHCI/display/process bring-up) is
//! [`hadron_kernel::boot::kernel_init`]'s job, not this crate's — Limine's
//! own default page tables already cover this kernel's needs, so unlike a
//! bootstrap that owns its VMM, there is no page-table construction here.

#![no_std]
#![no_main]

mod requests;

use requests::{BASE_REVISION, HHDM_REQUEST};

/// Limine entry point. Called by the bootloader after it has loaded the
/// kernel image and populated the request statics in [`requests`]. Must
/// not return.
#[unsafe(no_mangle)]
extern "C" fn _start() -> ! {
    assert!(BASE_REVISION.is_supported(), "unsupported Limine base revision");

    let hhdm_offset = HHDM_REQUEST.get_response().expect("HHDM response not available").offset();

    hadron_kernel::boot::kernel_init(hhdm_offset)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    hadron_core::error!("panic: {info}");
    loop {
        core::hint::spin_loop();
    }
}
