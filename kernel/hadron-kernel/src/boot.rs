//! Kernel entry point.
//!
//! [`kernel_init`] is the only thing the bootstrap stub needs to call once
//! it has handed off to long mode and read the HHDM offset from Limine's
//! response. Paging itself (building/identity-mapping page tables) is
//! assumed complete before this runs — Limine's own default mappings cover
//! it — so there is no page-table construction here, unlike a kernel that
//! owns its VMM.

use hadron_drivers::xhci::XhciController;

use crate::config::{KernelConfig, PROCESS_IMAGE_MIN_VADDR, USER_STACK_SIZE};

/// A 9-byte infinite loop: `mov eax, 4` (`PROCESS_YIELD`), `syscall`,
/// `jmp` back to the start. Copied into the process image window as the
/// initial process when no `/init` binary can be loaded off a mounted
/// volume, so there is always something runnable to hand off to.
const FALLBACK_IDLE_PROGRAM: [u8; 9] = [
    0xB8, 0x04, 0x00, 0x00, 0x00, // mov eax, 4
    0x0F, 0x05, // syscall
    0xEB, 0xF7, // jmp $-9
];

/// Loads `/init` off the mounted volume, falling back to
/// [`FALLBACK_IDLE_PROGRAM`] if nothing is mounted, the file is missing, or
/// it fails to parse as an ELF64 executable targeting the process image
/// window. Returns the entry point to resume at.
fn load_initial_process() -> u64 {
    if let Some(entry) = crate::syscall::load_boot_elf_image("/init") {
        hadron_core::info!("boot: loaded /init, entry={entry:#x}");
        return entry;
    }

    hadron_core::warn!("boot: no /init found, falling back to idle program");
    // SAFETY: PROCESS_IMAGE_MIN_VADDR falls within the reserved process
    // image window, which this trimmed kernel carves out of its own linear
    // mapping (no per-process address space; see crate::proc's module
    // documentation).
    unsafe {
        core::ptr::copy_nonoverlapping(
            FALLBACK_IDLE_PROGRAM.as_ptr(),
            PROCESS_IMAGE_MIN_VADDR as *mut u8,
            FALLBACK_IDLE_PROGRAM.len(),
        );
    }
    PROCESS_IMAGE_MIN_VADDR
}

/// Enumerates PCI, binds an xHCI controller if one is present, and wires up
/// the primary HID mouse. Logs and continues if no controller is found —
/// input is best-effort, not required to boot.
fn init_input(hhdm_offset: u64) {
    let devices = hadron_pci::enumerate();
    let Some(xhci_dev) = hadron_pci::find_xhci(&devices) else {
        hadron_core::info!("boot: no xHCI controller found");
        return;
    };

    xhci_dev.enable_memory_and_bus_master();
    match XhciController::init(xhci_dev, hhdm_offset, &crate::time::CLOCK) {
        Ok(controller) => {
            hadron_core::info!("boot: xHCI controller initialized");
            crate::syscall::bind_mouse_controller(controller);
        }
        Err(e) => hadron_core::error!("boot: xHCI init failed: {e:?}"),
    }
}

/// Selects a display driver over PCI, if one of the drivers this kernel
/// ships (currently Bochs/QEMU VGA) is present. Logs and continues
/// otherwise — drawing syscalls simply report failure until one is found.
fn init_display(hhdm_offset: u64) {
    hadron_drivers::display::set_hhdm_offset(hhdm_offset);
    if hadron_drivers::display::registry().select() {
        hadron_core::info!("boot: display driver selected");
    } else {
        hadron_core::warn!("boot: no display driver found");
    }
}

/// Kernel entry point, called once by the bootstrap stub after it has read
/// the HHDM offset out of Limine's response.
///
/// Brings up the GDT/IDT/`syscall` MSRs, the heap, and the TSC clock, then
/// probes for an xHCI controller and a display adapter over PCI (both
/// best-effort), loads the initial process, and hands off to it. Never
/// returns.
pub fn kernel_init(hhdm_offset: u64) -> ! {
    crate::log::init_early_serial();
    let config = KernelConfig::new(hhdm_offset);
    hadron_core::info!("Hadron kernel booting, hhdm_offset={:#x}", config.hhdm_offset);

    // SAFETY: called once, here, before interrupts are enabled or any
    // syscall can arrive.
    unsafe { crate::arch::cpu_init() };

    crate::heap::init();
    crate::time::calibrate();

    init_input(config.hhdm_offset);
    init_display(config.hhdm_offset);

    // The disk driver (AHCI/virtio-blk) is an external collaborator this
    // kernel's scope stops short of; nothing ever calls
    // crate::syscall::mount_filesystem, so load_initial_process always
    // falls back to FALLBACK_IDLE_PROGRAM unless a future boot stub mounts
    // one first.
    let entry = load_initial_process();

    let user_stack = alloc::vec![0u8; USER_STACK_SIZE].into_boxed_slice();
    let user_stack_top = user_stack.as_ptr() as u64 + user_stack.len() as u64;
    // The boot process's slot never releases this stack, so it must outlive
    // the process: register_boot_process takes only the top-of-stack value,
    // not ownership (see its own documentation).
    alloc::boxed::Box::leak(user_stack);

    crate::proc::register_boot_process(entry, user_stack_top)
}
