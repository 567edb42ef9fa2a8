//! Leveled logging glue.
//!
//! The serial sink itself is an external collaborator (the concrete UART
//! driver is out of scope per the purpose statement); what belongs here is
//! installing *some* sink into [`hadron_core::log`]'s print/log hooks during
//! early boot so every `hadron_core::{info,warn,error,debug,trace}!` call
//! site elsewhere in the tree has somewhere to go. [`init_early_serial`]
//! wires up a minimal COM1 writer using raw port I/O, grounded in the same
//! `Port<u8>` primitive the PCI and display drivers use.

use core::fmt::{self, Write as _};

use hadron_core::log::LogLevel;
use hadron_pci::port::Port;

const COM1_DATA: u16 = 0x3F8;
const COM1_LINE_STATUS: u16 = 0x3FD;
const LINE_STATUS_THR_EMPTY: u8 = 0x20;

struct Com1 {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl Com1 {
    const fn new() -> Self {
        Self { data: Port::new(COM1_DATA), line_status: Port::new(COM1_LINE_STATUS) }
    }

    fn write_byte(&self, byte: u8) {
        // SAFETY: COM1 is the standard debug UART; waiting on the line
        // status register's THR-empty bit before writing is the documented
        // 16550 protocol.
        unsafe {
            while self.line_status.read() & LINE_STATUS_THR_EMPTY == 0 {}
            self.data.write(byte);
        }
    }
}

impl fmt::Write for Com1 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

fn early_print(args: fmt::Arguments<'_>) {
    let _ = Com1::new().write_fmt(args);
}

fn early_log(level: LogLevel, target: &str, args: fmt::Arguments<'_>) {
    if level > crate::config::MAX_LOG_LEVEL {
        return;
    }
    let _ = writeln!(Com1::new(), "[{level}] {target}: {args}");
}

/// Installs the COM1-backed print/log hooks. Must run once, early in
/// [`crate::boot::kernel_init`], before any other subsystem logs.
pub fn init_early_serial() {
    hadron_core::log::set_print_fn(early_print);
    hadron_core::log::set_log_fn(early_log);
}

/// Writes one raw byte to COM1, translating `\n` to `\r\n`. Backs the
/// `SERIAL_PUTCHAR`/`SERIAL_PUTS` syscalls.
pub fn putchar(byte: u8) {
    let com1 = Com1::new();
    if byte == b'\n' {
        com1.write_byte(b'\r');
    }
    com1.write_byte(byte);
}
