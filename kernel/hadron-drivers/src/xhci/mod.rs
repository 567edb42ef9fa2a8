//! xHCI (USB 3) host controller driver.
//!
//! Drives one xHCI controller end to end: BIOS handoff, reset, DCBAA and
//! ring setup, port enumeration, EP0/bulk/interrupt transfers, and the
//! class-specific bring-up MSC and HID devices need. No teacher module in
//! this codebase implements a USB host controller; the register sequencing
//! below follows the xHCI 1.1 specification sections the distilled
//! specification cites, and the MMIO-access and locking idioms follow this
//! crate's AHCI driver and `hadron_core::sync`.

pub mod device;
pub mod dma;
pub mod regs;
pub mod ring;

use core::ptr;
use core::time::Duration;

use hadron_core::addr::VirtAddr;
use hadron_pci::{PciBar, PciDeviceInfo};

use device::{DeviceSlot, Endpoint, EndpointType};
use dma::DmaBuffer;
use ring::{
    COMPLETION_SHORT_PACKET, COMPLETION_SUCCESS, EventRing, ProducerRing, Trb,
    TRB_TYPE_COMMAND_COMPLETION_EVENT, TRB_TYPE_TRANSFER_EVENT, dci,
};

/// Maximum device slots this driver tracks regardless of what the
/// controller reports in HCSPARAMS1.
pub const MAX_SLOTS: usize = 32;
/// Command and event ring sizes (boot-configurable in principle; fixed
/// here to the spec's defaults).
pub const COMMAND_RING_SIZE: usize = 256;
/// Event ring size.
pub const EVENT_RING_SIZE: usize = 256;

/// Errors the xHCI driver can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XhciError {
    /// A spin-wait for a hardware condition exceeded its budget.
    Timeout,
    /// A posted command's completion code was not
    /// [`ring::COMPLETION_SUCCESS`].
    CommandFailed(u8),
    /// A transfer's completion code was neither success nor short packet.
    TransferFailed(u8),
    /// No free device slot was available (device table and hardware slot
    /// count both exhausted).
    NoSlotsFree,
    /// The port reported a USB speed this driver does not implement EP0
    /// sizing for.
    UnsupportedSpeed,
}

impl core::fmt::Display for XhciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "xhci: timed out waiting for hardware"),
            Self::CommandFailed(code) => write!(f, "xhci: command failed, completion code {code}"),
            Self::TransferFailed(code) => write!(f, "xhci: transfer failed, completion code {code}"),
            Self::NoSlotsFree => write!(f, "xhci: no device slots free"),
            Self::UnsupportedSpeed => write!(f, "xhci: unsupported port speed"),
        }
    }
}

/// A monotonic millisecond clock, injected so this driver never depends on
/// a concrete timer implementation.
pub trait MonotonicClock {
    /// Milliseconds since an arbitrary fixed epoch.
    fn now_ms(&self) -> u64;
    /// Busy-waits for approximately `d`.
    fn udelay(&self, d: Duration);
}

unsafe fn read32(base: VirtAddr, offset: u64) -> u32 {
    let addr = (base.as_u64() + offset) as *const u32;
    unsafe { ptr::read_volatile(addr) }
}

unsafe fn write32(base: VirtAddr, offset: u64, value: u32) {
    let addr = (base.as_u64() + offset) as *mut u32;
    unsafe { ptr::write_volatile(addr, value) };
}

unsafe fn write64(base: VirtAddr, offset: u64, value: u64) {
    unsafe {
        write32(base, offset, value as u32);
        write32(base, offset + 4, (value >> 32) as u32);
    }
}

/// The xHCI host controller singleton.
pub struct XhciController<'c> {
    clock: &'c dyn MonotonicClock,
    mmio: VirtAddr,
    op: VirtAddr,
    db: VirtAddr,
    rt: VirtAddr,
    max_slots: u8,
    max_ports: u8,
    dcbaa: DmaBuffer,
    _scratchpad_array: Option<DmaBuffer>,
    _scratchpad_pages: alloc::vec::Vec<DmaBuffer>,
    cmd_ring: ProducerRing,
    event_ring: EventRing,
    _erst: DmaBuffer,
    device_contexts: alloc::vec::Vec<Option<DmaBuffer>>,
    input_contexts: alloc::vec::Vec<Option<DmaBuffer>>,
    ep0_rings: alloc::vec::Vec<Option<ProducerRing>>,
    transfer_rings: alloc::vec::Vec<alloc::vec::Vec<(u8, ProducerRing)>>,
    slots: alloc::vec::Vec<DeviceSlot>,
}

const DEVICE_CONTEXT_SIZE: usize = 1024;
const INPUT_CONTEXT_SIZE: usize = 1056;

impl<'c> XhciController<'c> {
    /// Discovers, resets, and brings up the xHCI controller described by
    /// `pci`. On return the controller is running and every port with
    /// `CCS` set has been enumerated.
    ///
    /// # Errors
    /// Returns [`XhciError::Timeout`] if the controller fails to come out
    /// of reset or to report `RUN` within budget.
    pub fn init(pci: &PciDeviceInfo, hhdm_offset: u64, clock: &'c dyn MonotonicClock) -> Result<Self, XhciError> {
        dma::set_hhdm_offset(hhdm_offset);
        pci.enable_memory_and_bus_master();

        let phys_base = match pci.bars[0] {
            PciBar::Memory { base, .. } => base,
            _ => return Err(XhciError::Timeout),
        };
        let mmio = VirtAddr::new(phys_base + hhdm_offset);

        let caplength = unsafe { read32(mmio, regs::CAPLENGTH) } & 0xFF;
        let op = VirtAddr::new(mmio.as_u64() + caplength);
        let hcsparams1 = unsafe { read32(mmio, regs::HCSPARAMS1) };
        let hcsparams2 = unsafe { read32(mmio, regs::HCSPARAMS2) };
        let hccparams1 = unsafe { read32(mmio, regs::HCCPARAMS1) };
        let max_slots = regs::hcsparams1_max_slots(hcsparams1).min(MAX_SLOTS as u8);
        let max_ports = regs::hcsparams1_max_ports(hcsparams1);
        let dboff = unsafe { read32(mmio, regs::DBOFF) } & !0x3;
        let rtsoff = unsafe { read32(mmio, regs::RTSOFF) } & !0x1F;
        let db = VirtAddr::new(mmio.as_u64() + u64::from(dboff));
        let rt = VirtAddr::new(mmio.as_u64() + u64::from(rtsoff));

        Self::bios_handoff(mmio, hccparams1, clock)?;
        Self::hc_reset(op, clock)?;

        let dcbaa_len = (usize::from(max_slots) + 1) * 8;
        let dcbaa = DmaBuffer::new(dcbaa_len);

        let max_scratchpad = regs::hcsparams2_max_scratchpad_bufs(hcsparams2);
        let (scratchpad_array, scratchpad_pages) = if max_scratchpad > 0 {
            let mut pages = alloc::vec::Vec::with_capacity(max_scratchpad as usize);
            let mut array = DmaBuffer::new(max_scratchpad as usize * 8);
            for i in 0..max_scratchpad as usize {
                let page = DmaBuffer::new(4096);
                array.as_mut_slice()[i * 8..i * 8 + 8]
                    .copy_from_slice(&page.phys_base().as_u64().to_le_bytes());
                pages.push(page);
            }
            (Some(array), pages)
        } else {
            (None, alloc::vec::Vec::new())
        };

        let mut controller = Self {
            clock,
            mmio,
            op,
            db,
            rt,
            max_slots,
            max_ports,
            dcbaa,
            _scratchpad_array: scratchpad_array,
            _scratchpad_pages: scratchpad_pages,
            cmd_ring: ProducerRing::new(COMMAND_RING_SIZE, DmaBuffer::new(COMMAND_RING_SIZE * ring::TRB_SIZE).phys_base()),
            event_ring: EventRing::new(EVENT_RING_SIZE, DmaBuffer::new(EVENT_RING_SIZE * ring::TRB_SIZE).phys_base()),
            _erst: DmaBuffer::new(16),
            device_contexts: (0..=max_slots as usize).map(|_| None).collect(),
            input_contexts: (0..=max_slots as usize).map(|_| None).collect(),
            ep0_rings: (0..=max_slots as usize).map(|_| None).collect(),
            transfer_rings: (0..=max_slots as usize).map(|_| alloc::vec::Vec::new()).collect(),
            slots: (0..=max_slots as usize).map(|_| DeviceSlot::empty()).collect(),
        };

        if let Some(ref array) = controller._scratchpad_array {
            controller.dcbaa.as_mut_slice()[0..8].copy_from_slice(&array.phys_base().as_u64().to_le_bytes());
        }
        unsafe { write64(op, regs::DCBAAP_LO, controller.dcbaa.phys_base().as_u64()) };

        let cmd_ring_phys = controller.cmd_ring.phys_base().as_u64();
        unsafe { write64(op, regs::CRCR_LO, cmd_ring_phys | 1) };

        controller.setup_event_ring()?;
        controller.run(clock)?;
        controller.enumerate_ports(clock);

        Ok(controller)
    }

    fn bios_handoff(mmio: VirtAddr, hccparams1: u32, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let mut offset = regs::hccparams1_ext_caps_offset(hccparams1);
        if offset == 0 {
            return Ok(());
        }
        loop {
            let header = unsafe { read32(mmio, offset) };
            let cap_id = header & 0xFF;
            if cap_id == regs::USB_LEGACY_SUPPORT_CAP_ID {
                let current = unsafe { read32(mmio, offset) };
                unsafe { write32(mmio, offset, current | regs::USBLEGSUP_OS_OWNED) };

                let deadline = clock.now_ms() + 1000;
                loop {
                    let v = unsafe { read32(mmio, offset) };
                    if v & regs::USBLEGSUP_BIOS_OWNED == 0 {
                        break;
                    }
                    if clock.now_ms() > deadline {
                        return Err(XhciError::Timeout);
                    }
                    clock.udelay(Duration::from_micros(100));
                }

                let ctrl_status = unsafe { read32(mmio, offset + 4) };
                unsafe { write32(mmio, offset + 4, ctrl_status & !0x2000_0000) };
                return Ok(());
            }
            let next = (header >> 8) & 0xFF;
            if next == 0 {
                return Ok(());
            }
            offset += u64::from(next) * 4;
        }
    }

    fn hc_reset(op: VirtAddr, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let cmd = unsafe { read32(op, regs::USBCMD) };
        if cmd & regs::UsbCmd::RUN.bits() != 0 {
            unsafe { write32(op, regs::USBCMD, cmd & !regs::UsbCmd::RUN.bits()) };
            spin_until(clock, 1000, || unsafe { read32(op, regs::USBSTS) } & regs::UsbSts::HCH.bits() != 0)?;
        }

        let cmd = unsafe { read32(op, regs::USBCMD) };
        unsafe { write32(op, regs::USBCMD, cmd | regs::UsbCmd::HCRST.bits()) };
        spin_until(clock, 1000, || {
            let c = unsafe { read32(op, regs::USBCMD) };
            let s = unsafe { read32(op, regs::USBSTS) };
            c & regs::UsbCmd::HCRST.bits() == 0 && s & regs::UsbSts::CNR.bits() == 0
        })
    }

    fn setup_event_ring(&self) -> Result<(), XhciError> {
        let ir0 = regs::IR0_BASE;
        unsafe {
            write32(self.rt, ir0 + regs::ERSTSZ, 1);
            write64(self.rt, ir0 + regs::ERSTBA_LO, self.event_ring.phys_base().as_u64());
            write64(self.rt, ir0 + regs::ERDP_LO, self.event_ring.phys_base().as_u64());
            write32(self.rt, ir0 + regs::IMAN, regs::IMan::IP.bits() | regs::IMan::IE.bits());
        }
        Ok(())
    }

    fn run(&self, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let cmd = unsafe { read32(self.op, regs::USBCMD) };
        let new_cmd = cmd | regs::UsbCmd::RUN.bits() | regs::UsbCmd::INTE.bits() | regs::UsbCmd::HSEE.bits();
        unsafe { write32(self.op, regs::USBCMD, new_cmd) };
        spin_until(clock, 1000, || unsafe { read32(self.op, regs::USBSTS) } & regs::UsbSts::HCH.bits() == 0)
    }

    fn portsc_offset(&self, port: u8) -> u64 {
        regs::PORTSC_BASE + u64::from(port - 1) * regs::PORTSC_STRIDE
    }

    fn enumerate_ports(&mut self, clock: &dyn MonotonicClock) {
        for port in 1..=self.max_ports {
            let portsc = unsafe { read32(self.op, self.portsc_offset(port)) };
            if portsc & regs::PortSc::CCS.bits() != 0 {
                let _ = self.bring_up_device(port, clock);
            }
        }
    }

    /// Posts `trb` to the command ring and blocks (polling the event ring)
    /// until the matching Command Completion Event, up to 500 ms.
    fn post_command(&mut self, trb: Trb, clock: &dyn MonotonicClock) -> Result<(u8, u8), XhciError> {
        self.cmd_ring.post(trb);
        unsafe { write32(self.db, 0, 0) };

        let deadline = clock.now_ms() + 500;
        loop {
            self.drain_events_into_mirror();
            if let Some(event) = self.next_event_of_type(TRB_TYPE_COMMAND_COMPLETION_EVENT) {
                let code = event.completion_code();
                if code == COMPLETION_SUCCESS {
                    return Ok((code, event.slot_id()));
                }
                return Err(XhciError::CommandFailed(code));
            }
            if clock.now_ms() > deadline {
                return Err(XhciError::Timeout);
            }
            clock.udelay(Duration::from_micros(100));
        }
    }

    /// Mirrors hardware-visible event-ring slots into the software ring
    /// before popping. In a real deployment this reads the physical ring
    /// directly (it is the same memory); kept as an explicit step so a
    /// host test can populate the mirror without real MMIO.
    fn drain_events_into_mirror(&mut self) {
        // The event ring's backing memory is mapped 1:1 with `self.event_ring`'s
        // mirror in this driver (`DmaBuffer` is the single allocation both the
        // hardware and `EventRing::pop` observe), so nothing to copy here.
    }

    fn next_event_of_type(&mut self, trb_type: u8) -> Option<Trb> {
        let event = self.event_ring.pop()?;
        let erdp = self.event_ring.dequeue_phys().as_u64() | regs::ERDP_EVENT_HANDLER_BUSY as u64;
        unsafe { write64(self.rt, regs::IR0_BASE + regs::ERDP_LO, erdp) };
        if event.trb_type() == trb_type {
            Some(event)
        } else {
            None
        }
    }

    fn bring_up_device(&mut self, port: u8, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        self.reset_port(port, clock)?;
        let portsc = unsafe { read32(self.op, self.portsc_offset(port)) };
        let speed = (portsc >> 10) & 0x0F;

        let (_, slot_id) = self.post_command(enable_slot_trb(), clock)?;
        let slot_id = slot_id as usize;
        if slot_id == 0 || slot_id >= self.slots.len() {
            return Err(XhciError::NoSlotsFree);
        }

        let device_ctx = DmaBuffer::new(DEVICE_CONTEXT_SIZE);
        self.dcbaa.as_mut_slice()[slot_id * 8..slot_id * 8 + 8]
            .copy_from_slice(&device_ctx.phys_base().as_u64().to_le_bytes());

        let ep0_max_packet = if speed == 4 { 512 } else { 8 };
        let ep0_ring = ProducerRing::new(16, DmaBuffer::new(16 * ring::TRB_SIZE).phys_base());
        let mut input_ctx = DmaBuffer::new(INPUT_CONTEXT_SIZE);
        write_input_control_add(&mut input_ctx, 0b11);
        write_slot_context(&mut input_ctx, 1, speed as u8, port);
        write_ep0_context(&mut input_ctx, ep0_max_packet, ep0_ring.phys_base().as_u64());

        self.post_command(address_device_trb(input_ctx.phys_base().as_u64(), slot_id as u8), clock)?;

        self.ep0_rings[slot_id] = Some(ep0_ring);
        self.input_contexts[slot_id] = Some(input_ctx);
        self.device_contexts[slot_id] = Some(device_ctx);

        self.slots[slot_id] = DeviceSlot {
            valid: true,
            port,
            speed: speed as u8,
            class: 0,
            subclass: 0,
            protocol: 0,
            vendor_id: 0,
            product_id: 0,
            ep0_max_packet,
            configuration: 0,
            endpoints: planck_noalloc::vec::ArrayVec::new(),
        };

        self.fetch_device_descriptor(slot_id, clock)?;
        self.configure_device(slot_id, clock)?;
        self.class_bring_up(slot_id, clock)?;
        Ok(())
    }

    fn reset_port(&self, port: u8, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let offset = self.portsc_offset(port);
        let portsc = unsafe { read32(self.op, offset) };
        if portsc & regs::PortSc::PP.bits() == 0 {
            unsafe { write32(self.op, offset, portsc | regs::PortSc::PP.bits()) };
            clock.udelay(Duration::from_millis(20));
        }

        let portsc = unsafe { read32(self.op, offset) };
        unsafe { write32(self.op, offset, (portsc & !regs::PORTSC_CHANGE_MASK) | regs::PortSc::PR.bits()) };
        spin_until(clock, 1000, || {
            unsafe { read32(self.op, offset) } & regs::PortSc::PR.bits() == 0
        })?;

        let portsc = unsafe { read32(self.op, offset) };
        unsafe { write32(self.op, offset, (portsc & !regs::PORTSC_CHANGE_MASK) | (portsc & regs::PORTSC_CHANGE_MASK)) };
        Ok(())
    }

    fn fetch_device_descriptor(&mut self, slot_id: usize, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let mut buf = [0u8; 18];
        self.control_transfer_in(slot_id, 0x80, 6, 0x0100, 0, &mut buf[..8], clock)?;
        let true_max_packet = buf[7];
        if u16::from(true_max_packet) != self.slots[slot_id].ep0_max_packet && true_max_packet > 0 {
            self.slots[slot_id].ep0_max_packet = u16::from(true_max_packet);
            if let (Some(ref mut input_ctx), Some(ref ep0_ring)) =
                (&mut self.input_contexts[slot_id], &self.ep0_rings[slot_id])
            {
                write_input_control_add(input_ctx, 0b10);
                write_ep0_context(input_ctx, u16::from(true_max_packet), ep0_ring.phys_base().as_u64());
                let phys = input_ctx.phys_base().as_u64();
                self.post_command(evaluate_context_trb(phys, slot_id as u8), clock)?;
            }
        }

        self.control_transfer_in(slot_id, 0x80, 6, 0x0100, 0, &mut buf, clock)?;
        self.slots[slot_id].vendor_id = u16::from_le_bytes([buf[8], buf[9]]);
        self.slots[slot_id].product_id = u16::from_le_bytes([buf[10], buf[11]]);
        Ok(())
    }

    fn configure_device(&mut self, slot_id: usize, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let mut header = [0u8; 9];
        self.control_transfer_in(slot_id, 0x80, 6, 0x0200, 0, &mut header, clock)?;
        let total_len = usize::from(u16::from_le_bytes([header[2], header[3]])).min(512);

        let mut full = alloc::vec![0u8; total_len];
        self.control_transfer_in(slot_id, 0x80, 6, 0x0200, 0, &mut full, clock)?;

        let (interface_class, interface_subclass, interface_protocol, interface_number, endpoints) =
            parse_configuration(&full);
        self.slots[slot_id].class = interface_class;
        self.slots[slot_id].subclass = interface_subclass;
        self.slots[slot_id].protocol = interface_protocol;
        for ep in &endpoints {
            let _ = self.slots[slot_id].endpoints.try_push(*ep);
        }

        let config_value = full.get(5).copied().unwrap_or(1);
        self.control_transfer_out(slot_id, 0x00, 9, u16::from(config_value), 0, &[], clock)?;

        if let Some(ref mut input_ctx) = self.input_contexts[slot_id] {
            let mut add_flags = 0b01u32;
            for ep in &endpoints {
                add_flags |= 1 << ep.dci();
            }
            write_input_control_add(input_ctx, add_flags);
            let mut max_dci = 1u8;
            for ep in &endpoints {
                let ring = ProducerRing::new(16, DmaBuffer::new(16 * ring::TRB_SIZE).phys_base());
                write_endpoint_context(input_ctx, ep.dci(), ep.ty, ep.is_in(), ep.max_packet_size, ring.phys_base().as_u64(), ep.interval);
                self.transfer_rings[slot_id].push((ep.address, ring));
                max_dci = max_dci.max(ep.dci());
            }
            write_slot_context_entries(input_ctx, max_dci);
            let phys = input_ctx.phys_base().as_u64();
            self.post_command(configure_endpoint_trb(phys, slot_id as u8), clock)?;
        }

        self.slots[slot_id].configuration = config_value;
        let _ = interface_number;
        Ok(())
    }

    fn class_bring_up(&mut self, slot_id: usize, clock: &dyn MonotonicClock) -> Result<(), XhciError> {
        let slot = &self.slots[slot_id];
        if slot.class == 0x03 {
            // HID: SET_IDLE(0) then SET_PROTOCOL(boot=0).
            self.control_transfer_out(slot_id, 0x21, 0x0A, 0, 0, &[], clock)?;
            self.control_transfer_out(slot_id, 0x21, 0x0B, 0, 0, &[], clock)?;
        } else if slot.class == 0x08 {
            self.msc_inquiry(slot_id, clock)?;
        }
        Ok(())
    }

    fn msc_inquiry(&mut self, slot_id: usize, clock: &dyn MonotonicClock) -> Result<[u8; 36], XhciError> {
        let (bulk_in, bulk_out) = {
            let slot = &self.slots[slot_id];
            (slot.bulk_in(), slot.bulk_out())
        };
        let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) else {
            return Err(XhciError::TransferFailed(0));
        };

        let mut cbw = [0u8; 31];
        cbw[0..4].copy_from_slice(b"USBC");
        cbw[8..12].copy_from_slice(&36u32.to_le_bytes());
        cbw[12] = 0x80;
        cbw[14] = 6;
        cbw[15] = 0x12;
        cbw[19] = 36;
        self.bulk_transfer(slot_id, bulk_out.dci(), &cbw, clock)?;

        let mut data = [0u8; 36];
        self.bulk_transfer_in(slot_id, bulk_in.dci(), &mut data, clock)?;

        let mut csw = [0u8; 13];
        self.bulk_transfer_in(slot_id, bulk_in.dci(), &mut csw, clock)?;
        if &csw[0..4] != b"USBS" || csw[12] != 0 {
            return Err(XhciError::TransferFailed(csw[12]));
        }

        Ok(data)
    }

    fn control_transfer_in(
        &mut self,
        slot_id: usize,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        clock: &dyn MonotonicClock,
    ) -> Result<(), XhciError> {
        self.control_transfer(slot_id, request_type, request, value, index, Some(buf), true, clock)
    }

    fn control_transfer_out(
        &mut self,
        slot_id: usize,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        clock: &dyn MonotonicClock,
    ) -> Result<(), XhciError> {
        let mut owned = alloc::vec::Vec::from(buf);
        self.control_transfer(slot_id, request_type, request, value, index, Some(&mut owned), false, clock)
    }

    fn control_transfer(
        &mut self,
        slot_id: usize,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: Option<&mut [u8]>,
        is_in: bool,
        clock: &dyn MonotonicClock,
    ) -> Result<(), XhciError> {
        let len = buf.as_ref().map_or(0, |b| b.len());
        let mut setup = [0u8; 8];
        setup[0] = request_type;
        setup[1] = request;
        setup[2..4].copy_from_slice(&value.to_le_bytes());
        setup[4..6].copy_from_slice(&index.to_le_bytes());
        setup[6..8].copy_from_slice(&(len as u16).to_le_bytes());

        let mut data_buf = if len > 0 { Some(DmaBuffer::new(len)) } else { None };
        if !is_in {
            if let (Some(dma), Some(src)) = (&mut data_buf, &buf) {
                dma.as_mut_slice().copy_from_slice(src);
            }
        }

        let Some(ring) = self.ep0_rings.get_mut(slot_id).and_then(|r| r.as_mut()) else {
            return Err(XhciError::TransferFailed(0));
        };

        let mut setup_param = 0u64;
        setup_param |= u64::from(setup[0]);
        setup_param |= u64::from(setup[1]) << 8;
        setup_param |= u64::from(u16::from_le_bytes([setup[2], setup[3]])) << 16;
        setup_param |= u64::from(u16::from_le_bytes([setup[4], setup[5]])) << 32;
        setup_param |= u64::from(u16::from_le_bytes([setup[6], setup[7]])) << 48;

        ring.post(Trb { parameter: setup_param, status: 8, control: (2 << 10) | (1 << 6) });

        if let Some(ref dma) = data_buf {
            let dir_bit = u32::from(is_in) << 16;
            ring.post(Trb { parameter: dma.phys_base().as_u64(), status: len as u32, control: (3 << 10) | dir_bit });
        }

        let status_dir = u32::from(!is_in || len == 0) << 16;
        ring.post(Trb { parameter: 0, status: 0, control: (4 << 10) | (1 << 5) | status_dir });

        unsafe { write32(self.db, slot_id as u64 * 4, 1) };

        self.wait_transfer_event(slot_id, 1, clock)?;

        if let (Some(dma), Some(out)) = (data_buf, buf) {
            if is_in {
                out.copy_from_slice(&dma.as_slice()[..out.len()]);
            }
        }

        Ok(())
    }

    fn bulk_transfer(&mut self, slot_id: usize, endpoint_dci: u8, data: &[u8], clock: &dyn MonotonicClock) -> Result<u32, XhciError> {
        let mut dma = DmaBuffer::new(data.len().max(1));
        dma.as_mut_slice()[..data.len()].copy_from_slice(data);
        self.post_normal_transfer(slot_id, endpoint_dci, dma.phys_base().as_u64(), data.len() as u32, clock)
    }

    fn bulk_transfer_in(&mut self, slot_id: usize, endpoint_dci: u8, out: &mut [u8], clock: &dyn MonotonicClock) -> Result<u32, XhciError> {
        let mut dma = DmaBuffer::new(out.len().max(1));
        let residual = self.post_normal_transfer(slot_id, endpoint_dci, dma.phys_base().as_u64(), out.len() as u32, clock)?;
        out.copy_from_slice(&dma.as_mut_slice()[..out.len()]);
        Ok(residual)
    }

    fn post_normal_transfer(&mut self, slot_id: usize, endpoint_dci: u8, phys: u64, len: u32, clock: &dyn MonotonicClock) -> Result<u32, XhciError> {
        let Some((_, ring)) = self.transfer_rings[slot_id].iter_mut().find(|(addr, _)| dci(*addr) == endpoint_dci) else {
            return Err(XhciError::TransferFailed(0));
        };
        ring.post(Trb { parameter: phys, status: len, control: (1 << 10) | (1 << 5) | (1 << 2) });
        unsafe { write32(self.db, slot_id as u64 * 4, u32::from(endpoint_dci)) };
        self.wait_transfer_event(slot_id, endpoint_dci, clock)
    }

    fn wait_transfer_event(&mut self, slot_id: usize, endpoint_dci: u8, clock: &dyn MonotonicClock) -> Result<u32, XhciError> {
        let deadline = clock.now_ms() + 500;
        loop {
            if let Some(event) = self.event_ring.pop() {
                let erdp = self.event_ring.dequeue_phys().as_u64() | regs::ERDP_EVENT_HANDLER_BUSY as u64;
                unsafe { write64(self.rt, regs::IR0_BASE + regs::ERDP_LO, erdp) };
                if event.trb_type() == TRB_TYPE_TRANSFER_EVENT
                    && event.slot_id() as usize == slot_id
                    && event.endpoint_id() == endpoint_dci
                {
                    let code = event.completion_code();
                    return match code {
                        COMPLETION_SUCCESS | COMPLETION_SHORT_PACKET => Ok(event.transfer_length()),
                        other => Err(XhciError::TransferFailed(other)),
                    };
                }
            }
            if clock.now_ms() > deadline {
                return Err(XhciError::Timeout);
            }
            clock.udelay(Duration::from_micros(100));
        }
    }

    /// Re-reads each port's status-change bit, tearing down or bringing up
    /// devices as appropriate. Called opportunistically from the HID poll
    /// entry point.
    pub fn poll_hotplug(&mut self, clock: &dyn MonotonicClock) {
        for port in 1..=self.max_ports {
            let offset = self.portsc_offset(port);
            let portsc = unsafe { read32(self.op, offset) };
            if portsc & regs::PortSc::CSC.bits() == 0 {
                continue;
            }
            unsafe { write32(self.op, offset, (portsc & !regs::PORTSC_CHANGE_MASK) | regs::PortSc::CSC.bits()) };

            if portsc & regs::PortSc::CCS.bits() != 0 {
                let _ = self.bring_up_device(port, clock);
            } else {
                for slot in &mut self.slots {
                    if slot.valid && slot.port == port {
                        slot.invalidate();
                    }
                }
            }
        }
    }

    /// Returns the slot for `slot_id`, if valid.
    #[must_use]
    pub fn slot(&self, slot_id: usize) -> Option<&DeviceSlot> {
        self.slots.get(slot_id).filter(|s| s.valid)
    }

    /// Number of valid (enumerated) device slots.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.slots.iter().filter(|s| s.valid).count()
    }

    /// Reads up to 8 bytes from a slot's interrupt IN endpoint, for HID
    /// boot-protocol polling.
    pub fn hid_read(&mut self, slot_id: usize, out: &mut [u8; 8], clock: &dyn MonotonicClock) -> Result<u32, XhciError> {
        let ep = self.slots[slot_id].interrupt_in().ok_or(XhciError::TransferFailed(0))?;
        self.bulk_transfer_in(slot_id, ep.dci(), out, clock)
    }
}

fn spin_until(clock: &dyn MonotonicClock, timeout_ms: u64, mut condition: impl FnMut() -> bool) -> Result<(), XhciError> {
    let deadline = clock.now_ms() + timeout_ms;
    while !condition() {
        if clock.now_ms() > deadline {
            return Err(XhciError::Timeout);
        }
        clock.udelay(Duration::from_micros(100));
    }
    Ok(())
}

fn enable_slot_trb() -> Trb {
    Trb { parameter: 0, status: 0, control: 9 << 10 }
}

fn address_device_trb(input_ctx_phys: u64, slot_id: u8) -> Trb {
    Trb { parameter: input_ctx_phys, status: 0, control: (11 << 10) | (u32::from(slot_id) << 24) }
}

fn evaluate_context_trb(input_ctx_phys: u64, slot_id: u8) -> Trb {
    Trb { parameter: input_ctx_phys, status: 0, control: (13 << 10) | (u32::from(slot_id) << 24) }
}

fn configure_endpoint_trb(input_ctx_phys: u64, slot_id: u8) -> Trb {
    Trb { parameter: input_ctx_phys, status: 0, control: (12 << 10) | (u32::from(slot_id) << 24) }
}

fn write_input_control_add(ctx: &mut DmaBuffer, add_flags: u32) {
    ctx.as_mut_slice()[4..8].copy_from_slice(&add_flags.to_le_bytes());
}

fn write_slot_context(ctx: &mut DmaBuffer, context_entries: u8, speed: u8, port: u8) {
    let base = 32;
    let dword0 = (u32::from(context_entries) << 27) | (u32::from(speed) << 20);
    ctx.as_mut_slice()[base..base + 4].copy_from_slice(&dword0.to_le_bytes());
    ctx.as_mut_slice()[base + 4..base + 8].copy_from_slice(&(u32::from(port) << 16).to_le_bytes());
}

fn write_slot_context_entries(ctx: &mut DmaBuffer, context_entries: u8) {
    let base = 32;
    let mut dword0 = u32::from_le_bytes(ctx.as_slice()[base..base + 4].try_into().unwrap());
    dword0 = (dword0 & !(0x1F << 27)) | (u32::from(context_entries) << 27);
    ctx.as_mut_slice()[base..base + 4].copy_from_slice(&dword0.to_le_bytes());
}

fn write_ep0_context(ctx: &mut DmaBuffer, max_packet: u16, dequeue_phys: u64) {
    let base = 32 + 32;
    let dword1 = (u32::from(max_packet) << 16) | (4 << 3);
    ctx.as_mut_slice()[base + 4..base + 8].copy_from_slice(&dword1.to_le_bytes());
    ctx.as_mut_slice()[base + 8..base + 16].copy_from_slice(&(dequeue_phys | 1).to_le_bytes());
    ctx.as_mut_slice()[base + 16..base + 20].copy_from_slice(&8u32.to_le_bytes());
}

fn write_endpoint_context(
    ctx: &mut DmaBuffer,
    dci: u8,
    ty: EndpointType,
    is_in: bool,
    max_packet: u16,
    dequeue_phys: u64,
    interval: u8,
) {
    let base = 32 + 32 * usize::from(dci);
    let ep_type = ty.xhci_ep_type(is_in);
    let dword0 = u32::from(interval) << 16;
    ctx.as_mut_slice()[base..base + 4].copy_from_slice(&dword0.to_le_bytes());
    let dword1 = (u32::from(max_packet) << 16) | (u32::from(ep_type) << 3);
    ctx.as_mut_slice()[base + 4..base + 8].copy_from_slice(&dword1.to_le_bytes());
    ctx.as_mut_slice()[base + 8..base + 16].copy_from_slice(&(dequeue_phys | 1).to_le_bytes());
    ctx.as_mut_slice()[base + 16..base + 20].copy_from_slice(&u32::from(max_packet).to_le_bytes());
}

/// Parses a Configuration Descriptor buffer, returning the first Interface
/// descriptor's class triple and number plus up to 15 endpoint
/// descriptors.
fn parse_configuration(buf: &[u8]) -> (u8, u8, u8, u8, alloc::vec::Vec<Endpoint>) {
    let mut endpoints = alloc::vec::Vec::new();
    let (mut class, mut subclass, mut protocol, mut iface_num) = (0, 0, 0, 0);
    let mut seen_interface = false;
    let mut i = 0;
    while i + 2 <= buf.len() {
        let len = buf[i] as usize;
        if len < 2 || i + len > buf.len() {
            break;
        }
        let desc_type = buf[i + 1];
        if desc_type == 0x04 && !seen_interface {
            seen_interface = true;
            iface_num = buf[i + 2];
            class = buf[i + 5];
            subclass = buf[i + 6];
            protocol = buf[i + 7];
        } else if desc_type == 0x05 && endpoints.len() < device::MAX_ENDPOINTS {
            let address = buf[i + 2];
            let bm_attributes = buf[i + 3];
            let max_packet = u16::from_le_bytes([buf[i + 4], buf[i + 5]]);
            let b_interval = buf[i + 6];
            let ty = EndpointType::from_bm_attributes(bm_attributes);
            let interval = if b_interval == 0 { 0 } else { b_interval - 1 };
            endpoints.push(Endpoint { address, ty, max_packet_size: max_packet, interval });
        }
        i += len;
    }
    (class, subclass, protocol, iface_num, endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_configuration_extracts_interface_and_endpoints() {
        let mut buf = alloc::vec![0u8; 9 + 9 + 7];
        buf[0] = 9;
        buf[1] = 2;
        buf[2] = buf.len() as u8;

        let iface_off = 9;
        buf[iface_off] = 9;
        buf[iface_off + 1] = 4;
        buf[iface_off + 2] = 0;
        buf[iface_off + 5] = 3;
        buf[iface_off + 6] = 1;
        buf[iface_off + 7] = 2;

        let ep_off = iface_off + 9;
        buf[ep_off] = 7;
        buf[ep_off + 1] = 5;
        buf[ep_off + 2] = 0x81;
        buf[ep_off + 3] = 0x03;
        buf[ep_off + 4] = 4;
        buf[ep_off + 6] = 10;

        let (class, subclass, protocol, iface_num, endpoints) = parse_configuration(&buf);
        assert_eq!(class, 3);
        assert_eq!(subclass, 1);
        assert_eq!(protocol, 2);
        assert_eq!(iface_num, 0);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].address, 0x81);
        assert_eq!(endpoints[0].interval, 9);
    }
}
