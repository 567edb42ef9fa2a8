//! xHCI device slot and endpoint state.

/// USB transfer type, as encoded in an endpoint descriptor's
/// `bmAttributes` bits 1:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// Control transfer (EP0 only in this driver).
    Control,
    /// Isochronous transfer. Out of scope per the driver's Non-goals;
    /// recorded for completeness of the descriptor decode.
    Isochronous,
    /// Bulk transfer (mass-storage data phases).
    Bulk,
    /// Interrupt transfer (HID boot-protocol reports).
    Interrupt,
}

impl EndpointType {
    /// Decodes the transfer-type bits of `bmAttributes`.
    #[must_use]
    pub const fn from_bm_attributes(bm_attributes: u8) -> Self {
        match bm_attributes & 0x03 {
            0 => Self::Control,
            1 => Self::Isochronous,
            2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }

    /// The xHCI Endpoint Context `EP Type` field value for this transfer
    /// type and direction (`is_in` ignored for Control).
    #[must_use]
    pub const fn xhci_ep_type(self, is_in: bool) -> u8 {
        match (self, is_in) {
            (Self::Isochronous, false) => 1,
            (Self::Bulk, false) => 2,
            (Self::Interrupt, false) => 3,
            (Self::Control, _) => 4,
            (Self::Isochronous, true) => 5,
            (Self::Bulk, true) => 6,
            (Self::Interrupt, true) => 7,
        }
    }
}

/// One non-EP0 endpoint bound to a device slot.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    /// USB endpoint address (bit 7 = direction, bits 3:0 = number).
    pub address: u8,
    /// Transfer type.
    pub ty: EndpointType,
    /// Maximum packet size in bytes.
    pub max_packet_size: u16,
    /// Polling interval in frames, decoded from `bInterval` (0 if not
    /// applicable).
    pub interval: u8,
}

impl Endpoint {
    /// This endpoint's Device Context Index.
    #[must_use]
    pub const fn dci(self) -> u8 {
        super::ring::dci(self.address)
    }

    /// Whether this endpoint is an IN (device-to-host) endpoint.
    #[must_use]
    pub const fn is_in(self) -> bool {
        self.address & 0x80 != 0
    }
}

/// Maximum non-EP0 endpoints tracked per slot, matching the largest DCI
/// range (2..31) minus EP0.
pub const MAX_ENDPOINTS: usize = 15;

/// Per-slot device state (xHCI slots 1..=max_slots).
pub struct DeviceSlot {
    /// Whether this slot describes a live, enumerated device.
    pub valid: bool,
    /// Root port number the device is attached to.
    pub port: u8,
    /// USB speed, as reported by PORTSC at enable time (xHCI PORTSC speed
    /// encoding: 1=Full, 2=Low, 3=High, 4=Super).
    pub speed: u8,
    /// USB class triple.
    pub class: u8,
    /// USB subclass.
    pub subclass: u8,
    /// USB protocol.
    pub protocol: u8,
    /// Vendor ID from the Device Descriptor.
    pub vendor_id: u16,
    /// Product ID from the Device Descriptor.
    pub product_id: u16,
    /// EP0 max packet size (8, 16, 32, or 64; 512 for SuperSpeed).
    pub ep0_max_packet: u16,
    /// Active configuration value, 0 if none selected.
    pub configuration: u8,
    /// Non-EP0 endpoints, up to [`MAX_ENDPOINTS`].
    pub endpoints: planck_noalloc::vec::ArrayVec<Endpoint, MAX_ENDPOINTS>,
}

impl DeviceSlot {
    /// An empty, invalid slot.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            valid: false,
            port: 0,
            speed: 0,
            class: 0,
            subclass: 0,
            protocol: 0,
            vendor_id: 0,
            product_id: 0,
            ep0_max_packet: 8,
            configuration: 0,
            endpoints: planck_noalloc::vec::ArrayVec::new(),
        }
    }

    /// Invalidates the slot, clearing every field back to empty defaults.
    pub fn invalidate(&mut self) {
        *self = Self::empty();
    }

    /// Finds the first bulk IN endpoint, for MSC reads.
    #[must_use]
    pub fn bulk_in(&self) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .copied()
            .find(|ep| matches!(ep.ty, EndpointType::Bulk) && ep.is_in())
    }

    /// Finds the first bulk OUT endpoint, for MSC writes.
    #[must_use]
    pub fn bulk_out(&self) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .copied()
            .find(|ep| matches!(ep.ty, EndpointType::Bulk) && !ep.is_in())
    }

    /// Finds the first interrupt IN endpoint, for HID boot-protocol polling.
    #[must_use]
    pub fn interrupt_in(&self) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .copied()
            .find(|ep| matches!(ep.ty, EndpointType::Interrupt) && ep.is_in())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_type_decode_matches_usb_spec_bits() {
        assert_eq!(EndpointType::from_bm_attributes(0b00), EndpointType::Control);
        assert_eq!(EndpointType::from_bm_attributes(0b01), EndpointType::Isochronous);
        assert_eq!(EndpointType::from_bm_attributes(0b10), EndpointType::Bulk);
        assert_eq!(EndpointType::from_bm_attributes(0b11), EndpointType::Interrupt);
    }

    #[test]
    fn xhci_ep_type_field_values() {
        assert_eq!(EndpointType::Control.xhci_ep_type(false), 4);
        assert_eq!(EndpointType::Bulk.xhci_ep_type(true), 6);
        assert_eq!(EndpointType::Bulk.xhci_ep_type(false), 2);
        assert_eq!(EndpointType::Interrupt.xhci_ep_type(true), 7);
    }

    #[test]
    fn slot_finds_endpoints_by_role() {
        let mut slot = DeviceSlot::empty();
        slot.endpoints
            .try_push(Endpoint { address: 0x81, ty: EndpointType::Interrupt, max_packet_size: 4, interval: 7 })
            .unwrap();
        slot.endpoints
            .try_push(Endpoint { address: 0x02, ty: EndpointType::Bulk, max_packet_size: 512, interval: 0 })
            .unwrap();
        slot.endpoints
            .try_push(Endpoint { address: 0x83, ty: EndpointType::Bulk, max_packet_size: 512, interval: 0 })
            .unwrap();

        assert_eq!(slot.interrupt_in().unwrap().address, 0x81);
        assert_eq!(slot.bulk_out().unwrap().address, 0x02);
        assert_eq!(slot.bulk_in().unwrap().address, 0x83);
    }

    #[test]
    fn invalidate_resets_to_empty() {
        let mut slot = DeviceSlot::empty();
        slot.valid = true;
        slot.port = 3;
        slot.invalidate();
        assert!(!slot.valid);
        assert_eq!(slot.port, 0);
    }
}
