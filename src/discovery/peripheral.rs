//! The opaque peripheral handle and the discovery-layer view of a parsed
//! advertisement handed to callers.

use crate::wire::BleAdvertisement;

/// An opaque handle to a remote BLE device. Equal ids refer to the same
/// physical peer for the lifetime of one scan session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peripheral {
    pub id: String,
}

impl Peripheral {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The discovery-layer view of a parsed advertisement: its serialized bytes
/// plus the PSM the header (or advertisement) carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlePeripheral {
    pub advertisement_bytes: Vec<u8>,
    pub psm: i32,
}

impl BlePeripheral {
    pub fn from_advertisement(advertisement: &BleAdvertisement) -> Self {
        Self {
            advertisement_bytes: advertisement.encode(),
            psm: advertisement.psm,
        }
    }

    pub fn is_valid(&self) -> bool {
        BleAdvertisement::decode(&self.advertisement_bytes).is_ok()
    }
}
