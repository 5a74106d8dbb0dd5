//! Discovered peripheral tracker (component E): fuses the fast
//! in-advertisement path and the slower GATT-read path into a single
//! logical peer, and tracks which peers have gone quiet.

pub mod peripheral;
pub mod tracker;

pub use peripheral::{BlePeripheral, Peripheral};
pub use tracker::{
    DiscoveredCallback, DiscoveredPeripheralTracker, GattAdvertisementFetcher, LostCallback,
};

use std::collections::HashMap;

/// Raw advertisement payload as handed up from the platform scan callback:
/// service-data keyed by the broadcasting UUID, plus the set of service
/// UUIDs advertised alongside it.
#[derive(Debug, Clone, Default)]
pub struct FoundAdvertisementData {
    pub service_data: HashMap<String, Vec<u8>>,
    pub service_uuids: Vec<String>,
}

/// The well-known UUID regular (non-fast) advertisements are broadcast
/// under, distinct from any caller-specific fast-advertisement UUID.
pub const COPRESENCE_SERVICE_UUID: &str = "0000fcf1-0000-1000-8000-00805f9b34fb";
