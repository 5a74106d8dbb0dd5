//! Byte-level wire format: advertisement headers, advertisement bodies, and
//! presence data elements. Every type here implements a round-trip law:
//! `decode(encode(x)) == x` for any well-formed `x`.

pub mod advertisement;
pub mod data_element;
pub mod header;

pub use advertisement::BleAdvertisement;
pub use data_element::DataElement;
pub use header::BleAdvertisementHeader;

/// Length in bytes of the service-id bloom filter carried in every header.
pub const BLOOM_FILTER_BYTE_LENGTH: usize = 10;

/// Length in bytes of the advertisement-body hash carried in every header.
pub const ADVERTISEMENT_HASH_BYTE_LENGTH: usize = 4;

/// Sentinel meaning "no L2CAP PSM" (the advertisement only reachable
/// through the legacy GATT path, not an extended transport).
pub const DEFAULT_PSM: i32 = -1;

/// Well-known 16-bit UUID Nearby presence service data is broadcast under.
pub const COPRESENCE_SERVICE_UUID: u16 = 0xFCF1;

pub(crate) fn short_hash(data: &[u8]) -> [u8; ADVERTISEMENT_HASH_BYTE_LENGTH] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(data);
    let mut out = [0u8; ADVERTISEMENT_HASH_BYTE_LENGTH];
    out.copy_from_slice(&digest[..ADVERTISEMENT_HASH_BYTE_LENGTH]);
    out
}
