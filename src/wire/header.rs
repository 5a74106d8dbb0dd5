//! Advertisement header: the small fixed record placed under the
//! copresence UUID that points at the real advertisement body.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::{ADVERTISEMENT_HASH_BYTE_LENGTH, BLOOM_FILTER_BYTE_LENGTH, DEFAULT_PSM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    fn to_bits(self) -> u8 {
        match self {
            Version::V1 => 0,
            Version::V2 => 1,
        }
    }

    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(Version::V1),
            1 => Ok(Version::V2),
            other => Err(Error::parse("header version", format!("unknown version bits {other}"))),
        }
    }
}

/// A nibble value of 0x0F in the header's leading byte means "the real
/// slot count overflowed the nibble; read it from the following byte".
const OVERFLOW_NIBBLE: u8 = 0x0F;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BleAdvertisementHeader {
    pub version: VersionHashable,
    pub extended_advertisement: bool,
    pub num_slots: u32,
    pub service_id_bloom_filter: [u8; BLOOM_FILTER_BYTE_LENGTH],
    pub advertisement_hash: [u8; ADVERTISEMENT_HASH_BYTE_LENGTH],
    pub psm: i32,
}

/// `Version` wrapped so the header can derive `Hash`/`Eq` (used as a map
/// key by the tracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionHashable(u8);

impl From<Version> for VersionHashable {
    fn from(v: Version) -> Self {
        VersionHashable(v.to_bits())
    }
}

impl VersionHashable {
    pub fn version(self) -> Version {
        Version::from_bits(self.0).expect("constructed only from valid Version")
    }
}

impl BleAdvertisementHeader {
    /// A header with no identifying content — the placeholder used for the
    /// fast path, where there is no real GATT-discoverable header behind
    /// the advertisement.
    pub fn mocked(advertisement_hash: [u8; ADVERTISEMENT_HASH_BYTE_LENGTH]) -> Self {
        Self {
            version: Version::V2.into(),
            extended_advertisement: false,
            num_slots: 1,
            service_id_bloom_filter: [0u8; BLOOM_FILTER_BYTE_LENGTH],
            advertisement_hash,
            psm: DEFAULT_PSM,
        }
    }

    pub fn is_mocked(&self) -> bool {
        self.version.version() == Version::V2
            && self.num_slots == 1
            && !self.extended_advertisement
            && self.service_id_bloom_filter == [0u8; BLOOM_FILTER_BYTE_LENGTH]
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + BLOOM_FILTER_BYTE_LENGTH + ADVERTISEMENT_HASH_BYTE_LENGTH + 4);

        let extended_bit = if self.extended_advertisement { 1u8 } else { 0u8 };
        let low_nibble = if self.num_slots <= 14 {
            self.num_slots as u8
        } else {
            OVERFLOW_NIBBLE
        };
        let byte0 = (self.version.version().to_bits() << 5) | (extended_bit << 4) | (low_nibble & 0x0F);
        out.push(byte0);
        if low_nibble == OVERFLOW_NIBBLE {
            out.push(self.num_slots.min(u8::MAX as u32) as u8);
        }
        out.extend_from_slice(&self.service_id_bloom_filter);
        out.extend_from_slice(&self.advertisement_hash);
        out.write_i32::<BigEndian>(self.psm).expect("writing to Vec never fails");
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let min_len = 1 + BLOOM_FILTER_BYTE_LENGTH + ADVERTISEMENT_HASH_BYTE_LENGTH;
        if bytes.len() < min_len {
            return Err(Error::parse("header", "too short"));
        }
        let byte0 = bytes[0];
        let version = Version::from_bits((byte0 >> 5) & 0x07)?;
        let extended_advertisement = (byte0 >> 4) & 0x01 == 1;
        let low_nibble = byte0 & 0x0F;

        let mut offset = 1;
        let num_slots = if low_nibble == OVERFLOW_NIBBLE {
            if bytes.len() < offset + 1 {
                return Err(Error::parse("header", "missing overflow slot-count byte"));
            }
            let n = bytes[offset] as u32;
            offset += 1;
            n
        } else {
            low_nibble as u32
        };

        if bytes.len() < offset + BLOOM_FILTER_BYTE_LENGTH + ADVERTISEMENT_HASH_BYTE_LENGTH {
            return Err(Error::parse("header", "too short for bloom filter/hash"));
        }

        let mut bloom = [0u8; BLOOM_FILTER_BYTE_LENGTH];
        bloom.copy_from_slice(&bytes[offset..offset + BLOOM_FILTER_BYTE_LENGTH]);
        offset += BLOOM_FILTER_BYTE_LENGTH;

        let mut hash = [0u8; ADVERTISEMENT_HASH_BYTE_LENGTH];
        hash.copy_from_slice(&bytes[offset..offset + ADVERTISEMENT_HASH_BYTE_LENGTH]);
        offset += ADVERTISEMENT_HASH_BYTE_LENGTH;

        // The PSM field is optional on the wire: a header with no extended
        // transport simply ends after the hash, and absence means `kDefaultPsm`.
        let psm = if bytes.len() >= offset + 4 {
            let mut cursor = Cursor::new(&bytes[offset..offset + 4]);
            cursor
                .read_i32::<BigEndian>()
                .map_err(|e| Error::parse("header psm", e.to_string()))?
        } else {
            DEFAULT_PSM
        };

        Ok(Self {
            version: version.into(),
            extended_advertisement,
            num_slots,
            service_id_bloom_filter: bloom,
            advertisement_hash: hash,
            psm,
        })
    }

    /// A header identical to `self` but with `psm` replaced — used when a
    /// later-seen advertisement variant upgrades the PSM of an
    /// already-known header.
    pub fn with_psm(&self, psm: i32) -> Self {
        let mut clone = self.clone();
        clone.psm = psm;
        clone
    }
}
