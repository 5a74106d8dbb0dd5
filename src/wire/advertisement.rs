//! Advertisement body: the payload a header points at (or, for the fast
//! path, the entire broadcast payload itself).

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::DEFAULT_PSM;

/// Length in bytes of the hashed service id carried on the wire.
pub const SERVICE_ID_HASH_LENGTH: usize = 3;

const FLAG_HAS_SERVICE_ID_HASH: u8 = 0b0010_0000;
const FLAG_IS_FAST: u8 = 0b0001_0000;
const FLAG_HAS_PSM: u8 = 0b0000_1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BleAdvertisement {
    pub version: u8,
    pub socket_version: u8,
    /// Absent for fast advertisements, where the caller-specific UUID
    /// already identifies the service.
    pub service_id_hash: Option<[u8; SERVICE_ID_HASH_LENGTH]>,
    pub data: Vec<u8>,
    pub is_fast_advertisement: bool,
    pub psm: i32,
}

impl BleAdvertisement {
    pub fn hash_service_id(service_id: &str) -> [u8; SERVICE_ID_HASH_LENGTH] {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(service_id.as_bytes());
        let mut out = [0u8; SERVICE_ID_HASH_LENGTH];
        out.copy_from_slice(&digest[..SERVICE_ID_HASH_LENGTH]);
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + SERVICE_ID_HASH_LENGTH + self.data.len());
        let mut flags = (self.version & 0x03) << 6;
        if self.service_id_hash.is_some() {
            flags |= FLAG_HAS_SERVICE_ID_HASH;
        }
        if self.is_fast_advertisement {
            flags |= FLAG_IS_FAST;
        }
        if self.psm != DEFAULT_PSM {
            flags |= FLAG_HAS_PSM;
        }
        out.push(flags);
        out.push(self.socket_version);
        if let Some(hash) = self.service_id_hash {
            out.extend_from_slice(&hash);
        }
        out.write_u16::<BigEndian>(self.data.len() as u16).expect("Vec writes never fail");
        out.extend_from_slice(&self.data);
        if self.psm != DEFAULT_PSM {
            out.write_i32::<BigEndian>(self.psm).expect("Vec writes never fail");
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::parse("advertisement", "too short"));
        }
        let flags = bytes[0];
        let version = (flags >> 6) & 0x03;
        let has_service_id_hash = flags & FLAG_HAS_SERVICE_ID_HASH != 0;
        let is_fast_advertisement = flags & FLAG_IS_FAST != 0;
        let has_psm = flags & FLAG_HAS_PSM != 0;
        let socket_version = bytes[1];

        let mut offset = 2;
        let service_id_hash = if has_service_id_hash {
            if bytes.len() < offset + SERVICE_ID_HASH_LENGTH {
                return Err(Error::parse("advertisement", "truncated service id hash"));
            }
            let mut hash = [0u8; SERVICE_ID_HASH_LENGTH];
            hash.copy_from_slice(&bytes[offset..offset + SERVICE_ID_HASH_LENGTH]);
            offset += SERVICE_ID_HASH_LENGTH;
            Some(hash)
        } else {
            None
        };

        if bytes.len() < offset + 2 {
            return Err(Error::parse("advertisement", "missing data length"));
        }
        let data_len = {
            let mut cursor = Cursor::new(&bytes[offset..offset + 2]);
            cursor.read_u16::<BigEndian>().expect("length checked above") as usize
        };
        offset += 2;
        if bytes.len() < offset + data_len {
            return Err(Error::parse("advertisement", "truncated data"));
        }
        let data = bytes[offset..offset + data_len].to_vec();
        offset += data_len;

        let psm = if has_psm {
            if bytes.len() < offset + 4 {
                return Err(Error::parse("advertisement", "truncated psm"));
            }
            let mut cursor = Cursor::new(&bytes[offset..offset + 4]);
            cursor
                .read_i32::<BigEndian>()
                .map_err(|e| Error::parse("advertisement psm", e.to_string()))?
        } else {
            DEFAULT_PSM
        };

        Ok(Self {
            version,
            socket_version,
            service_id_hash,
            data,
            is_fast_advertisement,
            psm,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.is_fast_advertisement || self.service_id_hash.is_some()
    }

    pub fn matches_service_id(&self, service_id: &str) -> bool {
        self.service_id_hash == Some(Self::hash_service_id(service_id))
    }
}
