//! Presence TLV data elements: `(length << 4) | type` header byte followed
//! by exactly `length` raw bytes. `length` and `type` are both nibbles
//! (0..=15); anything larger needs a multi-byte extension this crate does
//! not implement (base presence advertisements never need one).

use crate::error::{Error, Result};

pub const MAX_DATA_ELEMENT_LENGTH: usize = 15;
pub const MAX_DATA_ELEMENT_TYPE: u8 = 15;

pub const SALT_FIELD_TYPE: u8 = 0;
pub const PRIVATE_IDENTITY_FIELD_TYPE: u8 = 1;
pub const TRUSTED_IDENTITY_FIELD_TYPE: u8 = 2;
pub const PUBLIC_IDENTITY_FIELD_TYPE: u8 = 3;
pub const PROVISIONED_IDENTITY_FIELD_TYPE: u8 = 4;
pub const TX_POWER_FIELD_TYPE: u8 = 5;
pub const ACTION_FIELD_TYPE: u8 = 6;

/// Well-known action bitmask values, supplemented from the field's wider
/// use elsewhere in this presence protocol family. `Action` itself is just
/// a 16-bit big-endian bitfield; these constants name the bits callers are
/// expected to combine.
pub mod action_bits {
    pub const CONTEXT_TIMESTAMP: u16 = 0x1000;
    pub const ACTIVE_UNLOCK: u16 = 0x0800;
    pub const TAP_TO_TRANSFER: u16 = 0x0400;
    pub const NEARBY_SHARE: u16 = 0x0200;
    pub const FAST_PAIR: u16 = 0x0100;
    pub const FIT_CAST: u16 = 0x0080;
    pub const PRESENCE_MANAGER: u16 = 0x0040;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub field_type: u8,
    pub value: Vec<u8>,
}

impl DataElement {
    pub fn new(field_type: u8, value: Vec<u8>) -> Result<Self> {
        if field_type > MAX_DATA_ELEMENT_TYPE {
            return Err(Error::parse("data element type", format!("{field_type} exceeds nibble range")));
        }
        if value.len() > MAX_DATA_ELEMENT_LENGTH {
            return Err(Error::parse(
                "data element length",
                format!("{} exceeds nibble range", value.len()),
            ));
        }
        Ok(Self { field_type, value })
    }

    pub fn tx_power(power_level: i8) -> Self {
        Self {
            field_type: TX_POWER_FIELD_TYPE,
            value: vec![power_level as u8],
        }
    }

    pub fn action(action: u16) -> Self {
        Self {
            field_type: ACTION_FIELD_TYPE,
            value: vec![(action >> 8) as u8, (action & 0xFF) as u8],
        }
    }

    /// Appends this element's header byte and raw value onto `out`.
    pub fn append_to(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.field_type > MAX_DATA_ELEMENT_TYPE || self.value.len() > MAX_DATA_ELEMENT_LENGTH {
            return Err(Error::parse("data element", "length or type exceeds nibble range"));
        }
        out.push(((self.value.len() as u8) << 4) | self.field_type);
        out.extend_from_slice(&self.value);
        Ok(())
    }

    /// Parses one data element starting at `bytes[0]`, returning it along
    /// with the number of bytes consumed.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.is_empty() {
            return Err(Error::parse("data element", "empty input"));
        }
        let header = bytes[0];
        let length = (header >> 4) as usize;
        let field_type = header & 0x0F;
        if bytes.len() < 1 + length {
            return Err(Error::parse("data element", "truncated value"));
        }
        let value = bytes[1..1 + length].to_vec();
        Ok((Self { field_type, value }, 1 + length))
    }

    /// Parses a back-to-back sequence of data elements consuming all of
    /// `bytes`.
    pub fn parse_all(mut bytes: &[u8]) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let (de, consumed) = Self::parse(bytes)?;
            out.push(de);
            bytes = &bytes[consumed..];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_byte_packs_length_and_type() {
        let de = DataElement::new(SALT_FIELD_TYPE, vec![0x41, 0x42]).unwrap();
        let mut out = Vec::new();
        de.append_to(&mut out).unwrap();
        assert_eq!(out, vec![0x20, 0x41, 0x42]);
    }

    #[test]
    fn rejects_oversized_type_or_length() {
        assert!(DataElement::new(16, vec![]).is_err());
        assert!(DataElement::new(0, vec![0u8; 16]).is_err());
    }

    #[test]
    fn round_trips_a_sequence() {
        let elements = vec![
            DataElement::tx_power(5),
            DataElement::action(action_bits::ACTIVE_UNLOCK),
        ];
        let mut bytes = Vec::new();
        for de in &elements {
            de.append_to(&mut bytes).unwrap();
        }
        let parsed = DataElement::parse_all(&bytes).unwrap();
        assert_eq!(parsed, elements);
    }

    #[test]
    fn action_encodes_big_endian() {
        let de = DataElement::action(0x0800);
        assert_eq!(de.value, vec![0x08, 0x00]);
    }
}
