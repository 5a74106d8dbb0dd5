//! Presence advertisement factory (component F): encodes a broadcast
//! request into the service-data bytes carried under the copresence UUID.

use crate::error::Result;
use crate::wire::data_element::{DataElement, SALT_FIELD_TYPE};
use crate::wire::COPRESENCE_SERVICE_UUID;

const BASE_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Private,
    Trusted,
    Public,
    Provisioned,
}

impl IdentityKind {
    fn field_type(self) -> u8 {
        use crate::wire::data_element::{
            PRIVATE_IDENTITY_FIELD_TYPE, PROVISIONED_IDENTITY_FIELD_TYPE, PUBLIC_IDENTITY_FIELD_TYPE,
            TRUSTED_IDENTITY_FIELD_TYPE,
        };
        match self {
            IdentityKind::Private => PRIVATE_IDENTITY_FIELD_TYPE,
            IdentityKind::Trusted => TRUSTED_IDENTITY_FIELD_TYPE,
            IdentityKind::Public => PUBLIC_IDENTITY_FIELD_TYPE,
            IdentityKind::Provisioned => PROVISIONED_IDENTITY_FIELD_TYPE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub kind: IdentityKind,
}

/// What the caller wants broadcast. Only `BasePresence` is implemented;
/// any other variant yields an empty advertisement, matching the source
/// behavior of silently producing nothing for requests this layer doesn't
/// understand.
#[derive(Debug, Clone)]
pub enum BroadcastRequest {
    BasePresence {
        identity: Identity,
        salt: Vec<u8>,
        tx_power: i8,
        action: u16,
    },
    Unsupported,
}

/// Abstract certificate/identity operations this factory depends on but
/// does not implement itself.
pub trait CertificateManager {
    fn get_base_encrypted_metadata_key(&self, identity: &Identity) -> Result<Vec<u8>>;
    fn encrypt_data_elements(&self, identity: &Identity, salt: &[u8], data_elements: &[u8]) -> Result<Vec<u8>>;
}

/// A bare-bones `BleAdvertisementData` stand-in: service data keyed by a
/// 16-bit UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BleAdvertisementData {
    pub service_data: Vec<(u16, Vec<u8>)>,
}

pub struct AdvertisementFactory<'a> {
    certificate_manager: &'a dyn CertificateManager,
}

impl<'a> AdvertisementFactory<'a> {
    pub fn new(certificate_manager: &'a dyn CertificateManager) -> Self {
        Self { certificate_manager }
    }

    pub fn create_advertisement(&self, request: &BroadcastRequest) -> Result<BleAdvertisementData> {
        match request {
            BroadcastRequest::BasePresence {
                identity,
                salt,
                tx_power,
                action,
            } => {
                let body = self.create_base_np_advertisement(identity, salt, *tx_power, *action)?;
                Ok(BleAdvertisementData {
                    service_data: vec![(COPRESENCE_SERVICE_UUID, body)],
                })
            }
            BroadcastRequest::Unsupported => Ok(BleAdvertisementData::default()),
        }
    }

    fn create_base_np_advertisement(
        &self,
        identity: &Identity,
        salt: &[u8],
        tx_power: i8,
        action: u16,
    ) -> Result<Vec<u8>> {
        let mut out = vec![BASE_VERSION];

        if !salt.is_empty() {
            DataElement::new(SALT_FIELD_TYPE, salt.to_vec())?.append_to(&mut out)?;
        }

        let metadata_key = self.certificate_manager.get_base_encrypted_metadata_key(identity)?;
        DataElement::new(identity.kind.field_type(), metadata_key)?.append_to(&mut out)?;

        let mut inner = Vec::new();
        DataElement::tx_power(tx_power).append_to(&mut inner)?;
        DataElement::action(action).append_to(&mut inner)?;

        if identity.kind != IdentityKind::Public {
            let encrypted = self.certificate_manager.encrypt_data_elements(identity, salt, &inner)?;
            out.extend_from_slice(&encrypted);
        } else {
            out.extend_from_slice(&inner);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct FixedCertificateManager {
        metadata_key: Vec<u8>,
        encrypted: Vec<u8>,
    }

    impl CertificateManager for FixedCertificateManager {
        fn get_base_encrypted_metadata_key(&self, _identity: &Identity) -> Result<Vec<u8>> {
            Ok(self.metadata_key.clone())
        }

        fn encrypt_data_elements(&self, _identity: &Identity, _salt: &[u8], _data_elements: &[u8]) -> Result<Vec<u8>> {
            Ok(self.encrypted.clone())
        }
    }

    /// Matches the S1 scenario: salt "AB", private identity, a fixed
    /// metadata key and a fixed encrypted inner block.
    #[test]
    fn base_presence_matches_literal_test_vector() {
        let cm = FixedCertificateManager {
            metadata_key: hex::decode("1011121314151617181920212223").unwrap(),
            encrypted: hex::decode("5051525354").unwrap(),
        };
        let factory = AdvertisementFactory::new(&cm);
        let request = BroadcastRequest::BasePresence {
            identity: Identity {
                kind: IdentityKind::Private,
            },
            salt: b"AB".to_vec(),
            tx_power: 5,
            action: crate::wire::data_element::action_bits::ACTIVE_UNLOCK,
        };

        let advertisement = factory.create_advertisement(&request).unwrap();
        let (uuid, body) = &advertisement.service_data[0];
        assert_eq!(*uuid, COPRESENCE_SERVICE_UUID);
        assert_eq!(hex::encode(body), "00204142e110111213141516171819202122235051525354");
    }

    #[test]
    fn public_identity_is_not_encrypted() {
        let cm = FixedCertificateManager {
            metadata_key: vec![0xAA],
            encrypted: vec![0xFF, 0xFF],
        };
        let factory = AdvertisementFactory::new(&cm);
        let request = BroadcastRequest::BasePresence {
            identity: Identity {
                kind: IdentityKind::Public,
            },
            salt: vec![],
            tx_power: 2,
            action: 0,
        };
        let advertisement = factory.create_advertisement(&request).unwrap();
        let (_, body) = &advertisement.service_data[0];
        assert!(!body.windows(2).any(|w| w == [0xFF, 0xFF]));
    }

    #[test]
    fn propagates_certificate_manager_errors() {
        struct FailingCertificateManager;
        impl CertificateManager for FailingCertificateManager {
            fn get_base_encrypted_metadata_key(&self, _identity: &Identity) -> Result<Vec<u8>> {
                Err(Error::Identity("no key material".into()))
            }
            fn encrypt_data_elements(&self, _identity: &Identity, _salt: &[u8], _data: &[u8]) -> Result<Vec<u8>> {
                unreachable!("should not be reached")
            }
        }
        let cm = FailingCertificateManager;
        let factory = AdvertisementFactory::new(&cm);
        let request = BroadcastRequest::BasePresence {
            identity: Identity {
                kind: IdentityKind::Trusted,
            },
            salt: vec![],
            tx_power: 0,
            action: 0,
        };
        assert!(factory.create_advertisement(&request).is_err());
    }

    #[test]
    fn unsupported_request_yields_empty_advertisement() {
        let cm = FixedCertificateManager {
            metadata_key: vec![],
            encrypted: vec![],
        };
        let factory = AdvertisementFactory::new(&cm);
        let advertisement = factory.create_advertisement(&BroadcastRequest::Unsupported).unwrap();
        assert!(advertisement.service_data.is_empty());
    }
}
