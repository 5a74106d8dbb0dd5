//! BLE v2 discovery core: advertisement codec, bloom-filtered peripheral
//! tracking, and presence encoding for peer-to-peer discovery.
//!
//! This crate owns the part of a Nearby-style connectivity stack that
//! decides *who is out there*: it decodes BLE advertisements, fuses the
//! fast in-advertisement path with the slower GATT-read path into a single
//! logical peer, tracks which peers have gone quiet, and encodes outgoing
//! presence advertisements. Connection establishment, payload transport, and
//! other mediums (Wi-Fi LAN, Bluetooth Classic, WebRTC) live above or beside
//! this layer and are referenced only through the [`medium`] façade.

pub mod bloom;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lost_entity;
pub mod medium;
pub mod presence;
pub mod read_result;
pub mod wire;

pub use error::{Error, Result};
