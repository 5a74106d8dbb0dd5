//! Discovery-core configuration options.
//!
//! Mirrors the shape of this codebase's other config structs: plain
//! `serde`-derived data with a `Default` impl supplying sane out-of-the-box
//! values, rather than a builder.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Radio duty-cycle hint passed to the platform advertiser/scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerLevel {
    LowPower,
    HighPower,
}

impl Default for PowerLevel {
    fn default() -> Self {
        PowerLevel::HighPower
    }
}

/// Allowed connection topology for a given service id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    P2pPointToPoint,
    P2pStar,
    P2pCluster,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::P2pCluster
    }
}

/// Runtime capabilities of the platform BLE stack this process is running
/// on. Replaces what the source implementation hardcoded as a constant;
/// callers query their platform and construct this once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Whether the platform can emit/parse BLE5 extended advertisements.
    /// Defaults to `false`, matching the conservative legacy-advertisement
    /// assumption; platforms that support the extended transport should
    /// construct this with `true`.
    pub extended_advertising_supported: bool,
}

/// Options controlling one tracked service's discovery/advertising behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    pub power_level: PowerLevel,
    /// Service UUID under which a fast (in-advertisement) payload is
    /// broadcast. `None` disables the fast path for this service.
    pub fast_advertisement_service_uuid: Option<String>,
    pub auto_upgrade_bandwidth: bool,
    pub enforce_topology_constraints: bool,
    pub strategy: Strategy,
    /// How long a read-result cache entry's `Failure` status suppresses
    /// further GATT reads of the same header.
    #[serde(with = "humantime_serde")]
    pub read_failure_backoff: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            power_level: PowerLevel::default(),
            fast_advertisement_service_uuid: None,
            auto_upgrade_bandwidth: false,
            enforce_topology_constraints: true,
            strategy: Strategy::default(),
            read_failure_backoff: Duration::from_secs(5),
        }
    }
}
