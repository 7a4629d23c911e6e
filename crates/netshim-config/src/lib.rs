//! Configuration for netshim simulations
//!
//! A [`SimConfig`] is assembled from layered sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file (optional)
//! 3. An inline TOML document (optional, e.g. handed across the C ABI)
//!
//! The library has no entry point of its own, so environment variables and
//! command-line flags are never consulted.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

/// Main simulation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub simulator: SimulatorConfig,
    pub queue: QueueConfig,
    pub wifi: WifiConfig,
    pub udp: UdpConfig,
    pub pcap: PcapConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Initial seed of the simulator RNG.
    pub seed: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { seed: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of every device's drop-tail transmit queue, in packets.
    pub max_packets: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_packets: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    /// Standard used when a caller passes an out-of-range standard code.
    pub default_standard: WifiStandard,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: "ns3-wifi".to_string(),
            default_standard: WifiStandard::N5Ghz,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub ephemeral_port_start: u16,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            ephemeral_port_start: 49153,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcapConfig {
    /// Directory PCAP files are created in.
    pub directory: PathBuf,
    pub snap_len: u32,
}

impl Default for PcapConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            snap_len: 65535,
        }
    }
}

/// Wi-Fi PHY standard, including the band for 802.11n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WifiStandard {
    #[serde(rename = "80211a")]
    A,
    #[serde(rename = "80211b")]
    B,
    #[serde(rename = "80211g")]
    G,
    #[serde(rename = "80211n-2.4ghz")]
    N2_4Ghz,
    #[serde(rename = "80211n-5ghz")]
    N5Ghz,
    #[serde(rename = "80211ac")]
    Ac,
}

impl WifiStandard {
    pub const ALL: [WifiStandard; 6] = [
        WifiStandard::A,
        WifiStandard::B,
        WifiStandard::G,
        WifiStandard::N2_4Ghz,
        WifiStandard::N5Ghz,
        WifiStandard::Ac,
    ];

    /// Name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            WifiStandard::A => "80211a",
            WifiStandard::B => "80211b",
            WifiStandard::G => "80211g",
            WifiStandard::N2_4Ghz => "80211n-2.4ghz",
            WifiStandard::N5Ghz => "80211n-5ghz",
            WifiStandard::Ac => "80211ac",
        }
    }
}

impl fmt::Display for WifiStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WifiStandard {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WifiStandard::ALL
            .into_iter()
            .find(|standard| standard.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::ValidationError(format!("unknown Wi-Fi standard `{s}`")))
    }
}

impl SimConfig {
    /// Load configuration from an inline TOML document layered over the defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        ConfigLoader::new().with_toml(toml).load()
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_packets == 0 {
            return Err(ConfigError::ValidationError(
                "queue.max_packets must be greater than zero".to_string(),
            ));
        }
        if self.wifi.ssid.is_empty() || self.wifi.ssid.len() > 32 {
            return Err(ConfigError::ValidationError(format!(
                "wifi.ssid must be 1..=32 bytes, got {}",
                self.wifi.ssid.len()
            )));
        }
        if self.udp.ephemeral_port_start == 0 {
            return Err(ConfigError::ValidationError(
                "udp.ephemeral_port_start must be non-zero".to_string(),
            ));
        }
        if self.pcap.snap_len == 0 {
            return Err(ConfigError::ValidationError(
                "pcap.snap_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
