//! Simulator error types.

use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Errors raised by the simulator and its helpers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A textual or numeric parameter could not be interpreted.
    #[error("invalid {what} `{value}`")]
    InvalidValue { what: &'static str, value: String },

    /// Times are finite, non-negative seconds.
    #[error("time must be a finite, non-negative number of seconds, got {0}")]
    InvalidTime(f64),

    /// An attribute path resolved to no object.
    #[error("no object matches attribute path `{path}`")]
    NoMatch { path: String },

    /// An attribute path contains a segment the resolver does not understand.
    #[error("invalid segment `{segment}` in attribute path `{path}`")]
    InvalidPath { path: String, segment: String },

    #[error("{type_name} has no attribute `{name}`")]
    UnknownAttribute {
        type_name: &'static str,
        name: String,
    },

    #[error("attribute `{name}` cannot be set from a {found} value")]
    AttributeType { name: String, found: &'static str },

    #[error("node {node} has no internet stack")]
    NoInternetStack { node: u32 },

    #[error("address space of {network}/{mask} is exhausted")]
    AddressExhausted { network: Ipv4Addr, mask: Ipv4Addr },

    #[error("no route to {dst}")]
    NoRoute { dst: Ipv4Addr },

    #[error("UDP port {port} is already bound on node {node}")]
    PortInUse { node: u32, port: u16 },

    #[error("device has no trace source `{name}`")]
    NoTraceSource { name: String },

    #[error("Wi-Fi channel {channel} is not valid in the {band} band")]
    InvalidWifiChannel { channel: i32, band: &'static str },

    /// The object's owning node was destroyed with the simulator.
    #[error("object is detached from its node")]
    Detached,

    #[error("simulator is already running")]
    AlreadyRunning,

    #[error("pcap I/O failed for {path}: {source}")]
    Pcap {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        EngineError::InvalidValue {
            what,
            value: value.into(),
        }
    }
}
