//! C-visible types: status codes, opaque handles, callbacks, attribute and
//! statistics records. Names match the generated `netshim.h` header.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

/// Return status of every entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ns3_status {
    /// Success
    NS3_OK = 0,
    /// Failure; details via `ns3_last_error`
    NS3_ERR = -1,
}

pub use ns3_status::{NS3_ERR, NS3_OK};

/// Opaque simulation token.
#[repr(C)]
pub struct ns3_sim_t {
    _private: [u8; 0],
}

/// Handle to a simulation context. Never reused once destroyed.
pub type ns3_sim = *mut ns3_sim_t;

/// Opaque node token.
#[repr(C)]
pub struct ns3_node_t {
    _private: [u8; 0],
}

/// Opaque device token.
#[repr(C)]
pub struct ns3_device_t {
    _private: [u8; 0],
}

/// Opaque application token.
#[repr(C)]
pub struct ns3_app_t {
    _private: [u8; 0],
}

/// Opaque flow monitor token.
#[repr(C)]
pub struct ns3_flowmon_t {
    _private: [u8; 0],
}

/// Handle to a node; never dereferenced.
pub type ns3_node = *mut ns3_node_t;
/// Handle to a device; never dereferenced.
pub type ns3_device = *mut ns3_device_t;
/// Handle to an application; never dereferenced.
pub type ns3_app = *mut ns3_app_t;
/// Handle to a flow monitor; never dereferenced.
pub type ns3_flowmon = *mut ns3_flowmon_t;

/// Scheduled event callback.
pub type ns3_void_cb = Option<unsafe extern "C" fn(user: *mut c_void)>;

/// Packet trace callback: `(user, deviceId, timeSec, bytes)`.
pub type ns3_pkt_cb =
    Option<unsafe extern "C" fn(user: *mut c_void, device_id: u64, time_sec: f64, bytes: u32)>;

/// Discriminator values for [`ns3_attr::kind`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ns3_attr_kind {
    NS3_ATTR_BOOL = 0,
    NS3_ATTR_UINT = 1,
    NS3_ATTR_DOUBLE = 2,
    NS3_ATTR_STRING = 3,
}

/// Payload of an [`ns3_attr`]; which member is live depends on the kind.
#[repr(C)]
#[derive(Clone, Copy)]
pub union ns3_attr_value {
    pub u: u64,
    pub d: f64,
    /// NUL-terminated UTF-8, borrowed for the duration of the call.
    pub s: *const c_char,
    /// 0 is false, anything else true.
    pub b: c_int,
}

/// Tagged attribute value.
///
/// `kind` is a plain integer rather than [`ns3_attr_kind`] so that an
/// out-of-range tag from a foreign caller is reported instead of being
/// undefined behaviour.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ns3_attr {
    pub kind: c_int,
    pub value: ns3_attr_value,
}

impl ns3_attr {
    pub fn bool(value: bool) -> Self {
        Self {
            kind: ns3_attr_kind::NS3_ATTR_BOOL as c_int,
            value: ns3_attr_value { b: c_int::from(value) },
        }
    }

    pub fn uint(value: u64) -> Self {
        Self {
            kind: ns3_attr_kind::NS3_ATTR_UINT as c_int,
            value: ns3_attr_value { u: value },
        }
    }

    pub fn double(value: f64) -> Self {
        Self {
            kind: ns3_attr_kind::NS3_ATTR_DOUBLE as c_int,
            value: ns3_attr_value { d: value },
        }
    }

    /// `value` must stay valid until the call that consumes the attribute
    /// returns.
    pub fn string(value: *const c_char) -> Self {
        Self {
            kind: ns3_attr_kind::NS3_ATTR_STRING as c_int,
            value: ns3_attr_value { s: value },
        }
    }
}

/// Totals over every flow a monitor classified.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ns3_flow_stats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum_sec: f64,
    pub jitter_sum_sec: f64,
    pub flow_count: u32,
}
