//! # netshim FFI
//!
//! C-compatible Foreign Function Interface for the netshim network
//! simulator.
//!
//! This crate provides a stable C ABI for managed-runtime bindings (P/Invoke,
//! ctypes, JNI, ...). All functions use C-compatible types and follow these
//! conventions:
//!
//! - Return `ns3_status` (`NS3_OK` = 0, `NS3_ERR` = -1)
//! - Use out-parameters for results (e.g., `outSim`, `outApp`)
//! - NULL-check all pointers
//! - UTF-8 validate all strings
//! - Write output arrays only after the whole operation succeeded
//!
//! ## Errors
//!
//! A failed call stores `"<operation> failed: <reason>"` in the simulation's
//! last-error slot; retrieve it with `ns3_last_error()`. Calls that name no
//! live simulation write a process-wide fallback slot instead. Panics never
//! cross the boundary.
//!
//! ## Handles
//!
//! Every handle is a token, not a pointer. A simulation handle is drawn from
//! a process-wide counter and never reissued, so a destroyed simulation's
//! handle is rejected even if a newer simulation reuses its memory. Node,
//! device, application and flow-monitor handles encode a per-simulation tag
//! and a registry id; they are valid only with the simulation that issued
//! them and only until that simulation is destroyed.
//!
//! ## Memory Management
//!
//! - **Simulation-owned**: every entity and trace subscription is released by
//!   `sim_destroy()`; there is nothing else to free
//! - **Caller-owned**: input strings are borrowed for the duration of the call;
//!   output arrays are preallocated by the caller with exactly `count` slots
//!
//! ## Thread Safety
//!
//! A simulation is NOT thread-safe. All calls on one simulation, including
//! the blocking `sim_run()`, must come from one thread; scheduled and trace
//! callbacks fire on that thread and may re-enter the API. Distinct
//! simulations share no state and may be driven from different threads.
#![deny(unsafe_op_in_unsafe_fn)]

use std::ffi::CStr;
use std::os::raw::c_char;
use std::slice;

pub mod abi;
mod apps;
mod attr;
mod context;
mod error;
mod flowmon;
mod handle;
mod lifecycle;
mod registry;
mod topology;
mod trace;

pub use abi::*;
pub use apps::{app_start, app_stop, app_udpecho_client, app_udpecho_server};
pub use attr::config_set;
pub use error::{ns3_last_error, ShimError};
pub use flowmon::{flowmon_collect, flowmon_install_all};
pub use lifecycle::{
    sim_create, sim_create_with_config, sim_destroy, sim_is_running, sim_now, sim_run,
    sim_schedule, sim_set_seed, sim_stop,
};
pub use registry::HandleKind;
pub use topology::{
    csma_install, internet_install, ipv4_assign, ipv4_populate_routing_tables,
    mobility_set_constant_position, nodes_create, p2p_install, wifi_install_sta_ap,
};
pub use trace::{pcap_enable, trace_subscribe_packet_events};

// ============================================================================
// Argument helpers
// ============================================================================

/// Borrows a NUL-terminated UTF-8 argument.
///
/// # Safety
/// `ptr` must be NULL or point at a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn c_str<'a>(
    ptr: *const c_char,
    what: &'static str,
) -> Result<&'a str, ShimError> {
    if ptr.is_null() {
        return Err(ShimError::NullPointer(what));
    }
    // SAFETY: non-null, rest is the caller's contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| ShimError::InvalidUtf8(what))
}

/// Borrows a caller-provided input array of `count > 0` elements. `what`
/// and `count_name` are the argument names used in error messages.
///
/// # Safety
/// `ptr` must be NULL or valid for reads of `count` elements.
pub(crate) unsafe fn in_array<'a, T>(
    ptr: *const T,
    count: u32,
    what: &'static str,
    count_name: &'static str,
) -> Result<&'a [T], ShimError> {
    if ptr.is_null() {
        return Err(ShimError::NullPointer(what));
    }
    if count == 0 {
        return Err(ShimError::ZeroCount(count_name));
    }
    // SAFETY: non-null and non-empty, length is the caller's contract.
    Ok(unsafe { slice::from_raw_parts(ptr, count as usize) })
}

/// Checks an output pointer before any work is done.
pub(crate) fn out_ptr<T>(ptr: *mut T, what: &'static str) -> Result<*mut T, ShimError> {
    if ptr.is_null() {
        Err(ShimError::NullPointer(what))
    } else {
        Ok(ptr)
    }
}

/// Copies `values` into a caller-provided output array.
///
/// # Safety
/// `ptr` must be valid for writes of `values.len()` elements.
pub(crate) unsafe fn write_array<T: Copy>(ptr: *mut T, values: &[T]) {
    // SAFETY: caller contract; source and destination cannot overlap since
    // `values` is owned by the shim.
    unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len()) };
}
