//! Error reporting across the ABI.
//!
//! Every failure collapses to `NS3_ERR`. The message, prefixed with the
//! failing operation's name, lands in the simulation's error slot, or in the
//! process-wide fallback slot when no live simulation is addressable.
//! Callers pull it with [`ns3_last_error`]. Success never clears a slot.

use std::any::Any;
use std::os::raw::{c_char, c_int};
use std::sync::{Mutex, PoisonError};

use netshim_engine::EngineError;

use crate::abi::{ns3_sim, ns3_status, NS3_ERR, NS3_OK};
use crate::context;
use crate::registry::HandleKind;

/// Why an entry point failed.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("null pointer argument `{0}`")]
    NullPointer(&'static str),

    #[error("null simulation handle")]
    NullSimulation,

    /// The simulation handle is not live (destroyed or forged).
    #[error("unknown simulation handle")]
    UnknownSimulation,

    #[error("no simulation handles left")]
    SimulationsExhausted,

    #[error("`{0}` must be greater than zero")]
    ZeroCount(&'static str),

    #[error("`{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// Registry miss, including handles issued by another simulation.
    #[error("Invalid {0} handle")]
    InvalidHandle(HandleKind),

    #[error("{0} registry has no ids left")]
    RegistryFull(HandleKind),

    #[error("Invalid attribute kind {0}")]
    InvalidAttributeKind(c_int),

    #[error("Invalid attribute kind: string value is null")]
    NullAttributeString,

    #[error("simulation is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("panic: {0}")]
    Panic(String),
}

impl ShimError {
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string payload".to_string());
        ShimError::Panic(message)
    }
}

/// Mutex-guarded last-error string. Writes overwrite, reads copy.
#[derive(Debug, Default)]
pub struct ErrorSlot(Mutex<String>);

impl ErrorSlot {
    pub const fn new() -> Self {
        Self(Mutex::new(String::new()))
    }

    /// Records `"<op> failed: <error>"` and logs it.
    pub fn fail(&self, op: &'static str, error: &ShimError) {
        let message = format!("{op} failed: {error}");
        tracing::warn!(op, %error, "operation failed");
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    pub fn get(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Written when a call names no live simulation.
pub(crate) static FALLBACK: ErrorSlot = ErrorSlot::new();

const NO_CONTEXT: &str = "No simulation context";

/// Copies `msg` into `buf`, truncated to `len - 1` bytes on a character
/// boundary and NUL-terminated.
///
/// # Safety
/// `buf` must be valid for writes of `len` bytes and `len` must be non-zero.
unsafe fn copy_message(msg: &str, buf: *mut c_char, len: usize) {
    let mut n = msg.len().min(len - 1);
    while !msg.is_char_boundary(n) {
        n -= 1;
    }
    // SAFETY: caller guarantees `len` writable bytes and n < len.
    unsafe {
        std::ptr::copy_nonoverlapping(msg.as_ptr().cast::<c_char>(), buf, n);
        *buf.add(n) = 0;
    }
}

/// Retrieve the last error message of a simulation.
///
/// # Arguments
/// - `sim`: simulation handle; NULL yields `"No simulation context"`, a
///   destroyed handle yields the process-wide fallback message
/// - `buf`: output buffer, receives NUL-terminated UTF-8
/// - `len`: size of `buf` in bytes
///
/// # Returns
/// - `NS3_OK` on success
/// - `NS3_ERR` if `buf` is NULL or `len` is 0
///
/// # Safety
/// - `buf` must point to at least `len` writable bytes
#[no_mangle]
pub unsafe extern "C" fn ns3_last_error(
    sim: ns3_sim,
    buf: *mut c_char,
    len: usize,
) -> ns3_status {
    if buf.is_null() || len == 0 {
        return NS3_ERR;
    }

    let message = if sim.is_null() {
        NO_CONTEXT.to_string()
    } else {
        match context::SimContext::from_handle(sim) {
            Ok(ctx) => ctx.last_error(),
            Err(_) => FALLBACK.get(),
        }
    };

    // SAFETY: buf/len validated above, the rest is the caller's contract.
    unsafe { copy_message(&message, buf, len) };
    NS3_OK
}
