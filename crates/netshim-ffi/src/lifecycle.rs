//! Simulation lifecycle: create, seed, schedule, stop, run, query, destroy.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};

use netshim_config::{ConfigLoader, SimConfig};
use netshim_engine::Time;

use crate::abi::{ns3_sim, ns3_status, ns3_void_cb, NS3_ERR, NS3_OK};
use crate::context::{call, call_global, SimContext};
use crate::error::{ShimError, FALLBACK};
use crate::{c_str, out_ptr};

/// Create a new simulation context with the default configuration.
///
/// # Returns
/// - `NS3_OK` and a fresh context in `*outSim` (empty registries, empty
///   last error, not running)
/// - `NS3_ERR` if `outSim` is NULL; nothing is written
///
/// # Safety
/// - `out_sim` must be NULL or valid for a pointer-sized write
/// - the context must be released with `sim_destroy()`
#[no_mangle]
pub unsafe extern "C" fn sim_create(out_sim: *mut ns3_sim) -> ns3_status {
    call_global("sim_create", || {
        let out = out_ptr(out_sim, "outSim")?;
        let sim = SimContext::create(SimConfig::default())?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(sim) };
        Ok(())
    })
}

/// Create a simulation context configured from an inline TOML document.
///
/// The document is layered over the built-in defaults; NULL selects the
/// defaults alone. Parse and validation failures are readable with
/// `ns3_last_error(NULL-or-stale, ...)` through the fallback slot.
///
/// # Safety
/// - `toml` must be NULL or a NUL-terminated UTF-8 string
/// - `out_sim` must be NULL or valid for a pointer-sized write
#[no_mangle]
pub unsafe extern "C" fn sim_create_with_config(
    toml: *const c_char,
    out_sim: *mut ns3_sim,
) -> ns3_status {
    call_global("sim_create_with_config", || {
        let out = out_ptr(out_sim, "outSim")?;
        let config = if toml.is_null() {
            SimConfig::default()
        } else {
            // SAFETY: non-null, rest is the caller's contract.
            let document = unsafe { c_str(toml, "toml") }?;
            ConfigLoader::new()
                .with_toml(document)
                .load()
                .map_err(ShimError::Config)?
        };
        let sim = SimContext::create(config)?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(sim) };
        Ok(())
    })
}

/// Reseed the simulation's random stream.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
#[no_mangle]
pub unsafe extern "C" fn sim_set_seed(sim: ns3_sim, seed: u32) -> ns3_status {
    call("sim_set_seed", sim, |ctx| {
        ctx.sim.set_seed(seed);
        Ok(())
    })
}

/// Schedule `cb(user)` to run `in_seconds` after the current simulation
/// time.
///
/// The callback fires once, on the thread that calls `sim_run()`, unless a
/// stop takes effect first. It may call back into this API.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `cb` and `user` must remain valid until the event fires or the
///   simulation is destroyed
#[no_mangle]
pub unsafe extern "C" fn sim_schedule(
    sim: ns3_sim,
    in_seconds: f64,
    cb: ns3_void_cb,
    user: *mut c_void,
) -> ns3_status {
    call("sim_schedule", sim, |ctx| {
        let cb = cb.ok_or(ShimError::NullPointer("cb"))?;
        let delay = Time::from_seconds(in_seconds)?;
        ctx.sim.schedule(delay, move |_| {
            // SAFETY: the caller keeps `cb` and `user` valid until the
            // event fires.
            unsafe { cb(user) };
        });
        Ok(())
    })
}

/// Stop the event loop at absolute simulation time `at_time_sec`.
///
/// Events still pending at that time are discarded. A time earlier than now,
/// negative ones included, stops the loop at the next dispatch; the earliest
/// pending stop wins. NaN and infinite times are rejected.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
#[no_mangle]
pub unsafe extern "C" fn sim_stop(sim: ns3_sim, at_time_sec: f64) -> ns3_status {
    call("sim_stop", sim, |ctx| {
        let at = if at_time_sec < 0.0 && at_time_sec.is_finite() {
            Time::ZERO
        } else {
            Time::from_seconds(at_time_sec)?
        };
        ctx.sim.stop_at(at);
        Ok(())
    })
}

/// Run the simulation until the event queue drains or a stop fires.
///
/// This is the only blocking call and the only one during which scheduled
/// and trace callbacks execute. The running flag is set for exactly the
/// duration of the call. A nested call from a callback fails.
///
/// If a callback destroys the simulation, the loop winds down and the
/// context is freed before this function returns.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
#[no_mangle]
pub unsafe extern "C" fn sim_run(sim: ns3_sim) -> ns3_status {
    let entered = SimContext::context_ptr(sim);
    let status = call("sim_run", sim, |ctx| {
        let _running = ctx.enter_run()?;
        ctx.sim.run()?;
        Ok(())
    });

    // A callback destroyed the context during this run. It was retired then,
    // and freeing was left to us once the loop unwound.
    if let Some(ctx_ptr) = entered {
        if !SimContext::is_live(sim) {
            // SAFETY: the context was live on entry and only a deferred
            // destroy retires a running context without freeing it.
            let ctx = unsafe { &*ctx_ptr };
            if ctx.destroy_pending() && !ctx.is_running() {
                // SAFETY: retired, not running and no longer borrowed.
                unsafe { SimContext::free(ctx_ptr) };
            }
        }
    }
    status
}

/// Report whether the event loop is executing.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `out_is_running` must be valid for an `int` write
#[no_mangle]
pub unsafe extern "C" fn sim_is_running(
    sim: ns3_sim,
    out_is_running: *mut c_int,
) -> ns3_status {
    call("sim_is_running", sim, |ctx| {
        let out = out_ptr(out_is_running, "outIsRunning")?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(c_int::from(ctx.is_running())) };
        Ok(())
    })
}

/// Current simulation time in seconds.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `out_time_sec` must be valid for a `double` write
#[no_mangle]
pub unsafe extern "C" fn sim_now(sim: ns3_sim, out_time_sec: *mut f64) -> ns3_status {
    call("sim_now", sim, |ctx| {
        let out = out_ptr(out_time_sec, "outTimeSec")?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(ctx.sim.now().as_seconds()) };
        Ok(())
    })
}

/// Destroy a simulation and every entity, handle and subscription it owns.
///
/// NULL is accepted and returns `NS3_OK`. A handle that is not live
/// (already destroyed or never created) returns `NS3_ERR` without touching
/// memory. When called from a callback during `sim_run()`, the context is
/// invalidated immediately and freed when the run returns.
///
/// # Safety
/// - `sim` must be NULL or a value once returned by `sim_create()`
#[no_mangle]
pub unsafe extern "C" fn sim_destroy(sim: ns3_sim) -> ns3_status {
    if sim.is_null() {
        return NS3_OK;
    }
    let Some(ctx_ptr) = SimContext::retire(sim) else {
        FALLBACK.fail("sim_destroy", &ShimError::UnknownSimulation);
        return NS3_ERR;
    };

    // SAFETY: the context was live until the retire above.
    let ctx = unsafe { &*ctx_ptr };
    if ctx.is_running() {
        ctx.defer_destroy();
        return NS3_OK;
    }

    // SAFETY: retired and not running, so nothing else references it.
    let freed = catch_unwind(AssertUnwindSafe(|| unsafe { SimContext::free(ctx_ptr) }));
    match freed {
        Ok(()) => NS3_OK,
        Err(payload) => {
            FALLBACK.fail("sim_destroy", &ShimError::from_panic(&*payload));
            NS3_ERR
        }
    }
}
