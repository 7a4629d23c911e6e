//! Calls that name no live simulation.
//!
//! The fallback slot is process-wide, so everything here runs sequentially in
//! a single test.

mod common;

use std::ptr;

use common::*;
use netshim_ffi::*;

#[test]
fn test_stale_and_missing_contexts() {
    // NULL context.
    let mut t = 0.0;
    assert_eq!(unsafe { sim_now(ptr::null_mut(), &mut t) }, NS3_ERR);
    assert_eq!(last_error(ptr::null_mut()), "No simulation context");

    // Destroyed context: calls fail without touching it, including a second
    // destroy, even after a newer context takes over the freed memory.
    let stale = create();
    destroy(stale);
    let live = create();
    assert_ne!(stale, live);

    assert_eq!(unsafe { sim_now(stale, &mut t) }, NS3_ERR);
    assert_eq!(
        last_error(stale),
        "sim_now failed: unknown simulation handle"
    );
    assert_eq!(unsafe { sim_destroy(stale) }, NS3_ERR);
    assert_eq!(
        last_error(stale),
        "sim_destroy failed: unknown simulation handle"
    );
    assert_eq!(unsafe { sim_run(stale) }, NS3_ERR);

    // The newer simulation is untouched by calls on the stale handle.
    assert_eq!(now(live), 0.0);
    assert_eq!(last_error(live), "");
    let pair = nodes(live, 2);
    install_internet(live, &pair);
    assert_eq!(unsafe { sim_run(live) }, NS3_OK);
    assert_eq!(last_error(live), "");

    // Repeated create/destroy never resurrects the stale handle.
    for _ in 0..16 {
        let fresh = create();
        assert_ne!(fresh, stale);
        destroy(fresh);
        assert_eq!(unsafe { sim_now(stale, &mut t) }, NS3_ERR);
    }

    // Configuration failures land in the fallback slot too.
    let bad = cs("[queue]\nmax_packets = 0\n");
    let mut sim: ns3_sim = ptr::null_mut();
    assert_eq!(unsafe { sim_create_with_config(bad.as_ptr(), &mut sim) }, NS3_ERR);
    assert!(sim.is_null());
    let message = last_error(stale);
    assert!(
        message.starts_with("sim_create_with_config failed: invalid configuration"),
        "{message}"
    );

    let malformed = cs("[simulator\nseed = ");
    assert_eq!(
        unsafe { sim_create_with_config(malformed.as_ptr(), &mut sim) },
        NS3_ERR
    );
    assert!(sim.is_null());
    assert!(last_error(stale).starts_with("sim_create_with_config failed:"));

    destroy(live);
}
