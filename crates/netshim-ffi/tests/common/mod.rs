//! Helpers shared by the ABI test binaries.

#![allow(dead_code)]

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use netshim_ffi::*;

/// Owned C string whose pointer stays valid while the value lives.
pub fn cs(text: &str) -> CString {
    CString::new(text).unwrap()
}

pub fn create() -> ns3_sim {
    let mut sim: ns3_sim = ptr::null_mut();
    assert_eq!(unsafe { sim_create(&mut sim) }, NS3_OK);
    assert!(!sim.is_null());
    sim
}

pub fn destroy(sim: ns3_sim) {
    assert_eq!(unsafe { sim_destroy(sim) }, NS3_OK);
}

pub fn last_error(sim: ns3_sim) -> String {
    let mut buf = [0 as c_char; 512];
    assert_eq!(unsafe { ns3_last_error(sim, buf.as_mut_ptr(), buf.len()) }, NS3_OK);
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_str()
        .unwrap()
        .to_string()
}

pub fn now(sim: ns3_sim) -> f64 {
    let mut t = -1.0;
    assert_eq!(unsafe { sim_now(sim, &mut t) }, NS3_OK);
    t
}

pub fn is_running(sim: ns3_sim) -> bool {
    let mut flag = -1;
    assert_eq!(unsafe { sim_is_running(sim, &mut flag) }, NS3_OK);
    flag != 0
}

pub fn nodes(sim: ns3_sim, count: u32) -> Vec<ns3_node> {
    let mut out = vec![ptr::null_mut(); count as usize];
    assert_eq!(unsafe { nodes_create(sim, count, out.as_mut_ptr()) }, NS3_OK);
    out
}

pub fn install_internet(sim: ns3_sim, nodes: &[ns3_node]) {
    assert_eq!(
        unsafe { internet_install(sim, nodes.as_ptr(), nodes.len() as u32) },
        NS3_OK
    );
}

pub fn p2p(sim: ns3_sim, a: ns3_node, b: ns3_node, rate: &str, delay: &str) -> [ns3_device; 2] {
    let (rate, delay) = (cs(rate), cs(delay));
    let mut dev_a: ns3_device = ptr::null_mut();
    let mut dev_b: ns3_device = ptr::null_mut();
    let status = unsafe {
        p2p_install(sim, a, b, rate.as_ptr(), delay.as_ptr(), 1500, &mut dev_a, &mut dev_b)
    };
    assert_eq!(status, NS3_OK, "{}", last_error(sim));
    [dev_a, dev_b]
}

pub fn assign(sim: ns3_sim, devices: &[ns3_device], network: &str, mask: &str) -> ns3_status {
    let (network, mask) = (cs(network), cs(mask));
    unsafe {
        ipv4_assign(
            sim,
            devices.as_ptr(),
            devices.len() as u32,
            network.as_ptr(),
            mask.as_ptr(),
        )
    }
}

/// Echo server on `server` port 9 and a client on `client` sending `count`
/// datagrams of 100 bytes to `server_ip`, one per second, both from t=1s.
pub fn echo(sim: ns3_sim, client: ns3_node, server: ns3_node, server_ip: &str, count: u32) {
    let server_ip = cs(server_ip);
    let mut server_app: ns3_app = ptr::null_mut();
    let mut client_app: ns3_app = ptr::null_mut();
    unsafe {
        assert_eq!(app_udpecho_server(sim, server, 9, &mut server_app), NS3_OK);
        let status = app_udpecho_client(
            sim,
            client,
            server_ip.as_ptr(),
            9,
            100,
            1.0,
            count,
            &mut client_app,
        );
        assert_eq!(status, NS3_OK);
        assert_eq!(app_start(sim, server_app, 1.0), NS3_OK);
        assert_eq!(app_start(sim, client_app, 1.0), NS3_OK);
    }
}

pub fn collect(sim: ns3_sim, monitor: ns3_flowmon) -> ns3_flow_stats {
    let mut stats = ns3_flow_stats::default();
    assert_eq!(unsafe { flowmon_collect(sim, monitor, &mut stats) }, NS3_OK);
    stats
}

pub fn install_monitor(sim: ns3_sim) -> ns3_flowmon {
    let mut monitor: ns3_flowmon = ptr::null_mut();
    assert_eq!(unsafe { flowmon_install_all(sim, &mut monitor) }, NS3_OK);
    monitor
}
