//! UDP echo applications and their start/stop times.

use std::net::SocketAddrV4;
use std::os::raw::c_char;

use netshim_engine::apps::{self, install_echo_client, install_echo_server};
use netshim_engine::internet::address::parse_ipv4;
use netshim_engine::Time;

use crate::abi::{ns3_app, ns3_node, ns3_sim, ns3_status};
use crate::context::call;
use crate::{c_str, out_ptr};

/// Install a UDP echo server on `node`, bound to `port` once it starts.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()` and `node` a node handle
///   from it
/// - `out_app` must be valid for a handle write
#[no_mangle]
pub unsafe extern "C" fn app_udpecho_server(
    sim: ns3_sim,
    node: ns3_node,
    port: u16,
    out_app: *mut ns3_app,
) -> ns3_status {
    call("app_udpecho_server", sim, |ctx| {
        let out = out_ptr(out_app, "outApp")?;
        let node = ctx.node(node)?;
        let app = install_echo_server(&ctx.sim, &node, port);
        let handle = ctx.register_app(app)?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(handle) };
        Ok(())
    })
}

/// Install a UDP echo client on `node` that sends `max_packets` datagrams of
/// `packet_size` bytes to `dst_ip:port`, one every `interval_sec` seconds.
///
/// # Arguments
/// - `dst_ip`: dotted-quad destination, e.g. `"10.1.1.2"`
/// - `max_packets`: 0 sends until the application stops
///
/// # Safety
/// - `sim` must be a handle from `sim_create()` and `node` a node handle
///   from it
/// - `dst_ip` must be a NUL-terminated string
/// - `out_app` must be valid for a handle write
#[no_mangle]
pub unsafe extern "C" fn app_udpecho_client(
    sim: ns3_sim,
    node: ns3_node,
    dst_ip: *const c_char,
    port: u16,
    packet_size: u32,
    interval_sec: f64,
    max_packets: u32,
    out_app: *mut ns3_app,
) -> ns3_status {
    call("app_udpecho_client", sim, |ctx| {
        // SAFETY: caller passes a NUL-terminated string or NULL.
        let dst_ip = unsafe { c_str(dst_ip, "dstIp") }?;
        let out = out_ptr(out_app, "outApp")?;
        let remote = SocketAddrV4::new(parse_ipv4("destination address", dst_ip)?, port);
        let interval = Time::from_seconds(interval_sec)?;
        let node = ctx.node(node)?;

        let app = install_echo_client(&ctx.sim, &node, remote, packet_size, interval, max_packets);
        let handle = ctx.register_app(app)?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(handle) };
        Ok(())
    })
}

/// Set the absolute simulation time at which an application starts.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()` and `app` an application
///   handle from it
#[no_mangle]
pub unsafe extern "C" fn app_start(sim: ns3_sim, app: ns3_app, at_time_sec: f64) -> ns3_status {
    call("app_start", sim, |ctx| {
        let at = Time::from_seconds(at_time_sec)?;
        apps::set_start_time(&ctx.sim, &ctx.app(app)?, at);
        Ok(())
    })
}

/// Set the absolute simulation time at which an application stops.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()` and `app` an application
///   handle from it
#[no_mangle]
pub unsafe extern "C" fn app_stop(sim: ns3_sim, app: ns3_app, at_time_sec: f64) -> ns3_status {
    call("app_stop", sim, |ctx| {
        let at = Time::from_seconds(at_time_sec)?;
        apps::set_stop_time(&ctx.sim, &ctx.app(app)?, at);
        Ok(())
    })
}
