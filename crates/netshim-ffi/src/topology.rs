//! Nodes, links, mobility, addressing and routing.

use std::os::raw::{c_char, c_int};
use std::rc::Rc;

use netshim_engine::device::csma::CsmaHelper;
use netshim_engine::device::p2p::PointToPointHelper;
use netshim_engine::device::wifi::{self, WifiHelper};
use netshim_engine::device::check_mtu;
use netshim_engine::internet::address::parse_ipv4;
use netshim_engine::internet::populate_routing_tables;
use netshim_engine::mobility::set_constant_position;
use netshim_engine::{DataRate, NetDevice, Node, Time, Vector3};

use crate::abi::{ns3_device, ns3_node, ns3_sim, ns3_status};
use crate::context::{call, SimContext};
use crate::error::ShimError;
use crate::{c_str, in_array, out_ptr, write_array};

fn resolve_nodes(ctx: &SimContext, handles: &[ns3_node]) -> Result<Vec<Rc<Node>>, ShimError> {
    handles.iter().map(|&handle| ctx.node(handle)).collect()
}

fn register_devices<D: NetDevice + 'static>(
    ctx: &SimContext,
    devices: &[Rc<D>],
) -> Result<Vec<ns3_device>, ShimError> {
    devices
        .iter()
        .map(|device| ctx.register_device(device.clone()))
        .collect()
}

/// Create `count` nodes.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `out_array` must have room for `count` handles
#[no_mangle]
pub unsafe extern "C" fn nodes_create(
    sim: ns3_sim,
    count: u32,
    out_array: *mut ns3_node,
) -> ns3_status {
    call("nodes_create", sim, |ctx| {
        let out = out_ptr(out_array, "outArray")?;
        if count == 0 {
            return Err(ShimError::ZeroCount("count"));
        }
        let handles = ctx
            .sim
            .create_nodes(count)
            .into_iter()
            .map(|node| ctx.register_node(node))
            .collect::<Result<Vec<_>, _>>()?;
        // SAFETY: `out` holds `count` slots by contract.
        unsafe { write_array(out, &handles) };
        Ok(())
    })
}

/// Install the IPv4/UDP stack on nodes. Nodes that already have one are
/// skipped.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `nodes` must hold `count` node handles
#[no_mangle]
pub unsafe extern "C" fn internet_install(
    sim: ns3_sim,
    nodes: *const ns3_node,
    count: u32,
) -> ns3_status {
    call("internet_install", sim, |ctx| {
        // SAFETY: caller contract on `nodes`/`count`.
        let handles = unsafe { in_array(nodes, count, "nodes", "count") }?;
        let nodes = resolve_nodes(ctx, handles)?;
        let installed = ctx.stack.borrow_mut().install(&ctx.sim, &nodes);
        tracing::debug!(requested = nodes.len(), installed, "internet stack installed");
        Ok(())
    })
}

/// Join two nodes with a point-to-point link.
///
/// # Arguments
/// - `data_rate`: e.g. `"5Mbps"`
/// - `delay`: channel propagation delay, e.g. `"2ms"`
/// - `mtu`: device MTU in bytes (68 to 65535)
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`; `a` and `b` node handles
///   from it
/// - `data_rate` and `delay` must be NUL-terminated strings
/// - `out_dev_a` and `out_dev_b` must be valid for a handle write
#[no_mangle]
pub unsafe extern "C" fn p2p_install(
    sim: ns3_sim,
    a: ns3_node,
    b: ns3_node,
    data_rate: *const c_char,
    delay: *const c_char,
    mtu: u32,
    out_dev_a: *mut ns3_device,
    out_dev_b: *mut ns3_device,
) -> ns3_status {
    call("p2p_install", sim, |ctx| {
        // SAFETY: caller passes NUL-terminated strings or NULL.
        let (data_rate, delay) = unsafe { (c_str(data_rate, "dataRate")?, c_str(delay, "delay")?) };
        let out_a = out_ptr(out_dev_a, "outDevA")?;
        let out_b = out_ptr(out_dev_b, "outDevB")?;
        let node_a = ctx.node(a)?;
        let node_b = ctx.node(b)?;

        let helper = PointToPointHelper::new(data_rate.parse::<DataRate>()?, delay.parse::<Time>()?)
            .with_mtu(check_mtu(u64::from(mtu))?);
        let (dev_a, dev_b) = helper.install(&ctx.sim, &node_a, &node_b);
        let handle_a = ctx.register_device(dev_a)?;
        let handle_b = ctx.register_device(dev_b)?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe {
            out_a.write(handle_a);
            out_b.write(handle_b);
        }
        Ok(())
    })
}

/// Attach every node to one shared CSMA bus.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `nodes` must hold `count` node handles and `out_devices` room for
///   `count` device handles
/// - `data_rate` and `delay` must be NUL-terminated strings
#[no_mangle]
pub unsafe extern "C" fn csma_install(
    sim: ns3_sim,
    nodes: *const ns3_node,
    count: u32,
    data_rate: *const c_char,
    delay: *const c_char,
    out_devices: *mut ns3_device,
) -> ns3_status {
    call("csma_install", sim, |ctx| {
        // SAFETY: caller contract on arrays and strings.
        let (handles, data_rate, delay) = unsafe {
            (
                in_array(nodes, count, "nodes", "count")?,
                c_str(data_rate, "dataRate")?,
                c_str(delay, "delay")?,
            )
        };
        let out = out_ptr(out_devices, "outDevices")?;
        let nodes = resolve_nodes(ctx, handles)?;

        let devices = CsmaHelper::new(data_rate.parse()?, delay.parse()?).install(&ctx.sim, &nodes);
        let handles = register_devices(ctx, &devices)?;
        // SAFETY: `out` holds `count` slots by contract.
        unsafe { write_array(out, &handles) };
        Ok(())
    })
}

/// Build an infrastructure Wi-Fi network: one device per station and one
/// access point, all on a fresh channel.
///
/// # Arguments
/// - `phy_standard`: 0=802.11a, 1=802.11b, 2=802.11g, 3=802.11n 2.4 GHz,
///   4=802.11n 5 GHz, 5=802.11ac; other values select the configured default
/// - `data_rate`: a rate (`"54Mbps"`) or a mode name (`"HtMcs7"`)
/// - `channel_number`: 0 for the band's default, otherwise a valid channel
///   for the band
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `stas` must hold `sta_count` node handles and `out_sta_devices` room for
///   `sta_count` device handles
/// - `data_rate` must be a NUL-terminated string
/// - `out_ap_device` must be valid for a handle write
#[no_mangle]
pub unsafe extern "C" fn wifi_install_sta_ap(
    sim: ns3_sim,
    stas: *const ns3_node,
    sta_count: u32,
    ap: ns3_node,
    phy_standard: c_int,
    data_rate: *const c_char,
    channel_number: c_int,
    out_sta_devices: *mut ns3_device,
    out_ap_device: *mut ns3_device,
) -> ns3_status {
    call("wifi_install_sta_ap", sim, |ctx| {
        // SAFETY: caller contract on arrays and strings.
        let (handles, data_rate) = unsafe {
            (
                in_array(stas, sta_count, "stas", "staCount")?,
                c_str(data_rate, "dataRate")?,
            )
        };
        let out_stations = out_ptr(out_sta_devices, "outStaDevices")?;
        let out_ap = out_ptr(out_ap_device, "outApDevice")?;
        let stations = resolve_nodes(ctx, handles)?;
        let ap = ctx.node(ap)?;

        let config = &ctx.sim.config().wifi;
        let standard = wifi::standard_from_code(phy_standard, config.default_standard);
        let helper = WifiHelper::new(standard, data_rate, channel_number, config.ssid.clone())?;
        let (station_devices, ap_device) = helper.install_sta_ap(&ctx.sim, &stations, &ap);

        let station_handles = register_devices(ctx, &station_devices)?;
        let ap_handle = ctx.register_device(ap_device)?;
        // SAFETY: output sizes are the caller's contract.
        unsafe {
            write_array(out_stations, &station_handles);
            out_ap.write(ap_handle);
        }
        Ok(())
    })
}

/// Place a node at a fixed position (meters), installing a
/// constant-position mobility model if it has none.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()` and `node` a node handle
///   from it
#[no_mangle]
pub unsafe extern "C" fn mobility_set_constant_position(
    sim: ns3_sim,
    node: ns3_node,
    x: f64,
    y: f64,
    z: f64,
) -> ns3_status {
    call("mobility_set_constant_position", sim, |ctx| {
        let node = ctx.node(node)?;
        set_constant_position(&node, Vector3::new(x, y, z))?;
        Ok(())
    })
}

/// Assign consecutive host addresses from `network_base`/`mask` to devices.
///
/// Successive calls with the same network continue where the previous one
/// stopped, so addresses are never handed out twice. The assignment is
/// all-or-nothing.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `devices` must hold `count` device handles
/// - `network_base` and `mask` must be NUL-terminated dotted quads
#[no_mangle]
pub unsafe extern "C" fn ipv4_assign(
    sim: ns3_sim,
    devices: *const ns3_device,
    count: u32,
    network_base: *const c_char,
    mask: *const c_char,
) -> ns3_status {
    call("ipv4_assign", sim, |ctx| {
        // SAFETY: caller contract on arrays and strings.
        let (handles, network, mask) = unsafe {
            (
                in_array(devices, count, "devices", "count")?,
                c_str(network_base, "networkBase")?,
                c_str(mask, "mask")?,
            )
        };
        let network = parse_ipv4("network address", network)?;
        let mask = parse_ipv4("network mask", mask)?;
        let devices = handles
            .iter()
            .map(|&handle| ctx.device(handle))
            .collect::<Result<Vec<_>, _>>()?;

        ctx.addresses.borrow_mut().assign(network, mask, &devices)?;
        Ok(())
    })
}

/// Compute shortest-path routes between every pair of addressed nodes.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
#[no_mangle]
pub unsafe extern "C" fn ipv4_populate_routing_tables(sim: ns3_sim) -> ns3_status {
    call("ipv4_populate_routing_tables", sim, |ctx| {
        let routes = populate_routing_tables(&ctx.sim);
        tracing::debug!(routes, "routing tables populated");
        Ok(())
    })
}
