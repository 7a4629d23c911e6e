//! Flow monitoring.

use netshim_engine::flowmon;

use crate::abi::{ns3_flow_stats, ns3_flowmon, ns3_sim, ns3_status};
use crate::context::call;
use crate::out_ptr;

/// Install a flow monitor on every node that has an internet stack.
///
/// Nodes that gain a stack later are not monitored.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()`
/// - `out_flow_mon` must be valid for a handle write
#[no_mangle]
pub unsafe extern "C" fn flowmon_install_all(
    sim: ns3_sim,
    out_flow_mon: *mut ns3_flowmon,
) -> ns3_status {
    call("flowmon_install_all", sim, |ctx| {
        let out = out_ptr(out_flow_mon, "outFlowMon")?;
        let monitor = flowmon::install_all(&ctx.sim);
        let handle = ctx.register_monitor(monitor)?;
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(handle) };
        Ok(())
    })
}

/// Aggregate statistics over every flow the monitor has classified.
///
/// Packets in flight longer than the monitor's per-hop delay bound are
/// counted as lost first. `delaySumSec` and `jitterSumSec` are the sums of
/// per-packet end-to-end delay and of delay variation between consecutive
/// packets of a flow, reported separately.
///
/// # Safety
/// - `sim` must be a handle from `sim_create()` and `fm` a flow-monitor
///   handle from it
/// - `out_stats` must be valid for an `ns3_flow_stats` write
#[no_mangle]
pub unsafe extern "C" fn flowmon_collect(
    sim: ns3_sim,
    fm: ns3_flowmon,
    out_stats: *mut ns3_flow_stats,
) -> ns3_status {
    call("flowmon_collect", sim, |ctx| {
        let out = out_ptr(out_stats, "outStats")?;
        let monitor = ctx.monitor(fm)?;
        monitor.check_for_lost_packets(ctx.sim.now());
        let totals = monitor.totals();
        let stats = ns3_flow_stats {
            tx_packets: totals.tx_packets,
            rx_packets: totals.rx_packets,
            tx_bytes: totals.tx_bytes,
            rx_bytes: totals.rx_bytes,
            delay_sum_sec: totals.delay_sum.as_seconds(),
            jitter_sum_sec: totals.jitter_sum.as_seconds(),
            flow_count: totals.flow_count,
        };
        // SAFETY: checked non-null, validity is the caller's contract.
        unsafe { out.write(stats) };
        Ok(())
    })
}
