//! Packet trace subscriptions and PCAP capture.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::rc::{Rc, Weak};

use netshim_engine::{pcap, Packet, Simulator};

use crate::abi::{ns3_device, ns3_pkt_cb, ns3_sim, ns3_status};
use crate::context::call;
use crate::{c_str, handle};

/// Foreign callbacks bound to one device's transmit and receive traces.
///
/// Owned by the simulation context; the trace sinks hold only weak
/// references, so the record dies with the context.
pub struct PacketTraceAdapter {
    on_tx: ns3_pkt_cb,
    on_rx: ns3_pkt_cb,
    user: *mut c_void,
    device_id: u64,
}

impl PacketTraceAdapter {
    fn deliver(&self, callback: ns3_pkt_cb, sim: &Simulator, packet: &Packet) {
        if let Some(callback) = callback {
            // SAFETY: the caller supplied the function and its context when
            // subscribing and keeps both valid for the simulation's lifetime.
            unsafe { callback(self.user, self.device_id, sim.now().as_seconds(), packet.size()) };
        }
    }
}

/// Subscribe to packet TX/RX events on a device.
///
/// `onTx` fires when a frame finishes serializing onto the channel
/// (`PhyTxEnd`), `onRx` when a frame arrives (`PhyRxEnd`). Each receives the
/// device id assigned at registration, the simulation time of the event in
/// seconds and the frame size in bytes. A NULL callback leaves that side
/// unsubscribed; both NULL is a successful no-op.
///
/// # Safety
/// - `sim` must be a simulation handle and `dev` a device handle from it
/// - the callbacks and `user` must remain valid until `sim_destroy`
#[no_mangle]
pub unsafe extern "C" fn trace_subscribe_packet_events(
    sim: ns3_sim,
    dev: ns3_device,
    on_tx: ns3_pkt_cb,
    on_rx: ns3_pkt_cb,
    user: *mut c_void,
) -> ns3_status {
    call("trace_subscribe_packet_events", sim, |ctx| {
        let device = ctx.device(dev)?;
        if on_tx.is_none() && on_rx.is_none() {
            return Ok(());
        }

        let adapter = Rc::new(PacketTraceAdapter {
            on_tx,
            on_rx,
            user,
            device_id: handle::decode(dev).1,
        });
        let traces = device.traces();
        if on_tx.is_some() {
            let weak = Rc::downgrade(&adapter);
            traces.phy_tx_end.connect(move |sim, packet| {
                if let Some(adapter) = Weak::upgrade(&weak) {
                    adapter.deliver(adapter.on_tx, sim, packet);
                }
            });
        }
        if on_rx.is_some() {
            let weak = Rc::downgrade(&adapter);
            traces.phy_rx_end.connect(move |sim, packet| {
                if let Some(adapter) = Weak::upgrade(&weak) {
                    adapter.deliver(adapter.on_rx, sim, packet);
                }
            });
        }
        tracing::debug!(
            device = adapter.device_id,
            tx = on_tx.is_some(),
            rx = on_rx.is_some(),
            "packet trace subscribed"
        );
        ctx.trace_adapters.borrow_mut().push(adapter);
        Ok(())
    })
}

/// Enable PCAP capture on a device.
///
/// Frames the device sends or sees are written to
/// `<pcap.directory>/<filePrefix>-<node>-<device>.pcap` with the link type of
/// the device's medium.
///
/// # Safety
/// - `sim` must be a simulation handle and `dev` a device handle from it
/// - `file_prefix` must be a NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn pcap_enable(
    sim: ns3_sim,
    dev: ns3_device,
    file_prefix: *const c_char,
) -> ns3_status {
    call("pcap_enable", sim, |ctx| {
        // SAFETY: caller passes a NUL-terminated string or NULL.
        let prefix = unsafe { c_str(file_prefix, "filePrefix") }?;
        let device = ctx.device(dev)?;
        pcap::enable_pcap(&ctx.sim, &device, prefix)?;
        Ok(())
    })
}
