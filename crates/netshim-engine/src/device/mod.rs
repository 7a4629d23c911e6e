//! Network devices and channels.
//!
//! Every device implements [`NetDevice`]: it accepts IP datagrams from the
//! node's IPv4 layer, frames them for its medium, serializes them onto a
//! channel and hands received datagrams back up. Each device exposes the
//! same set of trace sources ([`DeviceTraces`]), which is what packet
//! subscriptions and PCAP capture attach to.
//!
//! Three media are modelled:
//! - [`p2p`]: a full-duplex link between exactly two devices
//! - [`csma`]: a shared bus with carrier sense and random backoff
//! - [`wifi`]: an infrastructure BSS on a shared radio channel

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::attribute::HasAttributes;
use crate::node::Node;
use crate::packet::{Mac48, Packet};
use crate::trace::TracedCallback;
use crate::{EngineError, Simulator};

pub mod csma;
pub mod p2p;
mod shared;
pub mod wifi;

pub use shared::{SharedChannel, SharedNetDevice};

/// Medium family of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    PointToPoint,
    Csma,
    Wifi,
}

impl DeviceKind {
    /// libpcap `LINKTYPE_*` for frames of this medium.
    pub fn pcap_link_type(self) -> u32 {
        match self {
            DeviceKind::PointToPoint => 9,
            DeviceKind::Csma => 1,
            DeviceKind::Wifi => 105,
        }
    }
}

pub trait NetDevice: HasAttributes {
    fn kind(&self) -> DeviceKind;

    /// Owning node, or `None` once the simulator has been destroyed.
    fn node(&self) -> Option<Rc<Node>>;

    /// Index of this device in its node's device list.
    fn if_index(&self) -> u32;

    fn set_if_index(&self, index: u32);

    fn address(&self) -> Mac48;

    fn mtu(&self) -> u16;

    fn traces(&self) -> &DeviceTraces;

    fn channel(&self) -> Option<Rc<dyn Channel>>;

    /// Queues an IP datagram for transmission to `next_hop`. Returns `false`
    /// when the datagram was dropped.
    fn send(&self, sim: &Simulator, packet: Packet, next_hop: Ipv4Addr) -> bool;

    /// Packets waiting behind the one on the wire.
    fn queue_len(&self) -> usize;

    /// Detaches from the channel and drops queued packets and trace sinks.
    fn dispose(&self);
}

pub trait Channel: HasAttributes {
    fn devices(&self) -> Vec<Rc<dyn NetDevice>>;
}

// ============================================================================
// Trace sources
// ============================================================================

/// Trace sources shared by all device types.
#[derive(Debug, Default)]
pub struct DeviceTraces {
    /// A frame finished serializing onto the channel.
    pub phy_tx_end: TracedCallback<Packet>,
    /// A frame arrived from the channel.
    pub phy_rx_end: TracedCallback<Packet>,
    /// A frame was dropped before transmission (queue full, oversize, no
    /// channel).
    pub mac_tx_drop: TracedCallback<Packet>,
    /// Every frame sent or received, including frames addressed elsewhere.
    pub promisc_sniffer: TracedCallback<Packet>,
}

impl DeviceTraces {
    pub const NAMES: [&'static str; 4] = ["PhyTxEnd", "PhyRxEnd", "MacTxDrop", "PromiscSniffer"];

    /// Looks up a trace source by its registered name.
    pub fn source(&self, name: &str) -> Result<&TracedCallback<Packet>, EngineError> {
        match name {
            "PhyTxEnd" => Ok(&self.phy_tx_end),
            "PhyRxEnd" => Ok(&self.phy_rx_end),
            "MacTxDrop" => Ok(&self.mac_tx_drop),
            "PromiscSniffer" => Ok(&self.promisc_sniffer),
            _ => Err(EngineError::NoTraceSource {
                name: name.to_string(),
            }),
        }
    }

    pub(crate) fn disconnect_all(&self) {
        self.phy_tx_end.disconnect_all();
        self.phy_rx_end.disconnect_all();
        self.mac_tx_drop.disconnect_all();
        self.promisc_sniffer.disconnect_all();
    }
}

// ============================================================================
// Transmit queue
// ============================================================================

/// Drop-tail FIFO of frames waiting for the medium.
#[derive(Debug)]
pub struct TxQueue {
    packets: VecDeque<Packet>,
    max_packets: u32,
    dropped: u64,
}

impl TxQueue {
    pub fn new(max_packets: u32) -> Self {
        Self {
            packets: VecDeque::new(),
            max_packets,
            dropped: 0,
        }
    }

    /// Appends a frame, handing it back when the queue is full.
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), Packet> {
        if self.packets.len() >= self.max_packets as usize {
            self.dropped += 1;
            return Err(packet);
        }
        self.packets.push_back(packet);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn max_packets(&self) -> u32 {
        self.max_packets
    }

    /// Changes the capacity. Frames already queued stay queued.
    pub fn set_max_packets(&mut self, max_packets: u32) {
        self.max_packets = max_packets;
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Hands a received datagram to the IPv4 layer of the device's node.
pub(crate) fn forward_up(sim: &Simulator, device: &dyn NetDevice, packet: Packet) {
    let Some(node) = device.node() else {
        return;
    };
    match node.ipv4() {
        Some(ipv4) => ipv4.receive(sim, packet, device.if_index()),
        None => tracing::trace!(
            node = node.id(),
            device = device.if_index(),
            "frame received on node without internet stack"
        ),
    }
}

/// Reports a frame dropped before transmission.
pub(crate) fn drop_frame(sim: &Simulator, device: &dyn NetDevice, packet: &Packet, reason: &str) {
    tracing::warn!(
        node = device.node().map(|n| n.id()),
        device = device.if_index(),
        uid = packet.uid(),
        reason,
        "frame dropped"
    );
    device.traces().mac_tx_drop.fire(sim, packet);
}

/// Validates an MTU: at least 68 bytes (the IPv4 minimum) and no wider than 16 bits.
pub fn check_mtu(mtu: u64) -> Result<u16, EngineError> {
    match u16::try_from(mtu) {
        Ok(mtu) if mtu >= 68 => Ok(mtu),
        _ => Err(EngineError::invalid("MTU", mtu.to_string())),
    }
}
