//! Shared-medium devices.
//!
//! CSMA buses and Wi-Fi channels share one transmit engine: a device senses
//! the channel, defers by a random number of slots while it is busy, then
//! occupies it for the frame's airtime. Every other device on the channel
//! receives the frame after its propagation delay and keeps it only if the
//! frame is addressed to it.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use rand::Rng;

use super::wifi::{self, WifiRole, WifiState};
use super::{
    Channel, DeviceKind, DeviceTraces, NetDevice, TxQueue, check_mtu, drop_frame, forward_up,
};
use crate::attribute::{AttributeValue, HasAttributes};
use crate::node::Node;
use crate::packet::{LinkHeader, Mac48, Packet, WifiMacHeader};
use crate::rate::DataRate;
use crate::time::Time;
use crate::{EngineError, Simulator};

/// Attempts before a frame is abandoned.
const MAX_ATTEMPTS: u32 = 1000;
/// Backoff window stops doubling after this many attempts.
const BACKOFF_CEILING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Backoff,
    Transmitting,
}

pub(crate) enum Flavor {
    Csma,
    Wifi(WifiState),
}

pub struct SharedNetDevice {
    me: Weak<SharedNetDevice>,
    node: Weak<Node>,
    if_index: Cell<u32>,
    address: Mac48,
    mtu: Cell<u16>,
    queue: RefCell<TxQueue>,
    state: Cell<TxState>,
    attempts: Cell<u32>,
    channel: RefCell<Option<Rc<SharedChannel>>>,
    traces: DeviceTraces,
    flavor: Flavor,
}

impl SharedNetDevice {
    pub(crate) fn new(sim: &Simulator, node: &Rc<Node>, mtu: u16, flavor: Flavor) -> Rc<Self> {
        let address = sim.allocate_mac();
        let queue = TxQueue::new(sim.config().queue.max_packets);
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            node: Rc::downgrade(node),
            if_index: Cell::new(0),
            address,
            mtu: Cell::new(mtu),
            queue: RefCell::new(queue),
            state: Cell::new(TxState::Idle),
            attempts: Cell::new(0),
            channel: RefCell::new(None),
            traces: DeviceTraces::default(),
            flavor,
        })
    }

    pub fn attach(&self, channel: &Rc<SharedChannel>) {
        channel.devices.borrow_mut().push(self.me.clone());
        *self.channel.borrow_mut() = Some(Rc::clone(channel));
    }

    /// Wi-Fi MAC/PHY state, `None` on a CSMA device.
    pub fn wifi(&self) -> Option<&WifiState> {
        match &self.flavor {
            Flavor::Wifi(state) => Some(state),
            Flavor::Csma => None,
        }
    }

    fn shared_channel(&self) -> Option<Rc<SharedChannel>> {
        self.channel.borrow().clone()
    }

    fn slot_time(&self) -> Time {
        match &self.flavor {
            Flavor::Csma => Time::from_micros(1),
            Flavor::Wifi(state) => state.slot_time(),
        }
    }

    fn airtime(&self, channel: &SharedChannel, bytes: u32) -> Time {
        match &self.flavor {
            Flavor::Csma => channel.data_rate.get().tx_time(bytes),
            Flavor::Wifi(state) => state.airtime(bytes),
        }
    }

    /// Finds the MAC address of the device on this channel that owns `next_hop`.
    fn resolve(&self, channel: &SharedChannel, next_hop: Ipv4Addr) -> Option<Mac48> {
        if next_hop.is_broadcast() {
            return Some(Mac48::BROADCAST);
        }
        channel.peers().into_iter().find_map(|device| {
            let ipv4 = device.node()?.ipv4()?;
            ipv4.owns_address_on(device.if_index(), next_hop)
                .then_some(device.address())
        })
    }

    fn frame(&self, dst: Mac48) -> LinkHeader {
        match &self.flavor {
            Flavor::Csma => LinkHeader::Ethernet {
                src: self.address,
                dst,
            },
            Flavor::Wifi(state) => match state.role() {
                WifiRole::Station => LinkHeader::Wifi(WifiMacHeader {
                    to_ds: true,
                    from_ds: false,
                    addr1: state.access_point(),
                    addr2: self.address,
                    addr3: dst,
                }),
                WifiRole::AccessPoint => LinkHeader::Wifi(WifiMacHeader {
                    to_ds: false,
                    from_ds: true,
                    addr1: dst,
                    addr2: self.address,
                    addr3: self.address,
                }),
            },
        }
    }

    fn enqueue(&self, sim: &Simulator, packet: Packet) -> bool {
        let rejected = self.queue.borrow_mut().enqueue(packet);
        if let Err(packet) = rejected {
            drop_frame(sim, self, &packet, "transmit queue full");
            return false;
        }
        if self.state.get() == TxState::Idle {
            self.try_transmit(sim);
        }
        true
    }

    // ========================================================================
    // Channel access
    // ========================================================================

    fn try_transmit(&self, sim: &Simulator) {
        let (Some(channel), Some(me)) = (self.shared_channel(), self.me.upgrade()) else {
            self.state.set(TxState::Idle);
            return;
        };
        let now = sim.now();

        if channel.busy_until.get() > now {
            let attempts = self.attempts.get() + 1;
            if attempts > MAX_ATTEMPTS {
                self.attempts.set(0);
                self.state.set(TxState::Idle);
                let head = self.queue.borrow_mut().dequeue();
                if let Some(packet) = head {
                    drop_frame(sim, self, &packet, "channel access failed");
                }
                if !self.queue.borrow().is_empty() {
                    sim.schedule_now(move |sim| me.try_transmit(sim));
                }
                return;
            }
            self.attempts.set(attempts);
            let window = (1u64 << attempts.min(BACKOFF_CEILING)) - 1;
            let slots = sim.with_rng(|rng| rng.gen_range(0..=window));
            let wait = (channel.busy_until.get() - now)
                + Time::from_nanos(self.slot_time().as_nanos() * slots);
            self.state.set(TxState::Backoff);
            tracing::trace!(
                device = self.if_index.get(),
                attempts,
                wait = %wait,
                "channel busy, backing off"
            );
            sim.schedule(wait, move |sim| me.try_transmit(sim));
            return;
        }

        let next = self.queue.borrow_mut().dequeue();
        let Some(packet) = next else {
            self.state.set(TxState::Idle);
            return;
        };
        self.attempts.set(0);
        self.state.set(TxState::Transmitting);
        let airtime = self.airtime(&channel, packet.size());
        channel.busy_until.set(now + airtime);
        tracing::trace!(
            node = self.node.upgrade().map(|n| n.id()),
            device = self.if_index.get(),
            uid = packet.uid(),
            bytes = packet.size(),
            "transmit start"
        );
        self.traces.promisc_sniffer.fire(sim, &packet);
        channel.transmit(sim, self, &packet, airtime);
        sim.schedule(airtime, move |sim| me.transmit_complete(sim, packet));
    }

    fn transmit_complete(&self, sim: &Simulator, packet: Packet) {
        self.state.set(TxState::Idle);
        self.traces.phy_tx_end.fire(sim, &packet);
        if !self.queue.borrow().is_empty() {
            self.try_transmit(sim);
        }
    }

    // ========================================================================
    // Reception
    // ========================================================================

    fn receive(&self, sim: &Simulator, mut packet: Packet) {
        self.traces.phy_rx_end.fire(sim, &packet);
        self.traces.promisc_sniffer.fire(sim, &packet);
        match packet.link().copied() {
            Some(LinkHeader::Ethernet { dst, .. }) => {
                if dst == self.address || dst.is_broadcast() {
                    packet.remove_link();
                    forward_up(sim, self, packet);
                }
            }
            Some(LinkHeader::Wifi(mac)) => self.receive_wifi(sim, packet, mac),
            _ => {}
        }
    }

    fn receive_wifi(&self, sim: &Simulator, mut packet: Packet, mac: WifiMacHeader) {
        if mac.addr1 != self.address && !mac.addr1.is_broadcast() {
            return;
        }
        let Some(state) = self.wifi() else {
            return;
        };
        match state.role() {
            WifiRole::AccessPoint if mac.to_ds => {
                let destination = mac.addr3;
                if destination != self.address {
                    // Relay into the BSS on behalf of the station.
                    let mut relay = packet.clone();
                    relay.set_link(LinkHeader::Wifi(WifiMacHeader {
                        to_ds: false,
                        from_ds: true,
                        addr1: destination,
                        addr2: self.address,
                        addr3: mac.addr2,
                    }));
                    self.enqueue(sim, relay);
                }
                if destination == self.address || destination.is_broadcast() {
                    packet.remove_link();
                    forward_up(sim, self, packet);
                }
            }
            WifiRole::AccessPoint => {}
            WifiRole::Station => {
                // Our own broadcast coming back from the AP.
                if mac.from_ds && mac.addr3 == self.address {
                    return;
                }
                packet.remove_link();
                forward_up(sim, self, packet);
            }
        }
    }
}

impl HasAttributes for SharedNetDevice {
    fn type_name(&self) -> &'static str {
        match self.flavor {
            Flavor::Csma => "ns3::CsmaNetDevice",
            Flavor::Wifi(_) => "ns3::WifiNetDevice",
        }
    }

    fn is_type(&self, type_name: &str) -> bool {
        type_name == self.type_name() || type_name == "ns3::NetDevice"
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match (name, &self.flavor) {
            ("Mtu", _) => self.mtu.set(check_mtu(value.to_u64(name)?)?),
            ("TxQueueMaxPackets", _) => {
                let max = value.to_u32(name)?;
                if max == 0 {
                    return Err(EngineError::invalid("queue size", "0"));
                }
                self.queue.borrow_mut().set_max_packets(max);
            }
            ("DataMode", Flavor::Wifi(state)) => match value {
                AttributeValue::String(mode) => state.set_mode(mode)?,
                other => {
                    return Err(EngineError::AttributeType {
                        name: name.to_string(),
                        found: other.kind_name(),
                    });
                }
            },
            _ => return Err(self.unknown_attribute(name)),
        }
        Ok(())
    }
}

impl NetDevice for SharedNetDevice {
    fn kind(&self) -> DeviceKind {
        match self.flavor {
            Flavor::Csma => DeviceKind::Csma,
            Flavor::Wifi(_) => DeviceKind::Wifi,
        }
    }

    fn node(&self) -> Option<Rc<Node>> {
        self.node.upgrade()
    }

    fn if_index(&self) -> u32 {
        self.if_index.get()
    }

    fn set_if_index(&self, index: u32) {
        self.if_index.set(index);
    }

    fn address(&self) -> Mac48 {
        self.address
    }

    fn mtu(&self) -> u16 {
        self.mtu.get()
    }

    fn traces(&self) -> &DeviceTraces {
        &self.traces
    }

    fn channel(&self) -> Option<Rc<dyn Channel>> {
        self.shared_channel()
            .map(|channel| channel as Rc<dyn Channel>)
    }

    fn send(&self, sim: &Simulator, mut packet: Packet, next_hop: Ipv4Addr) -> bool {
        if packet.ip_size() > u32::from(self.mtu.get()) {
            drop_frame(sim, self, &packet, "larger than MTU");
            return false;
        }
        let Some(channel) = self.shared_channel() else {
            drop_frame(sim, self, &packet, "device not attached");
            return false;
        };
        let Some(dst) = self.resolve(&channel, next_hop) else {
            drop_frame(sim, self, &packet, "next hop not on channel");
            return false;
        };
        packet.set_link(self.frame(dst));
        self.enqueue(sim, packet)
    }

    fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }

    fn dispose(&self) {
        self.channel.take();
        self.queue.borrow_mut().clear();
        self.traces.disconnect_all();
    }
}

// ============================================================================
// Channel
// ============================================================================

/// A broadcast medium shared by every attached device.
pub struct SharedChannel {
    kind: DeviceKind,
    /// Bus rate; Wi-Fi devices use their own PHY mode instead.
    data_rate: Cell<DataRate>,
    /// Bus propagation delay; Wi-Fi derives it from node positions.
    delay: Cell<Time>,
    busy_until: Cell<Time>,
    devices: RefCell<Vec<Weak<SharedNetDevice>>>,
}

impl SharedChannel {
    pub(crate) fn new(kind: DeviceKind, data_rate: DataRate, delay: Time) -> Rc<Self> {
        Rc::new(Self {
            kind,
            data_rate: Cell::new(data_rate),
            delay: Cell::new(delay),
            busy_until: Cell::new(Time::ZERO),
            devices: RefCell::new(Vec::new()),
        })
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate.get()
    }

    pub fn delay(&self) -> Time {
        self.delay.get()
    }

    fn peers(&self) -> Vec<Rc<SharedNetDevice>> {
        self.devices
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn propagation_delay(&self, from: &SharedNetDevice, to: &SharedNetDevice) -> Time {
        match self.kind {
            DeviceKind::Wifi => match (from.node(), to.node()) {
                (Some(a), Some(b)) => wifi::propagation_delay(&a, &b),
                _ => Time::ZERO,
            },
            _ => self.delay.get(),
        }
    }

    fn transmit(&self, sim: &Simulator, sender: &SharedNetDevice, packet: &Packet, airtime: Time) {
        for peer in self.peers() {
            if std::ptr::eq(Rc::as_ptr(&peer), sender) {
                continue;
            }
            let arrival = airtime + self.propagation_delay(sender, &peer);
            let packet = packet.clone();
            sim.schedule(arrival, move |sim| peer.receive(sim, packet));
        }
    }
}

impl HasAttributes for SharedChannel {
    fn type_name(&self) -> &'static str {
        match self.kind {
            DeviceKind::Wifi => "ns3::YansWifiChannel",
            _ => "ns3::CsmaChannel",
        }
    }

    fn is_type(&self, type_name: &str) -> bool {
        type_name == self.type_name() || type_name == "ns3::Channel"
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match (name, self.kind) {
            ("DataRate", DeviceKind::Csma) => self.data_rate.set(value.to_data_rate(name)?),
            ("Delay", DeviceKind::Csma) => self.delay.set(value.to_time(name)?),
            _ => return Err(self.unknown_attribute(name)),
        }
        Ok(())
    }
}

impl Channel for SharedChannel {
    fn devices(&self) -> Vec<Rc<dyn NetDevice>> {
        self.peers()
            .into_iter()
            .map(|device| device as Rc<dyn NetDevice>)
            .collect()
    }
}
