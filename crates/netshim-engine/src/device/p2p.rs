//! Point-to-point links.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use super::{
    Channel, DeviceKind, DeviceTraces, NetDevice, TxQueue, check_mtu, drop_frame, forward_up,
};
use crate::attribute::{AttributeValue, HasAttributes};
use crate::node::Node;
use crate::packet::{LinkHeader, Mac48, Packet};
use crate::rate::DataRate;
use crate::time::Time;
use crate::{EngineError, Simulator};

pub const DEFAULT_MTU: u16 = 1500;

pub struct PointToPointNetDevice {
    me: Weak<PointToPointNetDevice>,
    node: Weak<Node>,
    if_index: Cell<u32>,
    address: Mac48,
    data_rate: Cell<DataRate>,
    mtu: Cell<u16>,
    queue: RefCell<TxQueue>,
    transmitting: Cell<bool>,
    channel: RefCell<Option<Rc<PointToPointChannel>>>,
    traces: DeviceTraces,
}

impl PointToPointNetDevice {
    pub fn new(sim: &Simulator, node: &Rc<Node>, data_rate: DataRate, mtu: u16) -> Rc<Self> {
        let address = sim.allocate_mac();
        let queue = TxQueue::new(sim.config().queue.max_packets);
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            node: Rc::downgrade(node),
            if_index: Cell::new(0),
            address,
            data_rate: Cell::new(data_rate),
            mtu: Cell::new(mtu),
            queue: RefCell::new(queue),
            transmitting: Cell::new(false),
            channel: RefCell::new(None),
            traces: DeviceTraces::default(),
        })
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate.get()
    }

    pub fn attach(&self, channel: &Rc<PointToPointChannel>) {
        channel.ends.borrow_mut().push(self.me.clone());
        *self.channel.borrow_mut() = Some(Rc::clone(channel));
    }

    fn transmit_start(&self, sim: &Simulator, packet: Packet) {
        let channel = self.channel.borrow().clone();
        let (Some(channel), Some(me)) = (channel, self.me.upgrade()) else {
            drop_frame(sim, self, &packet, "device not attached");
            return;
        };
        self.transmitting.set(true);
        let tx_time = self.data_rate.get().tx_time(packet.size());
        tracing::trace!(
            node = self.node.upgrade().map(|n| n.id()),
            device = self.if_index.get(),
            uid = packet.uid(),
            bytes = packet.size(),
            "transmit start"
        );
        self.traces.promisc_sniffer.fire(sim, &packet);
        channel.transmit(sim, self, packet.clone(), tx_time);
        sim.schedule(tx_time, move |sim| me.transmit_complete(sim, packet));
    }

    fn transmit_complete(&self, sim: &Simulator, packet: Packet) {
        self.transmitting.set(false);
        self.traces.phy_tx_end.fire(sim, &packet);
        let next = self.queue.borrow_mut().dequeue();
        if let Some(next) = next {
            self.transmit_start(sim, next);
        }
    }

    fn receive(&self, sim: &Simulator, mut packet: Packet) {
        self.traces.phy_rx_end.fire(sim, &packet);
        self.traces.promisc_sniffer.fire(sim, &packet);
        packet.remove_link();
        forward_up(sim, self, packet);
    }
}

impl HasAttributes for PointToPointNetDevice {
    fn type_name(&self) -> &'static str {
        "ns3::PointToPointNetDevice"
    }

    fn is_type(&self, type_name: &str) -> bool {
        matches!(type_name, "ns3::PointToPointNetDevice" | "ns3::NetDevice")
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match name {
            "Mtu" => self.mtu.set(check_mtu(value.to_u64(name)?)?),
            "DataRate" => self.data_rate.set(value.to_data_rate(name)?),
            "TxQueueMaxPackets" => {
                let max = value.to_u32(name)?;
                if max == 0 {
                    return Err(EngineError::invalid("queue size", "0"));
                }
                self.queue.borrow_mut().set_max_packets(max);
            }
            _ => return Err(self.unknown_attribute(name)),
        }
        Ok(())
    }
}

impl NetDevice for PointToPointNetDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::PointToPoint
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
        self.channel
            .borrow()
            .clone()
            .map(|channel| channel as Rc<dyn Channel>)
    }

    fn send(&self, sim: &Simulator, mut packet: Packet, _next_hop: Ipv4Addr) -> bool {
        if packet.ip_size() > u32::from(self.mtu.get()) {
            drop_frame(sim, self, &packet, "larger than MTU");
            return false;
        }
        packet.set_link(LinkHeader::Ppp);
        if !self.transmitting.get() {
            self.transmit_start(sim, packet);
            return true;
        }
        let rejected = self.queue.borrow_mut().enqueue(packet);
        match rejected {
            Ok(()) => true,
            Err(packet) => {
                drop_frame(sim, self, &packet, "transmit queue full");
                false
            }
        }
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

/// A full-duplex wire with a fixed propagation delay.
pub struct PointToPointChannel {
    delay: Cell<Time>,
    ends: RefCell<Vec<Weak<PointToPointNetDevice>>>,
}

impl PointToPointChannel {
    pub fn new(delay: Time) -> Rc<Self> {
        Rc::new(Self {
            delay: Cell::new(delay),
            ends: RefCell::new(Vec::new()),
        })
    }

    pub fn delay(&self) -> Time {
        self.delay.get()
    }

    /// Delivers `packet` to the far end once it is fully serialized and has
    /// propagated.
    fn transmit(
        &self,
        sim: &Simulator,
        sender: &PointToPointNetDevice,
        packet: Packet,
        tx_time: Time,
    ) {
        let peer = self
            .ends
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|end| !std::ptr::eq(Rc::as_ptr(end), sender));
        match peer {
            Some(peer) => {
                sim.schedule(tx_time + self.delay.get(), move |sim| peer.receive(sim, packet));
            }
            None => tracing::trace!(uid = packet.uid(), "point-to-point channel has no peer"),
        }
    }
}

impl HasAttributes for PointToPointChannel {
    fn type_name(&self) -> &'static str {
        "ns3::PointToPointChannel"
    }

    fn is_type(&self, type_name: &str) -> bool {
        matches!(type_name, "ns3::PointToPointChannel" | "ns3::Channel")
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match name {
            "Delay" => self.delay.set(value.to_time(name)?),
            _ => return Err(self.unknown_attribute(name)),
        }
        Ok(())
    }
}

impl Channel for PointToPointChannel {
    fn devices(&self) -> Vec<Rc<dyn NetDevice>> {
        self.ends
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|device| device as Rc<dyn NetDevice>)
            .collect()
    }
}

/// Builds point-to-point links between node pairs.
#[derive(Debug, Clone)]
pub struct PointToPointHelper {
    data_rate: DataRate,
    delay: Time,
    mtu: u16,
}

impl PointToPointHelper {
    pub fn new(data_rate: DataRate, delay: Time) -> Self {
        Self {
            data_rate,
            delay,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Creates one device on each node and wires them together.
    pub fn install(
        &self,
        sim: &Simulator,
        a: &Rc<Node>,
        b: &Rc<Node>,
    ) -> (Rc<PointToPointNetDevice>, Rc<PointToPointNetDevice>) {
        let channel = PointToPointChannel::new(self.delay);
        let dev_a = PointToPointNetDevice::new(sim, a, self.data_rate, self.mtu);
        let dev_b = PointToPointNetDevice::new(sim, b, self.data_rate, self.mtu);
        dev_a.attach(&channel);
        dev_b.attach(&channel);
        a.add_device(dev_a.clone());
        b.add_device(dev_b.clone());
        tracing::debug!(
            a = a.id(),
            b = b.id(),
            rate = %self.data_rate,
            delay = %self.delay,
            mtu = self.mtu,
            "point-to-point link installed"
        );
        (dev_a, dev_b)
    }
}
