//! CSMA buses.

use std::rc::Rc;

use super::shared::{Flavor, SharedChannel, SharedNetDevice};
use super::DeviceKind;
use crate::node::Node;
use crate::rate::DataRate;
use crate::time::Time;
use crate::Simulator;

pub const DEFAULT_MTU: u16 = 1500;

/// Builds a single CSMA bus joining a set of nodes.
#[derive(Debug, Clone)]
pub struct CsmaHelper {
    data_rate: DataRate,
    delay: Time,
    mtu: u16,
}

impl CsmaHelper {
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

    /// Creates one device per node, in order, all on one new channel.
    pub fn install(&self, sim: &Simulator, nodes: &[Rc<Node>]) -> Vec<Rc<SharedNetDevice>> {
        let channel = SharedChannel::new(DeviceKind::Csma, self.data_rate, self.delay);
        let devices = nodes
            .iter()
            .map(|node| {
                let device = SharedNetDevice::new(sim, node, self.mtu, Flavor::Csma);
                device.attach(&channel);
                node.add_device(device.clone());
                device
            })
            .collect();
        tracing::debug!(
            nodes = nodes.len(),
            rate = %self.data_rate,
            delay = %self.delay,
            "CSMA bus installed"
        );
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeValue, HasAttributes};
    use crate::device::NetDevice;
    use crate::packet::{Mac48, Packet};
    use std::cell::RefCell;
    use std::net::Ipv4Addr;

    fn bus(sim: &Simulator, count: u32) -> Vec<Rc<SharedNetDevice>> {
        let nodes = sim.create_nodes(count);
        CsmaHelper::new("100Mbps".parse().unwrap(), "6560ns".parse().unwrap()).install(sim, &nodes)
    }

    #[test]
    fn install_shares_one_channel() {
        let sim = Simulator::new();
        let devices = bus(&sim, 3);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].kind(), DeviceKind::Csma);
        assert_eq!(devices[0].type_name(), "ns3::CsmaNetDevice");
        let channel = devices[0].channel().unwrap();
        assert_eq!(channel.devices().len(), 3);
        assert_eq!(channel.type_name(), "ns3::CsmaChannel");
    }

    #[test]
    fn broadcast_reaches_every_other_device() {
        let sim = Simulator::new();
        let devices = bus(&sim, 3);
        let seen = Rc::new(RefCell::new(Vec::new()));
        for device in &devices {
            let seen = Rc::clone(&seen);
            let index = device.node().unwrap().id();
            device
                .traces()
                .phy_rx_end
                .connect(move |sim, packet| {
                    seen.borrow_mut().push((index, sim.now(), packet.size()));
                });
        }

        let packet = Packet::new(sim.allocate_packet_uid(), 107);
        assert!(devices[0].send(&sim, packet, Ipv4Addr::BROADCAST));
        sim.run().unwrap();

        // 107 + 18 bytes of framing = 1000 bits = 10 us at 100 Mbps.
        let arrival = Time::from_micros(10) + Time::from_nanos(6_560);
        assert_eq!(*seen.borrow(), vec![(1, arrival, 125), (2, arrival, 125)]);
    }

    #[test]
    fn busy_channel_defers_second_sender() {
        let sim = Simulator::new();
        let devices = bus(&sim, 2);
        let ends = Rc::new(RefCell::new(Vec::new()));
        for device in &devices {
            let ends = Rc::clone(&ends);
            device
                .traces()
                .phy_tx_end
                .connect(move |sim, packet| ends.borrow_mut().push((sim.now(), packet.uid())));
        }

        for device in &devices {
            let packet = Packet::new(sim.allocate_packet_uid(), 107);
            assert!(device.send(&sim, packet, Ipv4Addr::BROADCAST));
        }
        sim.run().unwrap();

        let ends = ends.borrow();
        assert_eq!(ends.len(), 2);
        assert_eq!(ends[0], (Time::from_micros(10), 0));
        // The second sender waits for the medium plus its backoff slots.
        assert!(ends[1].0 >= Time::from_micros(20));
        assert_eq!(ends[1].1, 1);
    }

    #[test]
    fn unknown_next_hop_is_dropped() {
        let sim = Simulator::new();
        let devices = bus(&sim, 2);
        let packet = Packet::new(sim.allocate_packet_uid(), 10);
        assert!(!devices[0].send(&sim, packet, Ipv4Addr::new(10, 0, 0, 9)));
        assert_ne!(devices[0].address(), Mac48::BROADCAST);
    }

    #[test]
    fn channel_attributes() {
        let sim = Simulator::new();
        let devices = bus(&sim, 2);
        let channel = devices[0].channel().unwrap();
        channel
            .set_attribute("DataRate", &AttributeValue::String("10Mbps".into()))
            .unwrap();
        channel
            .set_attribute("Delay", &AttributeValue::Double(0.001))
            .unwrap();
        assert!(channel.set_attribute("Mtu", &AttributeValue::Uint(1)).is_err());
        assert!(devices[1].set_attribute("Mtu", &AttributeValue::Uint(9000)).is_ok());
        assert_eq!(devices[1].mtu(), 9000);
    }
}
