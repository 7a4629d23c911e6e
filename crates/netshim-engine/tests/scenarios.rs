//! End-to-end simulations over every medium.
//!
//! Each test builds a small topology with the public helpers, runs an echo
//! exchange and checks what the flow monitor and the applications saw.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use netshim_engine::apps::{self, UdpEchoClient, install_echo_client, install_echo_server};
use netshim_engine::device::csma::CsmaHelper;
use netshim_engine::device::p2p::PointToPointHelper;
use netshim_engine::device::wifi::WifiHelper;
use netshim_engine::internet::{InternetStackHelper, Ipv4AddressHelper, populate_routing_tables};
use netshim_engine::mobility::set_constant_position;
use netshim_engine::{
    Application, DataRate, FlowId, NetDevice, Node, SimConfig, Simulator, Time, Vector3,
    WifiStandard, config_path, flowmon, pcap,
};

const MASK_24: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

fn devices<D: NetDevice + 'static>(devices: Vec<Rc<D>>) -> Vec<Rc<dyn NetDevice>> {
    devices
        .into_iter()
        .map(|d| d as Rc<dyn NetDevice>)
        .collect()
}

fn echo(
    sim: &Simulator,
    client: &Rc<Node>,
    server: &Rc<Node>,
    server_address: Ipv4Addr,
    count: u32,
) -> Rc<UdpEchoClient> {
    let server_app: Rc<dyn Application> = install_echo_server(sim, server, 9);
    let client_app = install_echo_client(
        sim,
        client,
        SocketAddrV4::new(server_address, 9),
        100,
        Time::from_millis(1000),
        count,
    );
    let dyn_client: Rc<dyn Application> = client_app.clone();
    apps::set_start_time(sim, &server_app, Time::from_millis(1000));
    apps::set_start_time(sim, &dyn_client, Time::from_millis(1000));
    client_app
}

#[test]
fn test_point_to_point_echo_statistics() {
    let sim = Simulator::new();
    let nodes = sim.create_nodes(2);
    InternetStackHelper::new().install(&sim, &nodes);
    let (a, b) = PointToPointHelper::new("5Mbps".parse().unwrap(), "2ms".parse().unwrap())
        .install(&sim, &nodes[0], &nodes[1]);
    let addresses = Ipv4AddressHelper::new()
        .assign(Ipv4Addr::new(10, 1, 1, 0), MASK_24, &devices(vec![a, b]))
        .unwrap();
    let client = echo(&sim, &nodes[0], &nodes[1], addresses[1], 5);
    let monitor = flowmon::install_all(&sim);

    sim.stop_at(Time::from_millis(10_000));
    sim.run().unwrap();

    assert_eq!(sim.now(), Time::from_millis(10_000));
    assert_eq!(client.sent(), 5);
    assert_eq!(client.received(), 5);

    let totals = monitor.totals();
    assert_eq!(totals.flow_count, 2);
    assert_eq!(totals.tx_packets, 10);
    assert_eq!(totals.rx_packets, 10);
    assert_eq!(totals.tx_bytes, 10 * 128);
    assert_eq!(totals.rx_bytes, 10 * 128);

    // 128-byte datagram plus 2 bytes of PPP at 5 Mbps, then 2 ms on the wire.
    let one_way = "5Mbps".parse::<DataRate>().unwrap().tx_time(130) + Time::from_millis(2);
    assert_eq!(totals.delay_sum, Time::from_nanos(one_way.as_nanos() * 10));
    assert_eq!(totals.jitter_sum, Time::ZERO);

    let request = monitor.find_flow(FlowId::new(1)).unwrap();
    assert_eq!(request.destination, addresses[1]);
    assert_eq!(request.destination_port, 9);
}

#[test]
fn test_routed_line_forwards_through_middle_node() {
    let sim = Simulator::new();
    let nodes = sim.create_nodes(3);
    InternetStackHelper::new().install(&sim, &nodes);
    let link = PointToPointHelper::new("10Mbps".parse().unwrap(), "1ms".parse().unwrap());
    let mut addresses = Ipv4AddressHelper::new();
    let (a, b) = link.install(&sim, &nodes[0], &nodes[1]);
    addresses
        .assign(Ipv4Addr::new(10, 1, 1, 0), MASK_24, &devices(vec![a, b]))
        .unwrap();
    let (c, d) = link.install(&sim, &nodes[1], &nodes[2]);
    let far = addresses
        .assign(Ipv4Addr::new(10, 1, 2, 0), MASK_24, &devices(vec![c, d]))
        .unwrap();
    assert_eq!(populate_routing_tables(&sim), 2);

    let client = echo(&sim, &nodes[0], &nodes[2], far[1], 3);
    let monitor = flowmon::install_all(&sim);
    sim.run().unwrap();

    assert_eq!(client.received(), 3);
    let stats = monitor.flow_stats();
    assert_eq!(stats.len(), 2);
    for flow in stats.values() {
        assert_eq!(flow.rx_packets, 3);
        assert_eq!(flow.times_forwarded, 3);
    }
}

#[test]
fn test_unrouted_destination_is_not_reached() {
    let sim = Simulator::new();
    let nodes = sim.create_nodes(3);
    InternetStackHelper::new().install(&sim, &nodes);
    let link = PointToPointHelper::new("10Mbps".parse().unwrap(), "1ms".parse().unwrap());
    let mut addresses = Ipv4AddressHelper::new();
    let (a, b) = link.install(&sim, &nodes[0], &nodes[1]);
    addresses
        .assign(Ipv4Addr::new(10, 1, 1, 0), MASK_24, &devices(vec![a, b]))
        .unwrap();
    let (c, d) = link.install(&sim, &nodes[1], &nodes[2]);
    let far = addresses
        .assign(Ipv4Addr::new(10, 1, 2, 0), MASK_24, &devices(vec![c, d]))
        .unwrap();

    // No routing tables: node 0 cannot reach 10.1.2.0/24.
    let client = echo(&sim, &nodes[0], &nodes[2], far[1], 2);
    sim.run().unwrap();
    assert_eq!(client.sent(), 2);
    assert_eq!(client.received(), 0);
}

#[test]
fn test_csma_bus_echo() {
    let sim = Simulator::new();
    let nodes = sim.create_nodes(4);
    InternetStackHelper::new().install(&sim, &nodes);
    let bus = CsmaHelper::new("100Mbps".parse().unwrap(), "6560ns".parse().unwrap())
        .install(&sim, &nodes);
    let addresses = Ipv4AddressHelper::new()
        .assign(Ipv4Addr::new(10, 1, 3, 0), MASK_24, &devices(bus))
        .unwrap();
    assert_eq!(addresses[3], Ipv4Addr::new(10, 1, 3, 4));

    let client = echo(&sim, &nodes[0], &nodes[3], addresses[3], 4);
    let monitor = flowmon::install_all(&sim);
    sim.run().unwrap();

    assert_eq!(client.received(), 4);
    assert_eq!(monitor.totals().rx_packets, 8);
}

#[test]
fn test_wifi_stations_talk_through_the_access_point() {
    let sim = Simulator::new();
    let nodes = sim.create_nodes(3);
    for (i, node) in nodes.iter().enumerate() {
        set_constant_position(node, Vector3::new(i as f64 * 5.0, 0.0, 0.0)).unwrap();
    }
    InternetStackHelper::new().install(&sim, &nodes);
    let wifi = WifiHelper::new(WifiStandard::N5Ghz, "HtMcs7", 0, "ns3-wifi").unwrap();
    let (stations, ap) = wifi.install_sta_ap(&sim, &nodes[..2], &nodes[2]);
    let mut all = devices(stations);
    all.push(ap);
    let addresses = Ipv4AddressHelper::new()
        .assign(Ipv4Addr::new(192, 168, 1, 0), MASK_24, &all)
        .unwrap();

    let client = echo(&sim, &nodes[0], &nodes[1], addresses[1], 3);
    let monitor = flowmon::install_all(&sim);
    sim.run().unwrap();

    assert_eq!(client.received(), 3);
    let totals = monitor.totals();
    assert_eq!(totals.tx_packets, 6);
    assert_eq!(totals.rx_packets, 6);
    assert!(totals.delay_sum > Time::ZERO);
}

#[test]
fn test_pcap_records_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SimConfig::default();
    config.pcap.directory = dir.path().to_path_buf();
    let sim = Simulator::with_config(config);

    let nodes = sim.create_nodes(2);
    InternetStackHelper::new().install(&sim, &nodes);
    let (a, b) = PointToPointHelper::new("5Mbps".parse().unwrap(), "2ms".parse().unwrap())
        .install(&sim, &nodes[0], &nodes[1]);
    let pair = devices(vec![a, b]);
    let addresses = Ipv4AddressHelper::new()
        .assign(Ipv4Addr::new(10, 1, 1, 0), MASK_24, &pair)
        .unwrap();
    let writer = pcap::enable_pcap(&sim, &pair[0], "echo").unwrap();
    echo(&sim, &nodes[0], &nodes[1], addresses[1], 2);
    sim.run().unwrap();

    // Two requests sent and two replies received.
    assert_eq!(writer.records(), 4);
    let path = dir.path().join("echo-0-0.pcap");
    assert_eq!(writer.path(), path.as_path());
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 24 + 4 * (16 + 130));
}

#[test]
fn test_attribute_path_changes_link_timing() {
    let arrival = |delay: Option<f64>| {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(2);
        let (a, b) = PointToPointHelper::new("1Gbps".parse().unwrap(), "1ms".parse().unwrap())
            .install(&sim, &nodes[0], &nodes[1]);
        if let Some(delay) = delay {
            config_path::set(
                &sim,
                "/NodeList/0/DeviceList/0/Channel/Delay",
                &netshim_engine::AttributeValue::Double(delay),
            )
            .unwrap();
        }
        let seen = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&seen);
        b.traces()
            .phy_rx_end
            .connect(move |sim, _| *slot.borrow_mut() = Some(sim.now()));
        let packet = netshim_engine::Packet::new(0, 100);
        assert!(a.send(&sim, packet, Ipv4Addr::new(10, 0, 0, 2)));
        sim.run().unwrap();
        let at = *seen.borrow();
        at.unwrap()
    };

    let default = arrival(None);
    let slower = arrival(Some(0.005));
    assert_eq!(slower - default, Time::from_millis(4));
}

#[test]
fn test_independent_simulators_do_not_interfere() {
    let run = |count: u32| {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(2);
        InternetStackHelper::new().install(&sim, &nodes);
        let (a, b) = PointToPointHelper::new("5Mbps".parse().unwrap(), "2ms".parse().unwrap())
            .install(&sim, &nodes[0], &nodes[1]);
        let addresses = Ipv4AddressHelper::new()
            .assign(Ipv4Addr::new(10, 1, 1, 0), MASK_24, &devices(vec![a, b]))
            .unwrap();
        let client = echo(&sim, &nodes[0], &nodes[1], addresses[1], count);
        (sim, client)
    };

    let (first, first_client) = run(2);
    let (second, second_client) = run(4);
    second.run().unwrap();
    first.run().unwrap();

    assert_eq!(first_client.received(), 2);
    assert_eq!(second_client.received(), 4);

    first.destroy();
    assert_eq!(first.node_count(), 0);
    assert_eq!(first.now(), Time::ZERO);
    assert_eq!(second.node_count(), 2);
}
