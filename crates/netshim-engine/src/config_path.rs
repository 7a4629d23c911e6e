//! Attribute paths.
//!
//! A path walks the object tree from the node list and ends in an attribute
//! name:
//!
//! ```text
//! /NodeList/<idx>/DeviceList/<idx>/$ns3::PointToPointNetDevice/Mtu
//! /NodeList/*/DeviceList/0/Channel/Delay
//! /NodeList/[0-2]/ApplicationList/0/$ns3::UdpEchoClient/MaxPackets
//! /NodeList/3/$ns3::MobilityModel/Position
//! ```
//!
//! `<idx>` is a number, `*`, a range `[a-b]` or an alternation `a|b|c`.
//! A `$TypeName` segment keeps only objects of that type (or, on a node,
//! moves to its mobility model).

use std::rc::Rc;

use crate::apps::Application;
use crate::attribute::{AttributeValue, HasAttributes};
use crate::device::{Channel, NetDevice};
use crate::mobility::ConstantPositionMobility;
use crate::node::Node;
use crate::{EngineError, Simulator};

const NODE_TYPE: &str = "ns3::Node";
const MOBILITY_TYPES: [&str; 2] = ["ns3::MobilityModel", "ns3::ConstantPositionMobilityModel"];

#[derive(Clone)]
enum Target {
    Node(Rc<Node>),
    Device(Rc<dyn NetDevice>),
    Channel(Rc<dyn Channel>),
    Application(Rc<dyn Application>),
    Mobility(Rc<ConstantPositionMobility>),
}

impl Target {
    fn is_type(&self, type_name: &str) -> bool {
        match self {
            Target::Node(_) => type_name == NODE_TYPE,
            Target::Device(device) => device.is_type(type_name),
            Target::Channel(channel) => channel.is_type(type_name),
            Target::Application(app) => app.is_type(type_name),
            Target::Mobility(model) => model.is_type(type_name),
        }
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match self {
            Target::Node(_) => Err(EngineError::UnknownAttribute {
                type_name: NODE_TYPE,
                name: name.to_string(),
            }),
            Target::Device(device) => device.set_attribute(name, value),
            Target::Channel(channel) => channel.set_attribute(name, value),
            Target::Application(app) => app.set_attribute(name, value),
            Target::Mobility(model) => model.set_attribute(name, value),
        }
    }
}

/// Which list entries an index segment selects.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexSpec {
    All,
    Set(Vec<u32>),
    Range(u32, u32),
}

impl IndexSpec {
    fn parse(segment: &str) -> Option<Self> {
        if segment == "*" {
            return Some(IndexSpec::All);
        }
        if let Some(inner) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let (low, high) = inner.split_once('-')?;
            let low = low.trim().parse().ok()?;
            let high = high.trim().parse().ok()?;
            return (low <= high).then_some(IndexSpec::Range(low, high));
        }
        segment
            .split('|')
            .map(|part| part.trim().parse().ok())
            .collect::<Option<Vec<u32>>>()
            .map(IndexSpec::Set)
    }

    fn matches(&self, index: u32) -> bool {
        match self {
            IndexSpec::All => true,
            IndexSpec::Set(set) => set.contains(&index),
            IndexSpec::Range(low, high) => (*low..=*high).contains(&index),
        }
    }

    fn select<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .enumerate()
            .filter(|(i, _)| self.matches(*i as u32))
            .map(|(_, item)| item.clone())
            .collect()
    }
}

/// Sets `value` on every object the path resolves to. Returns how many
/// objects were updated.
pub fn set(sim: &Simulator, path: &str, value: &AttributeValue) -> Result<usize, EngineError> {
    let invalid = |segment: &str| EngineError::InvalidPath {
        path: path.to_string(),
        segment: segment.to_string(),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((attribute, walk)) = segments.split_last() else {
        return Err(invalid(path));
    };
    let mut walk = walk.iter().copied();

    match walk.next() {
        Some("NodeList") => {}
        Some(other) => return Err(invalid(other)),
        None => return Err(invalid(attribute)),
    }
    let spec = walk.next().ok_or_else(|| invalid("NodeList"))?;
    let spec = IndexSpec::parse(spec).ok_or_else(|| invalid(spec))?;
    let mut targets: Vec<Target> = spec
        .select(&sim.nodes())
        .into_iter()
        .map(Target::Node)
        .collect();

    while let Some(segment) = walk.next() {
        targets = match segment {
            "DeviceList" | "ApplicationList" => {
                let spec = walk.next().ok_or_else(|| invalid(segment))?;
                let spec = IndexSpec::parse(spec).ok_or_else(|| invalid(spec))?;
                let mut next = Vec::new();
                for target in &targets {
                    let Target::Node(node) = target else {
                        return Err(invalid(segment));
                    };
                    if segment == "DeviceList" {
                        next.extend(spec.select(&node.devices()).into_iter().map(Target::Device));
                    } else {
                        next.extend(
                            spec.select(&node.applications())
                                .into_iter()
                                .map(Target::Application),
                        );
                    }
                }
                next
            }
            "Channel" => {
                let mut channels: Vec<Rc<dyn Channel>> = Vec::new();
                for target in &targets {
                    let Target::Device(device) = target else {
                        return Err(invalid(segment));
                    };
                    if let Some(channel) = device.channel() {
                        if !channels
                            .iter()
                            .any(|seen| std::ptr::addr_eq(Rc::as_ptr(seen), Rc::as_ptr(&channel)))
                        {
                            channels.push(channel);
                        }
                    }
                }
                channels.into_iter().map(Target::Channel).collect()
            }
            _ => {
                let type_name = segment.strip_prefix('$').ok_or_else(|| invalid(segment))?;
                if MOBILITY_TYPES.contains(&type_name) {
                    targets
                        .iter()
                        .filter_map(|target| match target {
                            Target::Node(node) => node.mobility().map(Target::Mobility),
                            Target::Mobility(_) => Some(target.clone()),
                            _ => None,
                        })
                        .collect()
                } else {
                    targets
                        .into_iter()
                        .filter(|target| target.is_type(type_name))
                        .collect()
                }
            }
        };
    }

    if targets.is_empty() {
        return Err(EngineError::NoMatch {
            path: path.to_string(),
        });
    }
    for target in &targets {
        target.set_attribute(attribute, value)?;
    }
    tracing::debug!(path, %value, objects = targets.len(), "attribute set");
    Ok(targets.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::install_echo_client;
    use crate::device::csma::CsmaHelper;
    use crate::device::p2p::PointToPointHelper;
    use crate::mobility::Vector3;
    use crate::time::Time;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use test_case::test_case;

    #[test_case("*", &[0, 1, 2, 3])]
    #[test_case("2", &[2])]
    #[test_case("0|3", &[0, 3])]
    #[test_case("[1-2]", &[1, 2])]
    fn index_specs(segment: &str, expected: &[u32]) {
        let spec = IndexSpec::parse(segment).unwrap();
        let picked: Vec<u32> = (0..4).filter(|i| spec.matches(*i)).collect();
        assert_eq!(picked, expected);
    }

    #[test_case("x")]
    #[test_case("[2-1]")]
    #[test_case("[1-]")]
    #[test_case("-1")]
    fn bad_index_specs(segment: &str) {
        assert!(IndexSpec::parse(segment).is_none());
    }

    fn p2p(sim: &Simulator) -> Vec<Rc<Node>> {
        let nodes = sim.create_nodes(2);
        PointToPointHelper::new("5Mbps".parse().unwrap(), "2ms".parse().unwrap())
            .install(sim, &nodes[0], &nodes[1]);
        nodes
    }

    #[test]
    fn device_attribute_by_type() {
        let sim = Simulator::new();
        let nodes = p2p(&sim);
        let count = set(
            &sim,
            "/NodeList/*/DeviceList/*/$ns3::PointToPointNetDevice/Mtu",
            &AttributeValue::Uint(1400),
        )
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(nodes[1].device(0).unwrap().mtu(), 1400);
    }

    #[test]
    fn shared_channel_is_set_once() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(3);
        CsmaHelper::new("100Mbps".parse().unwrap(), "6560ns".parse().unwrap())
            .install(&sim, &nodes);
        let count = set(
            &sim,
            "/NodeList/*/DeviceList/0/Channel/DataRate",
            &AttributeValue::String("10Mbps".into()),
        )
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn point_to_point_channel_delay() {
        let sim = Simulator::new();
        p2p(&sim);
        let count = set(
            &sim,
            "/NodeList/0/DeviceList/0/Channel/Delay",
            &AttributeValue::Double(0.005),
        )
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn application_and_mobility_attributes() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(1);
        nodes[0].set_mobility(Rc::new(ConstantPositionMobility::new(Vector3::default())));
        let client = install_echo_client(
            &sim,
            &nodes[0],
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 9),
            100,
            Time::from_millis(1000),
            1,
        );

        set(
            &sim,
            "/NodeList/0/ApplicationList/0/$ns3::UdpEchoClient/MaxPackets",
            &AttributeValue::Uint(7),
        )
        .unwrap();
        assert_eq!(client.max_packets(), 7);

        set(
            &sim,
            "/NodeList/0/$ns3::MobilityModel/Position",
            &AttributeValue::String("1:2:3".into()),
        )
        .unwrap();
        assert_eq!(
            nodes[0].mobility().unwrap().position(),
            Vector3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn failures() {
        let sim = Simulator::new();
        p2p(&sim);
        let value = AttributeValue::Uint(1);

        assert!(matches!(
            set(&sim, "/NodeList/9/DeviceList/0/Mtu", &value),
            Err(EngineError::NoMatch { .. })
        ));
        assert!(matches!(
            set(&sim, "/NodeList/0/DeviceList/0/$ns3::CsmaNetDevice/Mtu", &value),
            Err(EngineError::NoMatch { .. })
        ));
        assert!(matches!(
            set(&sim, "/x", &value),
            Err(EngineError::InvalidPath { .. })
        ));
        assert!(matches!(
            set(&sim, "/NodeList/0/Bogus/0/Mtu", &value),
            Err(EngineError::InvalidPath { .. })
        ));
        assert!(matches!(
            set(&sim, "/NodeList/0/DeviceList/0/NoSuchAttribute", &value),
            Err(EngineError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            set(&sim, "/NodeList/0/Mtu", &value),
            Err(EngineError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            set(&sim, "", &value),
            Err(EngineError::InvalidPath { .. })
        ));
    }
}
