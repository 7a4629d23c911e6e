//! # netshim-engine: discrete-event network simulation
//!
//! The simulator behind the netshim C ABI. One [`Simulator`] owns a clock,
//! an event queue, a seeded RNG and a list of nodes; nothing is shared
//! between simulators, so several can live in one process.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Simulator: clock, EventQueue, SmallRng, nodes                │
//! │                                                              │
//! │  Node ── Application (UdpEchoServer, UdpEchoClient)          │
//! │    │  ── Ipv4L3 ── UdpL4 ── UdpSocket                        │
//! │    │        └── Ipv4Probe (FlowMonitor)                      │
//! │    └──── NetDevice (point-to-point, CSMA, Wi-Fi)             │
//! │              └── Channel, DeviceTraces (PCAP, callbacks)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the thread that calls [`Simulator::run`]. Objects are
//! shared with `Rc`; back-references (device to node, socket to stack) are
//! `Weak`, so [`Simulator::destroy`] frees the whole graph.
//!
//! ## Quick Start
//!
//! ```
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use std::rc::Rc;
//!
//! use netshim_engine::apps::{install_echo_client, install_echo_server};
//! use netshim_engine::device::NetDevice;
//! use netshim_engine::device::p2p::PointToPointHelper;
//! use netshim_engine::internet::{InternetStackHelper, Ipv4AddressHelper};
//! use netshim_engine::{Simulator, Time};
//!
//! let sim = Simulator::new();
//! let nodes = sim.create_nodes(2);
//! InternetStackHelper::new().install(&sim, &nodes);
//! let (a, b) = PointToPointHelper::new("5Mbps".parse()?, "2ms".parse()?)
//!     .install(&sim, &nodes[0], &nodes[1]);
//! let addresses = Ipv4AddressHelper::new().assign(
//!     Ipv4Addr::new(10, 1, 1, 0),
//!     Ipv4Addr::new(255, 255, 255, 0),
//!     &[a as Rc<dyn NetDevice>, b],
//! )?;
//!
//! install_echo_server(&sim, &nodes[1], 9);
//! let client = install_echo_client(
//!     &sim,
//!     &nodes[0],
//!     SocketAddrV4::new(addresses[1], 9),
//!     100,
//!     Time::from_millis(1000),
//!     3,
//! );
//! sim.stop_at(Time::from_millis(10_000));
//! sim.run()?;
//! assert_eq!(client.received(), 3);
//! # Ok::<(), netshim_engine::EngineError>(())
//! ```

#![allow(clippy::unused_self)] // Device hooks keep a uniform signature
#![cfg_attr(test, allow(clippy::float_cmp))] // Positions and times compared exactly

pub mod apps;
pub mod attribute;
pub mod config_path;
pub mod device;
mod error;
pub mod event;
pub mod flowmon;
pub mod internet;
pub mod mobility;
pub mod node;
pub mod packet;
pub mod pcap;
mod rate;
mod simulator;
mod time;
pub mod trace;

pub use apps::Application;
pub use attribute::{AttributeValue, HasAttributes};
pub use device::{Channel, DeviceKind, NetDevice};
pub use error::EngineError;
pub use event::EventId;
pub use flowmon::{FlowId, FlowMonitor, FlowStats, FlowTotals};
pub use mobility::{ConstantPositionMobility, Vector3};
pub use netshim_config::{SimConfig, WifiStandard};
pub use node::Node;
pub use packet::Packet;
pub use rate::DataRate;
pub use simulator::Simulator;
pub use time::Time;
