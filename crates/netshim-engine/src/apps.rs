//! Applications and the UDP echo pair.
//!
//! An application is scheduled when its node initializes (the first
//! [`Simulator::run`]) or immediately when it is added to a node that is
//! already running. Start and stop times are absolute simulation times and
//! may be changed at any point; a pending start or stop is re-armed.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::{Rc, Weak};

use crate::attribute::{AttributeValue, HasAttributes};
use crate::event::EventId;
use crate::internet::UdpSocket;
use crate::node::Node;
use crate::time::Time;
use crate::trace::TracedCallback;
use crate::{EngineError, Simulator};

const APPLICATION_TYPE: &str = "ns3::Application";

pub trait Application: HasAttributes {
    fn node(&self) -> Option<Rc<Node>>;

    fn schedule(&self) -> &AppSchedule;

    /// Called at the start time. Starting a running application is a no-op.
    fn start(&self, sim: &Simulator);

    /// Called at the stop time. Stopping a stopped application is a no-op.
    fn stop(&self, sim: &Simulator);

    fn is_running(&self) -> bool;
}

/// Start/stop times of an application and their pending events.
#[derive(Debug, Default)]
pub struct AppSchedule {
    start: Cell<Time>,
    stop: Cell<Option<Time>>,
    start_event: Cell<Option<EventId>>,
    stop_event: Cell<Option<EventId>>,
    armed: Cell<bool>,
}

impl AppSchedule {
    pub fn start_time(&self) -> Time {
        self.start.get()
    }

    pub fn stop_time(&self) -> Option<Time> {
        self.stop.get()
    }
}

fn arm_start(sim: &Simulator, app: &Rc<dyn Application>) {
    let schedule = app.schedule();
    if let Some(id) = schedule.start_event.take() {
        sim.cancel(id);
    }
    let target = Rc::clone(app);
    let id = sim.schedule_at(schedule.start.get(), move |sim| {
        target.schedule().start_event.set(None);
        target.start(sim);
    });
    schedule.start_event.set(Some(id));
}

fn arm_stop(sim: &Simulator, app: &Rc<dyn Application>) {
    let schedule = app.schedule();
    if let Some(id) = schedule.stop_event.take() {
        sim.cancel(id);
    }
    let Some(at) = schedule.stop.get() else {
        return;
    };
    let target = Rc::clone(app);
    let id = sim.schedule_at(at, move |sim| {
        target.schedule().stop_event.set(None);
        target.stop(sim);
    });
    schedule.stop_event.set(Some(id));
}

/// Schedules the application's start and stop. Called once per application
/// when its node initializes.
pub(crate) fn arm(sim: &Simulator, app: &Rc<dyn Application>) {
    app.schedule().armed.set(true);
    arm_start(sim, app);
    arm_stop(sim, app);
}

/// Sets the absolute start time, rescheduling a pending start.
pub fn set_start_time(sim: &Simulator, app: &Rc<dyn Application>, at: Time) {
    app.schedule().start.set(at);
    if app.schedule().armed.get() {
        arm_start(sim, app);
    }
}

/// Sets the absolute stop time, rescheduling a pending stop.
pub fn set_stop_time(sim: &Simulator, app: &Rc<dyn Application>, at: Time) {
    app.schedule().stop.set(Some(at));
    if app.schedule().armed.get() {
        arm_stop(sim, app);
    }
}

// ============================================================================
// Echo server
// ============================================================================

pub struct UdpEchoServer {
    me: Weak<UdpEchoServer>,
    node: Weak<Node>,
    port: Cell<u16>,
    schedule: AppSchedule,
    socket: RefCell<Option<Rc<UdpSocket>>>,
    received: Cell<u64>,
    /// Fires with the datagram size (IP header included) for every request.
    pub rx: TracedCallback<u32>,
}

impl UdpEchoServer {
    pub fn new(node: &Rc<Node>, port: u16) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            node: Rc::downgrade(node),
            port: Cell::new(port),
            schedule: AppSchedule::default(),
            socket: RefCell::new(None),
            received: Cell::new(0),
            rx: TracedCallback::new(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port.get()
    }

    pub fn received(&self) -> u64 {
        self.received.get()
    }

    fn handle(&self, sim: &Simulator, size: u32, ip_size: u32, from: SocketAddrV4) {
        self.received.set(self.received.get() + 1);
        self.rx.fire(sim, &ip_size);
        let socket = self.socket.borrow().clone();
        if let Some(socket) = socket {
            if let Err(error) = socket.send_to(sim, size, from) {
                tracing::warn!(%error, %from, "echo reply not sent");
            }
        }
    }
}

impl HasAttributes for UdpEchoServer {
    fn type_name(&self) -> &'static str {
        "ns3::UdpEchoServer"
    }

    fn is_type(&self, type_name: &str) -> bool {
        type_name == self.type_name() || type_name == APPLICATION_TYPE
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match name {
            "Port" => self.port.set(value.to_u16(name)?),
            _ => return Err(self.unknown_attribute(name)),
        }
        Ok(())
    }
}

impl Application for UdpEchoServer {
    fn node(&self) -> Option<Rc<Node>> {
        self.node.upgrade()
    }

    fn schedule(&self) -> &AppSchedule {
        &self.schedule
    }

    fn start(&self, _sim: &Simulator) {
        if self.is_running() {
            return;
        }
        let Some(ipv4) = self.node.upgrade().and_then(|node| node.ipv4()) else {
            tracing::warn!("echo server started on a node without an internet stack");
            return;
        };
        let socket = match ipv4.udp_bind(self.port.get()) {
            Ok(socket) => socket,
            Err(error) => {
                tracing::warn!(%error, "echo server could not bind");
                return;
            }
        };
        let me = self.me.clone();
        socket.set_recv_callback(move |sim, packet, from| {
            if let Some(server) = me.upgrade() {
                server.handle(sim, packet.payload_size(), packet.ip_size(), from);
            }
        });
        tracing::debug!(node = ipv4.node_id(), port = self.port.get(), "echo server started");
        *self.socket.borrow_mut() = Some(socket);
    }

    fn stop(&self, _sim: &Simulator) {
        if let Some(socket) = self.socket.borrow_mut().take() {
            socket.close();
            tracing::debug!(port = self.port.get(), "echo server stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.socket.borrow().is_some()
    }
}

impl fmt::Debug for UdpEchoServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpEchoServer")
            .field("port", &self.port.get())
            .field("received", &self.received.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Echo client
// ============================================================================

pub const DEFAULT_MAX_PACKETS: u32 = 100;
pub const DEFAULT_INTERVAL: Time = Time::from_millis(1000);
pub const DEFAULT_PACKET_SIZE: u32 = 100;

/// Sends fixed-size datagrams to a remote echo server at a fixed interval.
/// `MaxPackets` 0 means unlimited.
pub struct UdpEchoClient {
    me: Weak<UdpEchoClient>,
    node: Weak<Node>,
    remote_address: Cell<Ipv4Addr>,
    remote_port: Cell<u16>,
    max_packets: Cell<u32>,
    interval: Cell<Time>,
    packet_size: Cell<u32>,
    schedule: AppSchedule,
    socket: RefCell<Option<Rc<UdpSocket>>>,
    send_event: Cell<Option<EventId>>,
    sent: Cell<u32>,
    received: Cell<u64>,
    /// Fires with the payload size of every request sent.
    pub tx: TracedCallback<u32>,
    /// Fires with the payload size of every echo received.
    pub rx: TracedCallback<u32>,
}

impl UdpEchoClient {
    pub fn new(node: &Rc<Node>, remote: SocketAddrV4) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            node: Rc::downgrade(node),
            remote_address: Cell::new(*remote.ip()),
            remote_port: Cell::new(remote.port()),
            max_packets: Cell::new(DEFAULT_MAX_PACKETS),
            interval: Cell::new(DEFAULT_INTERVAL),
            packet_size: Cell::new(DEFAULT_PACKET_SIZE),
            schedule: AppSchedule::default(),
            socket: RefCell::new(None),
            send_event: Cell::new(None),
            sent: Cell::new(0),
            received: Cell::new(0),
            tx: TracedCallback::new(),
            rx: TracedCallback::new(),
        })
    }

    pub fn remote(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.remote_address.get(), self.remote_port.get())
    }

    pub fn max_packets(&self) -> u32 {
        self.max_packets.get()
    }

    pub fn set_max_packets(&self, count: u32) {
        self.max_packets.set(count);
    }

    pub fn interval(&self) -> Time {
        self.interval.get()
    }

    pub fn set_interval(&self, interval: Time) {
        self.interval.set(interval);
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size.get()
    }

    pub fn set_packet_size(&self, size: u32) {
        self.packet_size.set(size);
    }

    /// Requests attempted so far, including unroutable ones.
    pub fn sent(&self) -> u32 {
        self.sent.get()
    }

    pub fn received(&self) -> u64 {
        self.received.get()
    }

    fn exhausted(&self) -> bool {
        let max = self.max_packets.get();
        max != 0 && self.sent.get() >= max
    }

    fn send(&self, sim: &Simulator) {
        self.send_event.set(None);
        if self.exhausted() {
            return;
        }
        let socket = self.socket.borrow().clone();
        let Some(socket) = socket else {
            return;
        };
        let size = self.packet_size.get();
        // A request that cannot be routed still uses up one of MaxPackets.
        self.sent.set(self.sent.get() + 1);
        match socket.send_to(sim, size, self.remote()) {
            Ok(()) => {
                self.tx.fire(sim, &size);
                tracing::trace!(
                    remote = %self.remote(),
                    size,
                    sent = self.sent.get(),
                    "echo request sent"
                );
            }
            Err(error) => tracing::warn!(%error, remote = %self.remote(), "echo request not sent"),
        }
        if !self.exhausted() {
            self.schedule_send(sim, self.interval.get());
        }
    }

    fn schedule_send(&self, sim: &Simulator, delay: Time) {
        let me = self.me.clone();
        let id = sim.schedule(delay, move |sim| {
            if let Some(client) = me.upgrade() {
                client.send(sim);
            }
        });
        self.send_event.set(Some(id));
    }
}

impl HasAttributes for UdpEchoClient {
    fn type_name(&self) -> &'static str {
        "ns3::UdpEchoClient"
    }

    fn is_type(&self, type_name: &str) -> bool {
        type_name == self.type_name() || type_name == APPLICATION_TYPE
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match name {
            "MaxPackets" => self.max_packets.set(value.to_u32(name)?),
            "Interval" => self.interval.set(value.to_time(name)?),
            "PacketSize" => self.packet_size.set(value.to_u32(name)?),
            "RemotePort" => self.remote_port.set(value.to_u16(name)?),
            "RemoteAddress" => match value {
                AttributeValue::String(text) => self
                    .remote_address
                    .set(crate::internet::address::parse_ipv4("remote address", text)?),
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

impl Application for UdpEchoClient {
    fn node(&self) -> Option<Rc<Node>> {
        self.node.upgrade()
    }

    fn schedule(&self) -> &AppSchedule {
        &self.schedule
    }

    fn start(&self, sim: &Simulator) {
        if self.is_running() {
            return;
        }
        let Some(ipv4) = self.node.upgrade().and_then(|node| node.ipv4()) else {
            tracing::warn!("echo client started on a node without an internet stack");
            return;
        };
        let socket = match ipv4.udp_bind(0) {
            Ok(socket) => socket,
            Err(error) => {
                tracing::warn!(%error, "echo client could not bind");
                return;
            }
        };
        let me = self.me.clone();
        socket.set_recv_callback(move |sim, packet, _from| {
            if let Some(client) = me.upgrade() {
                client.received.set(client.received.get() + 1);
                client.rx.fire(sim, &packet.payload_size());
            }
        });
        tracing::debug!(
            node = ipv4.node_id(),
            remote = %self.remote(),
            "echo client started"
        );
        *self.socket.borrow_mut() = Some(socket);
        self.schedule_send(sim, Time::ZERO);
    }

    fn stop(&self, sim: &Simulator) {
        if let Some(id) = self.send_event.take() {
            sim.cancel(id);
        }
        if let Some(socket) = self.socket.borrow_mut().take() {
            socket.close();
            tracing::debug!(sent = self.sent.get(), "echo client stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.socket.borrow().is_some()
    }
}

impl fmt::Debug for UdpEchoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpEchoClient")
            .field("remote", &self.remote())
            .field("sent", &self.sent.get())
            .field("received", &self.received.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Installation
// ============================================================================

pub fn install_echo_server(sim: &Simulator, node: &Rc<Node>, port: u16) -> Rc<UdpEchoServer> {
    let app = UdpEchoServer::new(node, port);
    node.add_application(sim, app.clone());
    tracing::debug!(node = node.id(), port, "echo server installed");
    app
}

pub fn install_echo_client(
    sim: &Simulator,
    node: &Rc<Node>,
    remote: SocketAddrV4,
    packet_size: u32,
    interval: Time,
    max_packets: u32,
) -> Rc<UdpEchoClient> {
    let app = UdpEchoClient::new(node, remote);
    app.set_packet_size(packet_size);
    app.set_interval(interval);
    app.set_max_packets(max_packets);
    node.add_application(sim, app.clone());
    tracing::debug!(node = node.id(), %remote, "echo client installed");
    app
}
