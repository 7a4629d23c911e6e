//! UDP sockets.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddrV4;
use std::rc::{Rc, Weak};

use super::Ipv4L3;
use crate::packet::{Packet, UDP_PROTOCOL, UdpHeader};
use crate::{EngineError, Simulator};

/// Receive handler: the datagram (headers still attached) and its sender.
pub type RecvCallback = Rc<dyn Fn(&Simulator, Packet, SocketAddrV4)>;

pub struct UdpSocket {
    l3: Weak<Ipv4L3>,
    local_port: u16,
    recv: RefCell<Option<RecvCallback>>,
    closed: Cell<bool>,
}

impl UdpSocket {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn set_recv_callback(&self, f: impl Fn(&Simulator, Packet, SocketAddrV4) + 'static) {
        *self.recv.borrow_mut() = Some(Rc::new(f));
    }

    /// Sends `payload_size` zero bytes to `destination`.
    pub fn send_to(
        &self,
        sim: &Simulator,
        payload_size: u32,
        destination: SocketAddrV4,
    ) -> Result<(), EngineError> {
        if self.closed.get() {
            return Err(EngineError::Detached);
        }
        let l3 = self.l3.upgrade().ok_or(EngineError::Detached)?;
        let mut packet = Packet::new(sim.allocate_packet_uid(), payload_size);
        packet.set_udp(UdpHeader {
            source_port: self.local_port,
            destination_port: destination.port(),
        });
        l3.send(sim, packet, *destination.ip(), UDP_PROTOCOL)
    }

    /// Unbinds the port. Later datagrams to it are discarded.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.recv.borrow_mut().take();
        if let Some(l3) = self.l3.upgrade() {
            l3.udp().unbind(self.local_port);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn deliver(&self, sim: &Simulator, packet: Packet, from: SocketAddrV4) {
        let callback = self.recv.borrow().clone();
        if let Some(callback) = callback {
            callback(sim, packet, from);
        }
    }
}

impl fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpSocket")
            .field("local_port", &self.local_port)
            .field("closed", &self.closed.get())
            .finish_non_exhaustive()
    }
}

/// Port demultiplexer of one node.
#[derive(Debug)]
pub struct UdpL4 {
    sockets: RefCell<HashMap<u16, Rc<UdpSocket>>>,
    ephemeral_start: u16,
    next_ephemeral: Cell<u16>,
}

impl UdpL4 {
    pub(crate) fn new(ephemeral_start: u16) -> Self {
        let start = ephemeral_start.max(1);
        Self {
            sockets: RefCell::new(HashMap::new()),
            ephemeral_start: start,
            next_ephemeral: Cell::new(start),
        }
    }

    pub(crate) fn bind(
        &self,
        l3: &Weak<Ipv4L3>,
        node: u32,
        port: u16,
    ) -> Result<Rc<UdpSocket>, EngineError> {
        let port = if port == 0 {
            self.allocate_ephemeral()
                .ok_or(EngineError::PortInUse { node, port })?
        } else {
            port
        };
        let mut sockets = self.sockets.borrow_mut();
        if sockets.contains_key(&port) {
            return Err(EngineError::PortInUse { node, port });
        }
        let socket = Rc::new(UdpSocket {
            l3: l3.clone(),
            local_port: port,
            recv: RefCell::new(None),
            closed: Cell::new(false),
        });
        sockets.insert(port, Rc::clone(&socket));
        tracing::trace!(node, port, "UDP socket bound");
        Ok(socket)
    }

    fn allocate_ephemeral(&self) -> Option<u16> {
        let sockets = self.sockets.borrow();
        let span = u32::from(u16::MAX - self.ephemeral_start) + 1;
        let mut candidate = self.next_ephemeral.get();
        for _ in 0..span {
            let next = if candidate == u16::MAX {
                self.ephemeral_start
            } else {
                candidate + 1
            };
            if !sockets.contains_key(&candidate) {
                self.next_ephemeral.set(next);
                return Some(candidate);
            }
            candidate = next;
        }
        None
    }

    pub(crate) fn unbind(&self, port: u16) {
        self.sockets.borrow_mut().remove(&port);
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.sockets.borrow().contains_key(&port)
    }

    pub(crate) fn receive(&self, sim: &Simulator, packet: Packet) {
        let (Some(udp), Some(ip)) = (packet.udp().copied(), packet.ipv4().copied()) else {
            return;
        };
        let socket = self.sockets.borrow().get(&udp.destination_port).cloned();
        match socket {
            Some(socket) => {
                let from = SocketAddrV4::new(ip.source, udp.source_port);
                socket.deliver(sim, packet, from);
            }
            None => tracing::trace!(
                port = udp.destination_port,
                uid = packet.uid(),
                "no socket bound, datagram discarded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l4() -> UdpL4 {
        UdpL4::new(49153)
    }

    #[test]
    fn explicit_ports_are_exclusive() {
        let udp = l4();
        let socket = udp.bind(&Weak::new(), 0, 9).unwrap();
        assert_eq!(socket.local_port(), 9);
        assert!(matches!(
            udp.bind(&Weak::new(), 0, 9),
            Err(EngineError::PortInUse { port: 9, .. })
        ));
        udp.unbind(9);
        assert!(udp.bind(&Weak::new(), 0, 9).is_ok());
    }

    #[test]
    fn ephemeral_ports_count_up_and_skip_bound_ones() {
        let udp = l4();
        udp.bind(&Weak::new(), 0, 49154).unwrap();
        let a = udp.bind(&Weak::new(), 0, 0).unwrap();
        let b = udp.bind(&Weak::new(), 0, 0).unwrap();
        assert_eq!(a.local_port(), 49153);
        assert_eq!(b.local_port(), 49155);
    }

    #[test]
    fn ephemeral_range_wraps_and_exhausts() {
        let udp = UdpL4::new(u16::MAX - 1);
        assert_eq!(udp.bind(&Weak::new(), 0, 0).unwrap().local_port(), u16::MAX - 1);
        assert_eq!(udp.bind(&Weak::new(), 0, 0).unwrap().local_port(), u16::MAX);
        assert!(udp.bind(&Weak::new(), 0, 0).is_err());
        udp.unbind(u16::MAX - 1);
        assert_eq!(udp.bind(&Weak::new(), 0, 0).unwrap().local_port(), u16::MAX - 1);
    }

    #[test]
    fn detached_socket_cannot_send() {
        let sim = Simulator::new();
        let udp = l4();
        let socket = udp.bind(&Weak::new(), 0, 7).unwrap();
        let destination = SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 9);
        assert!(matches!(
            socket.send_to(&sim, 10, destination),
            Err(EngineError::Detached)
        ));
    }
}
