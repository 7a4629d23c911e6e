//! Packets and protocol headers.
//!
//! Payload bytes are never materialized; a packet carries its payload size
//! plus the headers pushed by each layer. [`Packet::to_bytes`] renders the
//! wire image (headers, zero-filled payload, trailer) for capture files.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::flowmon::FlowId;

pub const IPV4_HEADER_SIZE: u32 = 20;
pub const UDP_HEADER_SIZE: u32 = 8;
pub const UDP_PROTOCOL: u8 = 17;
pub const DEFAULT_TTL: u8 = 64;

const ETHERTYPE_IPV4: u16 = 0x0800;
const PPP_PROTOCOL_IPV4: u16 = 0x0021;
const LLC_SNAP_IPV4: [u8; 8] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00];

// ============================================================================
// Link layer
// ============================================================================

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac48([u8; 6]);

impl Mac48 {
    pub const BROADCAST: Mac48 = Mac48([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Mac48(bytes)
    }

    /// Sequential allocation: 1 becomes `00:00:00:00:00:01`.
    pub fn from_counter(n: u64) -> Self {
        let be = n.to_be_bytes();
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&be[2..]);
        Mac48(bytes)
    }

    pub fn octets(self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for Mac48 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// 802.11 data frame addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiMacHeader {
    pub to_ds: bool,
    pub from_ds: bool,
    /// Receiver.
    pub addr1: Mac48,
    /// Transmitter.
    pub addr2: Mac48,
    /// Final destination (to DS) or original source (from DS).
    pub addr3: Mac48,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHeader {
    /// PPP protocol field only.
    Ppp,
    Ethernet { src: Mac48, dst: Mac48 },
    Wifi(WifiMacHeader),
}

impl LinkHeader {
    pub fn header_size(&self) -> u32 {
        match self {
            LinkHeader::Ppp => 2,
            LinkHeader::Ethernet { .. } => 14,
            // MAC header plus LLC/SNAP
            LinkHeader::Wifi(_) => 24 + 8,
        }
    }

    /// Frame check sequence.
    pub fn trailer_size(&self) -> u32 {
        match self {
            LinkHeader::Ppp => 0,
            LinkHeader::Ethernet { .. } | LinkHeader::Wifi(_) => 4,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        match self {
            LinkHeader::Ppp => buf.put_u16(PPP_PROTOCOL_IPV4),
            LinkHeader::Ethernet { src, dst } => {
                buf.put_slice(&dst.octets());
                buf.put_slice(&src.octets());
                buf.put_u16(ETHERTYPE_IPV4);
            }
            LinkHeader::Wifi(mac) => {
                let mut flags = 0u8;
                if mac.to_ds {
                    flags |= 0x01;
                }
                if mac.from_ds {
                    flags |= 0x02;
                }
                // Frame control: version 0, type data, subtype data.
                buf.put_u8(0x08);
                buf.put_u8(flags);
                buf.put_u16_le(0);
                buf.put_slice(&mac.addr1.octets());
                buf.put_slice(&mac.addr2.octets());
                buf.put_slice(&mac.addr3.octets());
                buf.put_u16_le(0);
                buf.put_slice(&LLC_SNAP_IPV4);
            }
        }
    }
}

// ============================================================================
// Network and transport layers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub identification: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpHeader {
    pub source_port: u16,
    pub destination_port: u16,
}

/// Marks a packet as classified by a flow monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTag {
    pub monitor: u32,
    pub flow: FlowId,
    pub packet_id: u32,
}

/// Internet checksum over `data`.
pub fn ipv4_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| {
            let hi = u32::from(pair[0]) << 8;
            let lo = pair.get(1).copied().map_or(0, u32::from);
            hi | lo
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

// ============================================================================
// Packet
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    uid: u64,
    payload_size: u32,
    udp: Option<UdpHeader>,
    ipv4: Option<Ipv4Header>,
    link: Option<LinkHeader>,
    flow_tags: Vec<FlowTag>,
}

impl Packet {
    pub fn new(uid: u64, payload_size: u32) -> Self {
        Self {
            uid,
            payload_size,
            udp: None,
            ipv4: None,
            link: None,
            flow_tags: Vec::new(),
        }
    }

    /// Simulation-wide unique id.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    /// Size of the IP datagram: IP header, transport header and payload.
    pub fn ip_size(&self) -> u32 {
        let udp = if self.udp.is_some() { UDP_HEADER_SIZE } else { 0 };
        let ip = if self.ipv4.is_some() { IPV4_HEADER_SIZE } else { 0 };
        self.payload_size + udp + ip
    }

    /// Serialized length including any link header and trailer.
    pub fn size(&self) -> u32 {
        let link = self
            .link
            .map_or(0, |link| link.header_size() + link.trailer_size());
        self.ip_size() + link
    }

    pub fn udp(&self) -> Option<&UdpHeader> {
        self.udp.as_ref()
    }

    pub fn set_udp(&mut self, header: UdpHeader) {
        self.udp = Some(header);
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        self.ipv4.as_ref()
    }

    pub fn ipv4_mut(&mut self) -> Option<&mut Ipv4Header> {
        self.ipv4.as_mut()
    }

    pub fn set_ipv4(&mut self, header: Ipv4Header) {
        self.ipv4 = Some(header);
    }

    pub fn link(&self) -> Option<&LinkHeader> {
        self.link.as_ref()
    }

    pub fn set_link(&mut self, header: LinkHeader) {
        self.link = Some(header);
    }

    pub fn remove_link(&mut self) -> Option<LinkHeader> {
        self.link.take()
    }

    pub fn flow_tag(&self, monitor: u32) -> Option<FlowTag> {
        self.flow_tags.iter().copied().find(|tag| tag.monitor == monitor)
    }

    pub fn add_flow_tag(&mut self, tag: FlowTag) {
        self.flow_tags.push(tag);
    }

    /// Wire image of the packet with a zero-filled payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size() as usize);
        if let Some(link) = &self.link {
            link.write(&mut buf);
        }
        if let Some(ip) = &self.ipv4 {
            let start = buf.len();
            buf.put_u8(0x45);
            buf.put_u8(0);
            buf.put_u16(self.ip_size() as u16);
            buf.put_u16(ip.identification);
            buf.put_u16(0);
            buf.put_u8(ip.ttl);
            buf.put_u8(ip.protocol);
            buf.put_u16(0);
            buf.put_slice(&ip.source.octets());
            buf.put_slice(&ip.destination.octets());
            let checksum = ipv4_checksum(&buf[start..]);
            buf[start + 10..start + 12].copy_from_slice(&checksum.to_be_bytes());
        }
        if let Some(udp) = &self.udp {
            buf.put_u16(udp.source_port);
            buf.put_u16(udp.destination_port);
            buf.put_u16((self.payload_size + UDP_HEADER_SIZE) as u16);
            buf.put_u16(0);
        }
        buf.put_bytes(0, self.payload_size as usize);
        if let Some(link) = &self.link {
            buf.put_bytes(0, link.trailer_size() as usize);
        }
        buf.freeze()
    }
}
