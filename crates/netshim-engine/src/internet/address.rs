//! Interface addresses and sequential address assignment.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::EngineError;
use crate::device::NetDevice;

/// Parses dotted-quad text, naming `what` in the error.
pub fn parse_ipv4(what: &'static str, text: &str) -> Result<Ipv4Addr, EngineError> {
    text.trim()
        .parse()
        .map_err(|_| EngineError::invalid(what, text))
}

/// Prefix length of a contiguous mask.
pub fn prefix_len(mask: Ipv4Addr) -> Result<u32, EngineError> {
    let bits = u32::from(mask);
    let len = bits.leading_ones();
    if bits.checked_shl(len).unwrap_or(0) != 0 {
        return Err(EngineError::invalid("network mask", mask.to_string()));
    }
    Ok(len)
}

/// One address of an interface with its mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4InterfaceAddress {
    pub local: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl Ipv4InterfaceAddress {
    pub fn new(local: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, EngineError> {
        prefix_len(mask)?;
        Ok(Self { local, mask })
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.local) & u32::from(self.mask))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.local) | !u32::from(self.mask))
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(address) & mask == u32::from(self.local) & mask
    }
}

impl fmt::Display for Ipv4InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.local, self.prefix_len())
    }
}

/// Hands out consecutive host addresses, remembering per network where it
/// left off.
#[derive(Debug, Default)]
pub struct Ipv4AddressHelper {
    cursors: HashMap<(Ipv4Addr, Ipv4Addr), u32>,
}

impl Ipv4AddressHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host number the next assignment in `network/mask` starts at.
    pub fn next_host(&self, network: Ipv4Addr, mask: Ipv4Addr) -> u32 {
        self.cursors.get(&(network, mask)).copied().unwrap_or(1)
    }

    /// Assigns one address to each device, in order. Nothing is assigned
    /// unless every device can be numbered.
    pub fn assign(
        &mut self,
        network: Ipv4Addr,
        mask: Ipv4Addr,
        devices: &[Rc<dyn NetDevice>],
    ) -> Result<Vec<Ipv4Addr>, EngineError> {
        prefix_len(mask)?;
        let mask_bits = u32::from(mask);
        let network_bits = u32::from(network);
        if network_bits & !mask_bits != 0 {
            return Err(EngineError::invalid("network address", network.to_string()));
        }

        let mut stacks = Vec::with_capacity(devices.len());
        for device in devices {
            let node = device.node().ok_or(EngineError::Detached)?;
            let ipv4 = node
                .ipv4()
                .ok_or(EngineError::NoInternetStack { node: node.id() })?;
            stacks.push(ipv4);
        }

        // Host numbers 1 ..= last exclude the network and broadcast addresses.
        let last_host = (!mask_bits).saturating_sub(1);
        let first = self.next_host(network, mask);
        let count = devices.len() as u64;
        if u64::from(first) + count > u64::from(last_host) + 1 {
            return Err(EngineError::AddressExhausted { network, mask });
        }

        let mut assigned = Vec::with_capacity(devices.len());
        for (offset, (device, ipv4)) in devices.iter().zip(stacks).enumerate() {
            let local = Ipv4Addr::from(network_bits | (first + offset as u32));
            ipv4.add_address(device, Ipv4InterfaceAddress { local, mask });
            assigned.push(local);
        }
        self.cursors
            .insert((network, mask), first + devices.len() as u32);
        tracing::debug!(%network, %mask, count = assigned.len(), "addresses assigned");
        Ok(assigned)
    }
}
