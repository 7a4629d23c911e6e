//! Packet capture files.
//!
//! Classic libpcap format, microsecond timestamps, little-endian. One file
//! per device, fed by the device's promiscuous sniffer so both directions
//! are recorded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bytes::{BufMut, BytesMut};

use crate::device::NetDevice;
use crate::packet::Packet;
use crate::time::Time;
use crate::{EngineError, Simulator};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

pub struct PcapWriter {
    path: PathBuf,
    file: RefCell<File>,
    snap_len: u32,
    records: Cell<u64>,
}

impl PcapWriter {
    /// Creates (or truncates) `path` and writes the global header.
    pub fn create(path: &Path, snap_len: u32, link_type: u32) -> Result<Self, EngineError> {
        let mut file = File::create(path).map_err(|source| EngineError::Pcap {
            path: path.to_path_buf(),
            source,
        })?;
        let mut header = BytesMut::with_capacity(GLOBAL_HEADER_LEN);
        header.put_u32_le(PCAP_MAGIC);
        header.put_u16_le(VERSION_MAJOR);
        header.put_u16_le(VERSION_MINOR);
        header.put_i32_le(0); // thiszone
        header.put_u32_le(0); // sigfigs
        header.put_u32_le(snap_len);
        header.put_u32_le(link_type);
        file.write_all(&header).map_err(|source| EngineError::Pcap {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: RefCell::new(file),
            snap_len,
            records: Cell::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records.get()
    }

    pub fn write_packet(&self, time: Time, packet: &Packet) -> Result<(), EngineError> {
        let bytes = packet.to_bytes();
        let captured = bytes.len().min(self.snap_len as usize);
        let nanos = time.as_nanos();

        let mut record = BytesMut::with_capacity(RECORD_HEADER_LEN + captured);
        record.put_u32_le((nanos / 1_000_000_000) as u32);
        record.put_u32_le((nanos % 1_000_000_000 / 1_000) as u32);
        record.put_u32_le(captured as u32);
        record.put_u32_le(bytes.len() as u32);
        record.put_slice(&bytes[..captured]);

        self.file
            .borrow_mut()
            .write_all(&record)
            .map_err(|source| EngineError::Pcap {
                path: self.path.clone(),
                source,
            })?;
        self.records.set(self.records.get() + 1);
        Ok(())
    }
}

impl fmt::Debug for PcapWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcapWriter")
            .field("path", &self.path)
            .field("records", &self.records.get())
            .finish_non_exhaustive()
    }
}

/// `<prefix>-<node>-<device>.pcap`
pub fn pcap_file_name(prefix: &str, node: u32, if_index: u32) -> String {
    format!("{prefix}-{node}-{if_index}.pcap")
}

/// Starts capturing every frame `device` sends or sees into a file in the
/// configured capture directory.
pub fn enable_pcap(
    sim: &Simulator,
    device: &Rc<dyn NetDevice>,
    prefix: &str,
) -> Result<Rc<PcapWriter>, EngineError> {
    let node = device.node().ok_or(EngineError::Detached)?;
    let config = &sim.config().pcap;
    let path = config
        .directory
        .join(pcap_file_name(prefix, node.id(), device.if_index()));
    let writer = Rc::new(PcapWriter::create(
        &path,
        config.snap_len,
        device.kind().pcap_link_type(),
    )?);

    let sink = Rc::clone(&writer);
    device
        .traces()
        .promisc_sniffer
        .connect(move |sim, packet: &Packet| {
            if let Err(error) = sink.write_packet(sim.now(), packet) {
                tracing::warn!(%error, "pcap record not written");
            }
        });
    tracing::debug!(path = %path.display(), "pcap enabled");
    Ok(writer)
}
