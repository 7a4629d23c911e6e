//! Infrastructure Wi-Fi.
//!
//! One access point and any number of stations share a channel. Stations
//! are associated statically at install time; frames between stations are
//! relayed by the AP. Reception is ideal within the BSS: there is no loss
//! model and no rate adaptation, and every frame uses the configured data
//! mode.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub use netshim_config::WifiStandard;

use super::shared::{Flavor, SharedChannel, SharedNetDevice};
use super::{DeviceKind, NetDevice};
use crate::node::Node;
use crate::packet::Mac48;
use crate::rate::DataRate;
use crate::time::{NANOS_PER_SEC, Time};
use crate::{EngineError, Simulator};

pub const DEFAULT_MTU: u16 = 2296;
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Maps the ABI standard code; unknown codes select `fallback`.
pub fn standard_from_code(code: i32, fallback: WifiStandard) -> WifiStandard {
    match code {
        0 => WifiStandard::A,
        1 => WifiStandard::B,
        2 => WifiStandard::G,
        3 => WifiStandard::N2_4Ghz,
        4 => WifiStandard::N5Ghz,
        5 => WifiStandard::Ac,
        _ => fallback,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiBand {
    Band2_4Ghz,
    Band5Ghz,
}

impl WifiBand {
    pub fn of(standard: WifiStandard) -> Self {
        match standard {
            WifiStandard::B | WifiStandard::G | WifiStandard::N2_4Ghz => WifiBand::Band2_4Ghz,
            WifiStandard::A | WifiStandard::N5Ghz | WifiStandard::Ac => WifiBand::Band5Ghz,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WifiBand::Band2_4Ghz => "2.4 GHz",
            WifiBand::Band5Ghz => "5 GHz",
        }
    }

    pub fn default_channel(self) -> u16 {
        match self {
            WifiBand::Band2_4Ghz => 1,
            WifiBand::Band5Ghz => 36,
        }
    }

    /// Resolves a requested channel number; 0 selects the band default.
    pub fn channel(self, requested: i32) -> Result<u16, EngineError> {
        let valid = match self {
            WifiBand::Band2_4Ghz => 1..=14,
            WifiBand::Band5Ghz => 36..=165,
        };
        match requested {
            0 => Ok(self.default_channel()),
            n if valid.contains(&n) => Ok(n as u16),
            n => Err(EngineError::InvalidWifiChannel {
                channel: n,
                band: self.name(),
            }),
        }
    }
}

impl fmt::Display for WifiBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modulation {
    Dsss,
    Ofdm,
    Ht,
    Vht,
}

// 20 MHz, long guard interval, one spatial stream; in units of 100 kbps.
const HT_MCS_RATES: [u64; 8] = [65, 130, 195, 260, 390, 520, 585, 650];
// 80 MHz, long guard interval, one spatial stream; in units of 100 kbps.
const VHT_MCS_RATES: [u64; 10] = [293, 585, 878, 1170, 1755, 2340, 2633, 2925, 3510, 3900];

/// A PHY transmission mode: modulation family plus bit rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiMode {
    name: String,
    rate: DataRate,
    modulation: Modulation,
}

impl WifiMode {
    /// Parses a mode name (`"OfdmRate54Mbps"`, `"DsssRate11Mbps"`,
    /// `"HtMcs7"`, `"VhtMcs9"`) or a plain rate (`"54Mbps"`) and checks that
    /// `standard` can use it.
    pub fn parse(text: &str, standard: WifiStandard) -> Result<Self, EngineError> {
        let text = text.trim();
        let invalid = || EngineError::invalid("Wi-Fi data mode", text);
        let (modulation, rate) = if let Some(rest) = text.strip_prefix("DsssRate") {
            (Modulation::Dsss, parse_mode_rate(rest).ok_or_else(invalid)?)
        } else if let Some(rest) = text
            .strip_prefix("ErpOfdmRate")
            .or_else(|| text.strip_prefix("OfdmRate"))
        {
            (Modulation::Ofdm, parse_mode_rate(rest).ok_or_else(invalid)?)
        } else if let Some(mcs) = text.strip_prefix("VhtMcs") {
            let rate = mcs_rate(mcs, &VHT_MCS_RATES).ok_or_else(invalid)?;
            (Modulation::Vht, rate)
        } else if let Some(mcs) = text.strip_prefix("HtMcs") {
            let rate = mcs_rate(mcs, &HT_MCS_RATES).ok_or_else(invalid)?;
            (Modulation::Ht, rate)
        } else {
            let rate: DataRate = text.parse()?;
            let modulation = if standard == WifiStandard::B {
                Modulation::Dsss
            } else {
                Modulation::Ofdm
            };
            (modulation, rate)
        };

        let supported = match modulation {
            Modulation::Dsss => WifiBand::of(standard) == WifiBand::Band2_4Ghz,
            Modulation::Ofdm => standard != WifiStandard::B,
            Modulation::Ht => matches!(
                standard,
                WifiStandard::N2_4Ghz | WifiStandard::N5Ghz | WifiStandard::Ac
            ),
            Modulation::Vht => standard == WifiStandard::Ac,
        };
        if !supported {
            return Err(EngineError::invalid("Wi-Fi data mode for this standard", text));
        }
        Ok(Self {
            name: text.to_string(),
            rate,
            modulation,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate(&self) -> DataRate {
        self.rate
    }

    /// PLCP preamble and header duration.
    pub fn preamble(&self) -> Time {
        match self.modulation {
            Modulation::Dsss => Time::from_micros(192),
            Modulation::Ofdm | Modulation::Ht | Modulation::Vht => Time::from_micros(20),
        }
    }
}

/// `"5_5Mbps"` names 5.5 Mbps.
fn parse_mode_rate(text: &str) -> Option<DataRate> {
    text.replace('_', ".").parse().ok()
}

fn mcs_rate(index: &str, table: &[u64]) -> Option<DataRate> {
    let index: usize = index.parse().ok()?;
    table
        .get(index)
        .map(|hundred_kbps| DataRate::from_bps(hundred_kbps * 100_000))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiRole {
    AccessPoint,
    Station,
}

/// MAC and PHY configuration of one Wi-Fi device.
#[derive(Debug)]
pub struct WifiState {
    role: WifiRole,
    ssid: String,
    standard: WifiStandard,
    band: WifiBand,
    channel_number: u16,
    mode: RefCell<WifiMode>,
    access_point: Cell<Mac48>,
}

impl WifiState {
    pub fn role(&self) -> WifiRole {
        self.role
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn standard(&self) -> WifiStandard {
        self.standard
    }

    pub fn band(&self) -> WifiBand {
        self.band
    }

    pub fn channel_number(&self) -> u16 {
        self.channel_number
    }

    pub fn mode(&self) -> WifiMode {
        self.mode.borrow().clone()
    }

    /// Address of the associated AP (the AP's own address on the AP).
    pub fn access_point(&self) -> Mac48 {
        self.access_point.get()
    }

    pub(crate) fn set_mode(&self, text: &str) -> Result<(), EngineError> {
        let mode = WifiMode::parse(text, self.standard)?;
        *self.mode.borrow_mut() = mode;
        Ok(())
    }

    pub(crate) fn slot_time(&self) -> Time {
        match self.standard {
            WifiStandard::B => Time::from_micros(20),
            _ => Time::from_micros(9),
        }
    }

    pub(crate) fn airtime(&self, bytes: u32) -> Time {
        let mode = self.mode.borrow();
        mode.preamble() + mode.rate().tx_time(bytes)
    }
}

/// Speed-of-light delay between two nodes; zero unless both have a position.
pub fn propagation_delay(a: &Node, b: &Node) -> Time {
    match (a.mobility(), b.mobility()) {
        (Some(a), Some(b)) => {
            let seconds = a.position().distance(&b.position()) / SPEED_OF_LIGHT;
            Time::from_nanos((seconds * NANOS_PER_SEC as f64).round() as u64)
        }
        _ => Time::ZERO,
    }
}

/// Builds an infrastructure BSS.
#[derive(Debug, Clone)]
pub struct WifiHelper {
    standard: WifiStandard,
    band: WifiBand,
    channel_number: u16,
    mode: WifiMode,
    ssid: String,
}

impl WifiHelper {
    pub fn new(
        standard: WifiStandard,
        data_mode: &str,
        channel: i32,
        ssid: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let band = WifiBand::of(standard);
        Ok(Self {
            standard,
            band,
            channel_number: band.channel(channel)?,
            mode: WifiMode::parse(data_mode, standard)?,
            ssid: ssid.into(),
        })
    }

    pub fn standard(&self) -> WifiStandard {
        self.standard
    }

    pub fn band(&self) -> WifiBand {
        self.band
    }

    pub fn channel_number(&self) -> u16 {
        self.channel_number
    }

    fn state(&self, role: WifiRole) -> WifiState {
        WifiState {
            role,
            ssid: self.ssid.clone(),
            standard: self.standard,
            band: self.band,
            channel_number: self.channel_number,
            mode: RefCell::new(self.mode.clone()),
            access_point: Cell::new(Mac48::BROADCAST),
        }
    }

    /// Creates one station device per node in `stations` and an AP device
    /// on `ap`, all on a fresh channel.
    pub fn install_sta_ap(
        &self,
        sim: &Simulator,
        stations: &[Rc<Node>],
        ap: &Rc<Node>,
    ) -> (Vec<Rc<SharedNetDevice>>, Rc<SharedNetDevice>) {
        let channel = SharedChannel::new(DeviceKind::Wifi, self.mode.rate(), Time::ZERO);
        let station_devices: Vec<_> = stations
            .iter()
            .map(|node| {
                let device = SharedNetDevice::new(
                    sim,
                    node,
                    DEFAULT_MTU,
                    Flavor::Wifi(self.state(WifiRole::Station)),
                );
                device.attach(&channel);
                node.add_device(device.clone());
                device
            })
            .collect();

        let ap_device = SharedNetDevice::new(
            sim,
            ap,
            DEFAULT_MTU,
            Flavor::Wifi(self.state(WifiRole::AccessPoint)),
        );
        ap_device.attach(&channel);
        ap.add_device(ap_device.clone());

        let bssid = ap_device.address();
        for device in station_devices.iter().chain(std::iter::once(&ap_device)) {
            if let Some(state) = device.wifi() {
                state.access_point.set(bssid);
            }
        }

        tracing::debug!(
            stations = stations.len(),
            ap = ap.id(),
            standard = %self.standard,
            band = %self.band,
            channel = self.channel_number,
            mode = self.mode.name(),
            ssid = %self.ssid,
            "Wi-Fi BSS installed"
        );
        (station_devices, ap_device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobility::{ConstantPositionMobility, Vector3};
    use test_case::test_case;

    #[test_case(0, WifiStandard::A)]
    #[test_case(1, WifiStandard::B)]
    #[test_case(2, WifiStandard::G)]
    #[test_case(3, WifiStandard::N2_4Ghz)]
    #[test_case(4, WifiStandard::N5Ghz)]
    #[test_case(5, WifiStandard::Ac)]
    #[test_case(6, WifiStandard::G ; "out of range uses fallback")]
    #[test_case(-1, WifiStandard::G ; "negative uses fallback")]
    fn standard_codes(code: i32, expected: WifiStandard) {
        assert_eq!(standard_from_code(code, WifiStandard::G), expected);
    }

    #[test]
    fn codes_three_and_four_differ_in_band() {
        let fallback = WifiStandard::N5Ghz;
        assert_eq!(
            WifiBand::of(standard_from_code(3, fallback)),
            WifiBand::Band2_4Ghz
        );
        assert_eq!(
            WifiBand::of(standard_from_code(4, fallback)),
            WifiBand::Band5Ghz
        );
    }

    #[test_case(WifiBand::Band2_4Ghz, 0, Some(1))]
    #[test_case(WifiBand::Band2_4Ghz, 6, Some(6))]
    #[test_case(WifiBand::Band2_4Ghz, 36, None)]
    #[test_case(WifiBand::Band5Ghz, 0, Some(36))]
    #[test_case(WifiBand::Band5Ghz, 149, Some(149))]
    #[test_case(WifiBand::Band5Ghz, 11, None)]
    #[test_case(WifiBand::Band5Ghz, -4, None)]
    fn channel_numbers(band: WifiBand, requested: i32, expected: Option<u16>) {
        assert_eq!(band.channel(requested).ok(), expected);
    }

    #[test_case("OfdmRate54Mbps", WifiStandard::A, 54_000_000)]
    #[test_case("ErpOfdmRate24Mbps", WifiStandard::G, 24_000_000)]
    #[test_case("DsssRate11Mbps", WifiStandard::B, 11_000_000)]
    #[test_case("DsssRate5_5Mbps", WifiStandard::G, 5_500_000)]
    #[test_case("HtMcs7", WifiStandard::N5Ghz, 65_000_000)]
    #[test_case("VhtMcs9", WifiStandard::Ac, 390_000_000)]
    #[test_case("54Mbps", WifiStandard::G, 54_000_000)]
    fn data_modes(text: &str, standard: WifiStandard, bps: u64) {
        assert_eq!(WifiMode::parse(text, standard).unwrap().rate().bps(), bps);
    }

    #[test_case("DsssRate11Mbps", WifiStandard::A)]
    #[test_case("OfdmRate6Mbps", WifiStandard::B)]
    #[test_case("HtMcs0", WifiStandard::G)]
    #[test_case("VhtMcs0", WifiStandard::N5Ghz)]
    #[test_case("HtMcs8", WifiStandard::N5Ghz)]
    #[test_case("Warp9", WifiStandard::Ac)]
    fn unsupported_modes(text: &str, standard: WifiStandard) {
        assert!(WifiMode::parse(text, standard).is_err());
    }

    #[test]
    fn preamble_depends_on_modulation() {
        let dsss = WifiMode::parse("DsssRate1Mbps", WifiStandard::B).unwrap();
        let ofdm = WifiMode::parse("OfdmRate6Mbps", WifiStandard::A).unwrap();
        assert_eq!(dsss.preamble(), Time::from_micros(192));
        assert_eq!(ofdm.preamble(), Time::from_micros(20));
    }

    #[test]
    fn propagation_uses_positions() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(3);
        let place = |x: f64| Rc::new(ConstantPositionMobility::new(Vector3::new(x, 0.0, 0.0)));
        nodes[0].set_mobility(place(0.0));
        nodes[1].set_mobility(place(300.0));

        assert_eq!(propagation_delay(&nodes[0], &nodes[1]), Time::from_nanos(1_001));
        assert_eq!(propagation_delay(&nodes[0], &nodes[2]), Time::ZERO);
    }

    #[test]
    fn install_associates_stations() {
        let sim = Simulator::new();
        let nodes = sim.create_nodes(3);
        let helper = WifiHelper::new(WifiStandard::N2_4Ghz, "HtMcs7", 0, "lab").unwrap();
        let (stations, ap) = helper.install_sta_ap(&sim, &nodes[..2], &nodes[2]);

        assert_eq!(stations.len(), 2);
        assert_eq!(helper.channel_number(), 1);
        for station in &stations {
            let state = station.wifi().unwrap();
            assert_eq!(state.role(), WifiRole::Station);
            assert_eq!(state.access_point(), ap.address());
            assert_eq!(state.ssid(), "lab");
            assert_eq!(state.band(), WifiBand::Band2_4Ghz);
        }
        assert_eq!(ap.wifi().unwrap().role(), WifiRole::AccessPoint);
        assert_eq!(ap.kind(), DeviceKind::Wifi);
        assert_eq!(ap.channel().unwrap().devices().len(), 3);
    }

    #[test]
    fn invalid_channel_fails_install() {
        assert!(matches!(
            WifiHelper::new(WifiStandard::A, "OfdmRate6Mbps", 3, "x"),
            Err(EngineError::InvalidWifiChannel { channel: 3, band: "5 GHz" })
        ));
    }
}
