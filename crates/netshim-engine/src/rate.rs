//! Link data rates.

use std::fmt;
use std::str::FromStr;

use crate::time::{split_quantity, Time, NANOS_PER_SEC};
use crate::EngineError;

/// A data rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        DataRate(bps)
    }

    pub const fn bps(self) -> u64 {
        self.0
    }

    /// Time needed to serialize `bytes` onto the wire at this rate.
    pub fn tx_time(self, bytes: u32) -> Time {
        if self.0 == 0 {
            return Time::MAX;
        }
        let bits = u128::from(bytes) * 8;
        let nanos = (bits * u128::from(NANOS_PER_SEC)).div_ceil(u128::from(self.0));
        Time::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

impl FromStr for DataRate {
    type Err = EngineError;

    /// Parses the simulator's suffixed rate syntax: `"5Mbps"`, `"100kbps"`, `"1GBps"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity("data rate", s)?;
        let scale: f64 = match unit {
            "bps" | "b/s" => 1.0,
            "kbps" | "Kbps" | "kb/s" => 1e3,
            "Mbps" | "mbps" | "Mb/s" => 1e6,
            "Gbps" | "gbps" | "Gb/s" => 1e9,
            "Bps" | "B/s" => 8.0,
            "KBps" | "kBps" | "KB/s" => 8e3,
            "MBps" | "MB/s" => 8e6,
            "GBps" | "GB/s" => 8e9,
            _ => return Err(EngineError::invalid("data rate", s)),
        };
        let bps = (value * scale).round();
        if bps < 1.0 || bps >= u64::MAX as f64 {
            return Err(EngineError::invalid("data rate", s));
        }
        Ok(DataRate(bps as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("5Mbps", 5_000_000)]
    #[test_case("100kbps", 100_000)]
    #[test_case("1Gbps", 1_000_000_000)]
    #[test_case("54Mbps", 54_000_000)]
    #[test_case("1.5Mbps", 1_500_000)]
    #[test_case("10MBps", 80_000_000)]
    #[test_case("9600bps", 9_600)]
    fn parses_rate_strings(text: &str, bps: u64) {
        assert_eq!(text.parse::<DataRate>().unwrap().bps(), bps);
    }

    #[test_case("")]
    #[test_case("5")]
    #[test_case("5 furlongs")]
    #[test_case("0bps")]
    fn rejects_malformed_rates(text: &str) {
        assert!(text.parse::<DataRate>().is_err());
    }

    #[test]
    fn tx_time_rounds_up() {
        let rate = DataRate::from_bps(5_000_000);
        // 130 bytes = 1040 bits at 5 Mbps = 208 us
        assert_eq!(rate.tx_time(130), Time::from_micros(208));
        // 1 byte at 3 bps = 2.666.. s, rounded up to the next nanosecond
        assert_eq!(
            DataRate::from_bps(3).tx_time(1),
            Time::from_nanos(2_666_666_667)
        );
    }
}
