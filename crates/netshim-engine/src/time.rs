//! Simulated time.
//!
//! Time is a nanosecond count from the start of the simulation. The clock only
//! moves when the scheduler dispatches an event.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use crate::EngineError;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point in (or span of) simulated time with nanosecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(u64);

impl Time {
    pub const ZERO: Time = Time(0);
    pub const MAX: Time = Time(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        Time(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Time(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Time(millis.saturating_mul(1_000_000))
    }

    /// Converts seconds to time, rounding to the nearest nanosecond.
    pub fn from_seconds(seconds: f64) -> Result<Self, EngineError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(EngineError::InvalidTime(seconds));
        }
        let nanos = (seconds * NANOS_PER_SEC as f64).round();
        if nanos >= u64::MAX as f64 {
            return Err(EngineError::InvalidTime(seconds));
        }
        Ok(Time(nanos as u64))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub const fn saturating_sub(self, rhs: Time) -> Time {
        Time(self.0.saturating_sub(rhs.0))
    }

    /// Absolute difference, used for jitter.
    pub const fn abs_diff(self, other: Time) -> Time {
        Time(self.0.abs_diff(other.0))
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        Time(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        *self = *self + rhs;
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.as_seconds())
    }
}

/// Splits `"2.5ms"` into `(2.5, "ms")`.
pub(crate) fn split_quantity<'a>(
    what: &'static str,
    text: &'a str,
) -> Result<(f64, &'a str), EngineError> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| EngineError::invalid(what, text))?;
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::invalid(what, text));
    }
    Ok((value, unit.trim()))
}

impl FromStr for Time {
    type Err = EngineError;

    /// Parses the simulator's suffixed delay syntax: `"2ms"`, `"6560ns"`, `"1.5s"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, unit) = split_quantity("delay", s)?;
        let scale = match unit {
            "" | "s" => 1.0,
            "ms" => 1e-3,
            "us" => 1e-6,
            "ns" => 1e-9,
            "min" => 60.0,
            "h" => 3600.0,
            _ => return Err(EngineError::invalid("delay", s)),
        };
        Time::from_seconds(value * scale).map_err(|_| EngineError::invalid("delay", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("2ms", 2_000_000)]
    #[test_case("6560ns", 6_560)]
    #[test_case("10us", 10_000)]
    #[test_case("1.5s", 1_500_000_000)]
    #[test_case("3", 3_000_000_000)]
    #[test_case("1min", 60_000_000_000)]
    #[test_case(" 4 ms ", 4_000_000)]
    fn parses_delay_strings(text: &str, nanos: u64) {
        assert_eq!(text.parse::<Time>().unwrap(), Time::from_nanos(nanos));
    }

    #[test_case("")]
    #[test_case("ms")]
    #[test_case("2 parsecs")]
    #[test_case("-1ms")]
    fn rejects_malformed_delays(text: &str) {
        assert!(text.parse::<Time>().is_err());
    }

    #[test]
    fn seconds_round_to_nearest_nanosecond() {
        assert_eq!(Time::from_seconds(0.5).unwrap(), Time::from_millis(500));
        assert_eq!(Time::from_seconds(1e-10).unwrap(), Time::ZERO);
        assert_eq!(Time::from_seconds(2.0).unwrap().as_seconds(), 2.0);
    }

    #[test]
    fn rejects_negative_and_non_finite_seconds() {
        assert!(Time::from_seconds(-0.1).is_err());
        assert!(Time::from_seconds(f64::NAN).is_err());
        assert!(Time::from_seconds(f64::INFINITY).is_err());
    }

    #[test]
    fn arithmetic_saturates() {
        assert_eq!(Time::MAX + Time::from_nanos(1), Time::MAX);
        assert_eq!(Time::ZERO - Time::from_nanos(1), Time::ZERO);
        assert_eq!(
            Time::from_nanos(3).abs_diff(Time::from_nanos(10)),
            Time::from_nanos(7)
        );
    }
}
