//! Typed attribute values and the objects that accept them.
//!
//! Attribute setters receive a loosely typed [`AttributeValue`] and convert
//! it to the field's native type; each conversion accepts every value kind
//! that can represent the target unambiguously.

use std::fmt;

use crate::mobility::Vector3;
use crate::rate::DataRate;
use crate::time::Time;
use crate::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Uint(u64),
    Double(f64),
    String(String),
}

impl AttributeValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Uint(_) => "unsigned integer",
            AttributeValue::Double(_) => "double",
            AttributeValue::String(_) => "string",
        }
    }

    fn mismatch(&self, name: &str) -> EngineError {
        EngineError::AttributeType {
            name: name.to_string(),
            found: self.kind_name(),
        }
    }

    pub fn to_bool(&self, name: &str) -> Result<bool, EngineError> {
        match self {
            AttributeValue::Bool(b) => Ok(*b),
            AttributeValue::Uint(u) => Ok(*u != 0),
            AttributeValue::String(s) => match s.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(EngineError::invalid("boolean", s.as_str())),
            },
            AttributeValue::Double(_) => Err(self.mismatch(name)),
        }
    }

    pub fn to_u64(&self, name: &str) -> Result<u64, EngineError> {
        match self {
            AttributeValue::Uint(u) => Ok(*u),
            AttributeValue::Double(d) if d.fract() == 0.0 && *d >= 0.0 && *d < u64::MAX as f64 => {
                Ok(*d as u64)
            }
            AttributeValue::String(s) => s
                .trim()
                .parse()
                .map_err(|_| EngineError::invalid("unsigned integer", s.as_str())),
            _ => Err(self.mismatch(name)),
        }
    }

    pub fn to_u32(&self, name: &str) -> Result<u32, EngineError> {
        let value = self.to_u64(name)?;
        u32::try_from(value).map_err(|_| EngineError::invalid("32-bit value", value.to_string()))
    }

    pub fn to_u16(&self, name: &str) -> Result<u16, EngineError> {
        let value = self.to_u64(name)?;
        u16::try_from(value).map_err(|_| EngineError::invalid("16-bit value", value.to_string()))
    }

    /// Doubles are seconds; strings use the delay syntax (`"2ms"`).
    pub fn to_time(&self, name: &str) -> Result<Time, EngineError> {
        match self {
            AttributeValue::Double(d) => Time::from_seconds(*d),
            AttributeValue::String(s) => s.parse(),
            _ => Err(self.mismatch(name)),
        }
    }

    /// Unsigned integers are bits per second; strings use the rate syntax.
    pub fn to_data_rate(&self, name: &str) -> Result<DataRate, EngineError> {
        match self {
            AttributeValue::Uint(0) => Err(EngineError::invalid("data rate", "0")),
            AttributeValue::Uint(bps) => Ok(DataRate::from_bps(*bps)),
            AttributeValue::String(s) => s.parse(),
            _ => Err(self.mismatch(name)),
        }
    }

    pub fn to_vector(&self, name: &str) -> Result<Vector3, EngineError> {
        match self {
            AttributeValue::String(s) => s.parse(),
            _ => Err(self.mismatch(name)),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Uint(u) => write!(f, "{u}"),
            AttributeValue::Double(d) => write!(f, "{d}"),
            AttributeValue::String(s) => f.write_str(s),
        }
    }
}

/// An object whose parameters can be set by name.
pub trait HasAttributes {
    /// Registered type name, e.g. `ns3::PointToPointNetDevice`.
    fn type_name(&self) -> &'static str;

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError>;

    /// Whether this object answers to `type_name` in a `$TypeName` path
    /// segment. Base type names match every object of that family.
    fn is_type(&self, type_name: &str) -> bool {
        self.type_name() == type_name
    }

    fn unknown_attribute(&self, name: &str) -> EngineError {
        EngineError::UnknownAttribute {
            type_name: self.type_name(),
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(AttributeValue::Uint(1500), Some(1500))]
    #[test_case(AttributeValue::String("42".into()), Some(42))]
    #[test_case(AttributeValue::Double(3.0), Some(3))]
    #[test_case(AttributeValue::Double(3.5), None)]
    #[test_case(AttributeValue::Bool(true), None)]
    fn unsigned_conversion(value: AttributeValue, expected: Option<u64>) {
        assert_eq!(value.to_u64("MaxPackets").ok(), expected);
    }

    #[test_case(AttributeValue::String("2ms".into()), Some(Time::from_millis(2)))]
    #[test_case(AttributeValue::Double(0.5), Some(Time::from_millis(500)))]
    #[test_case(AttributeValue::Double(-1.0), None)]
    #[test_case(AttributeValue::Uint(5), None)]
    fn time_conversion(value: AttributeValue, expected: Option<Time>) {
        assert_eq!(value.to_time("Delay").ok(), expected);
    }

    #[test_case(AttributeValue::String("10Mbps".into()), Some(10_000_000))]
    #[test_case(AttributeValue::Uint(9600), Some(9600))]
    #[test_case(AttributeValue::Uint(0), None)]
    #[test_case(AttributeValue::Double(1e6), None)]
    fn rate_conversion(value: AttributeValue, expected: Option<u64>) {
        assert_eq!(value.to_data_rate("DataRate").ok().map(DataRate::bps), expected);
    }

    #[test]
    fn narrowing_is_checked() {
        assert_eq!(AttributeValue::Uint(9).to_u16("Port").unwrap(), 9);
        assert!(AttributeValue::Uint(70_000).to_u16("Port").is_err());
        assert!(AttributeValue::Uint(u64::MAX).to_u32("PacketSize").is_err());
    }

    #[test]
    fn mismatch_names_the_attribute() {
        let err = AttributeValue::Bool(true).to_time("Interval").unwrap_err();
        assert_eq!(
            err.to_string(),
            "attribute `Interval` cannot be set from a bool value"
        );
    }
}
