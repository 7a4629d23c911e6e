//! Node positions.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::attribute::{AttributeValue, HasAttributes};
use crate::node::Node;
use crate::EngineError;

/// Cartesian coordinates in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vector3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.x, self.y, self.z)
    }
}

impl FromStr for Vector3 {
    type Err = EngineError;

    /// Parses `"x:y:z"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(':')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| EngineError::invalid("position", s))?;
        match parts.as_slice() {
            &[x, y, z] if parts.iter().all(|v| v.is_finite()) => Ok(Vector3 { x, y, z }),
            _ => Err(EngineError::invalid("position", s)),
        }
    }
}

/// A mobility model that never moves.
#[derive(Debug, Default)]
pub struct ConstantPositionMobility {
    position: Cell<Vector3>,
}

impl ConstantPositionMobility {
    pub fn new(position: Vector3) -> Self {
        Self {
            position: Cell::new(position),
        }
    }

    pub fn position(&self) -> Vector3 {
        self.position.get()
    }

    pub fn set_position(&self, position: Vector3) -> Result<(), EngineError> {
        if ![position.x, position.y, position.z]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(EngineError::invalid("position", position.to_string()));
        }
        self.position.set(position);
        Ok(())
    }
}

/// Moves `node` to `position`, installing a constant-position model first
/// if the node has none.
pub fn set_constant_position(node: &Node, position: Vector3) -> Result<(), EngineError> {
    if let Some(model) = node.mobility() {
        return model.set_position(position);
    }
    let model = ConstantPositionMobility::default();
    model.set_position(position)?;
    node.set_mobility(Rc::new(model));
    tracing::debug!(node = node.id(), %position, "mobility model installed");
    Ok(())
}

impl HasAttributes for ConstantPositionMobility {
    fn type_name(&self) -> &'static str {
        "ns3::ConstantPositionMobilityModel"
    }

    fn set_attribute(&self, name: &str, value: &AttributeValue) -> Result<(), EngineError> {
        match name {
            "Position" => self.set_position(value.to_vector(name)?),
            _ => Err(self.unknown_attribute(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1:2:3", Vector3::new(1.0, 2.0, 3.0))]
    #[test_case("0:0:0", Vector3::new(0.0, 0.0, 0.0))]
    #[test_case(" -5.5 : 10 : 0.25 ", Vector3::new(-5.5, 10.0, 0.25))]
    fn parses_positions(text: &str, expected: Vector3) {
        assert_eq!(text.parse::<Vector3>().unwrap(), expected);
    }

    #[test_case("1:2")]
    #[test_case("1:2:3:4")]
    #[test_case("a:b:c")]
    #[test_case("inf:0:0")]
    fn rejects_malformed_positions(text: &str) {
        assert!(text.parse::<Vector3>().is_err());
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(3.0, 4.0, 12.0);
        assert!((a.distance(&b) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn position_attribute() {
        let model = ConstantPositionMobility::default();
        model
            .set_attribute("Position", &AttributeValue::String("10:20:0".into()))
            .unwrap();
        assert_eq!(model.position(), Vector3::new(10.0, 20.0, 0.0));
        assert!(model
            .set_attribute("Velocity", &AttributeValue::String("1:0:0".into()))
            .is_err());
        assert!(model.set_position(Vector3::new(f64::NAN, 0.0, 0.0)).is_err());
    }

    #[test]
    fn node_position_installs_a_model_once() {
        let sim = crate::Simulator::new();
        let node = &sim.create_nodes(1)[0];
        assert!(node.mobility().is_none());

        set_constant_position(node, Vector3::new(1.0, 0.0, 0.0)).unwrap();
        let model = node.mobility().unwrap();
        set_constant_position(node, Vector3::new(2.0, 0.0, 0.0)).unwrap();
        assert!(Rc::ptr_eq(&model, &node.mobility().unwrap()));
        assert_eq!(model.position(), Vector3::new(2.0, 0.0, 0.0));

        assert!(set_constant_position(node, Vector3::new(0.0, f64::INFINITY, 0.0)).is_err());
    }
}
