//! Session model: tracked objects and the per-class / per-object tables the
//! reconciliation passes maintain.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::Transform3D;

/// Class-level physical properties supplied by the object registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PhysicalProperties {
    /// Kilograms.
    pub mass: f64,
    pub friction: f64,
    #[serde(default)]
    pub rolling_friction: f64,
}

impl PhysicalProperties {
    pub fn new(mass: f64, friction: f64, rolling_friction: f64) -> Self {
        Self {
            mass,
            friction,
            rolling_friction,
        }
    }
}

impl Default for PhysicalProperties {
    fn default() -> Self {
        Self::new(0.1, 0.5, 0.05)
    }
}

/// Rotational symmetry periods (radians) about the object's local axes.
/// A period of `0.0` means the object has no symmetry about that axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ObjectSymmetry {
    #[serde(default, alias = "x_rotation")]
    pub x_period: f64,
    #[serde(default, alias = "y_rotation")]
    pub y_period: f64,
    #[serde(default, alias = "z_rotation")]
    pub z_period: f64,
}

impl ObjectSymmetry {
    pub fn new(x_period: f64, y_period: f64, z_period: f64) -> Self {
        Self {
            x_period,
            y_period,
            z_period,
        }
    }
}

/// A detected object with a persistent identity (its frame name).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub frame_name: String,
    pub object_class: String,
    pub properties: PhysicalProperties,
    /// Latest corrected pose in the session's parent frame.
    pub pose: Transform3D,
    pub symmetry: Option<ObjectSymmetry>,
}

impl TrackedObject {
    pub fn new(
        frame_name: impl Into<String>,
        object_class: impl Into<String>,
        properties: PhysicalProperties,
        pose: Transform3D,
    ) -> Self {
        Self {
            frame_name: frame_name.into(),
            object_class: object_class.into(),
            properties,
            pose,
            symmetry: None,
        }
    }
}

/// Candidate poses for one object, ordered best first by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisSet {
    pub model_name: String,
    pub candidates: Vec<Transform3D>,
}

/// Per-class symmetry, first observation wins.
pub type SymmetryTable = BTreeMap<String, ObjectSymmetry>;

/// Hypothesis sets keyed by frame name.
pub type HypothesisMap = BTreeMap<String, HypothesisSet>;

/// Poses keyed by frame name.
pub type PoseMap = BTreeMap<String, Transform3D>;
