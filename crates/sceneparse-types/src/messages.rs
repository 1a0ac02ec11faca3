//! Wire messages exchanged with the outside world.
//!
//! Inputs: [`PointCloud`], [`DetectedObjectList`], [`HypothesisList`].
//! Outputs: [`PoseBroadcast`], [`SceneGraphMsg`], a re-emitted
//! [`DetectedObjectList`] and the zero-payload completion marker
//! ([`PassKind`] only identifies which pass finished).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::{Transform3D, Vec3};
use crate::model::ObjectSymmetry;

/// Message header: sequence number, stamp and the frame every pose in the
/// message is expressed in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Header {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
}

/// An unordered 3-D point collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PointCloud {
    #[serde(default)]
    pub frame_id: String,
    pub points: Vec<Vec3>,
}

impl PointCloud {
    pub fn new(frame_id: impl Into<String>, points: Vec<Vec3>) -> Self {
        Self {
            frame_id: frame_id.into(),
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// One detector output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectedObject {
    /// Frame the detector broadcasts this object's pose under.
    #[serde(alias = "id")]
    pub frame_name: String,
    pub object_class: String,
    #[serde(default)]
    pub symmetry: ObjectSymmetry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A detector output batch; `header.frame_id` is the parent frame of every
/// object in it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DetectedObjectList {
    pub header: Header,
    pub objects: Vec<DetectedObject>,
}

/// Alternative candidate poses for one detected object, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelHypothesis {
    #[serde(alias = "tf_name")]
    pub frame_name: String,
    pub model_name: String,
    pub candidates: Vec<Transform3D>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct HypothesisList {
    pub hypotheses: Vec<ModelHypothesis>,
}

/// Object ids sharing one support level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneNodes {
    pub object_names: Vec<String>,
}

/// Levels above one base object; `nodes_level[0]` holds distance 1.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StructureGraph {
    pub nodes_level: Vec<SceneNodes>,
}

/// The support structure of the whole scene.
///
/// `structure[i]` describes everything stacked on `base_objects_id[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SceneGraphMsg {
    pub structure: Vec<StructureGraph>,
    pub base_objects_id: Vec<String>,
}

/// A named child frame and its pose in the broadcast's parent frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamedTransform {
    pub child_frame: String,
    pub transform: Transform3D,
}

/// Every tracked object's corrected pose, re-published after a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoseBroadcast {
    pub parent_frame: String,
    pub stamp: DateTime<Utc>,
    pub transforms: Vec<NamedTransform>,
}

/// Which reconciliation pass produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Detection,
    Hypothesis,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassKind::Detection => write!(f, "detection"),
            PassKind::Hypothesis => write!(f, "hypothesis"),
        }
    }
}
