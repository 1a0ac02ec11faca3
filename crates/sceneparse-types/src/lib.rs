//! `sceneparse-types` – shared vocabulary of the scene parser.
//!
//! - [`geometry`] – [`Vec3`], [`Quaternion`], [`Transform3D`].
//! - [`messages`] – inbound detector / point-cloud / hypothesis messages and
//!   the outbound pose, structure-graph and completion messages.
//! - [`model`] – [`TrackedObject`] and the session tables built from it.
//!
//! The crate root holds the bus [`Event`] envelope and [`SceneError`].

pub mod geometry;
pub mod messages;
pub mod model;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use geometry::{Quaternion, Transform3D, Vec3};
pub use messages::{
    DetectedObject, DetectedObjectList, Header, HypothesisList, ModelHypothesis, NamedTransform,
    PassKind, PointCloud, PoseBroadcast, SceneGraphMsg, SceneNodes, StructureGraph,
};
pub use model::{
    HypothesisMap, HypothesisSet, ObjectSymmetry, PhysicalProperties, PoseMap, SymmetryTable,
    TrackedObject,
};

/// Unified event wrapper for the output bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"sceneparse-runtime::assessor"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Everything the scene parser emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Poses(PoseBroadcast),
    SceneStructure(SceneGraphMsg),
    ObjectList(DetectedObjectList),
    /// Zero-payload completion marker; the kind only names the pass.
    Done(PassKind),
}

/// Errors surfaced by the scene parser and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SceneError {
    #[error("point cloud is empty")]
    EmptyPointCloud,

    #[error("object class '{0}' is not registered")]
    UnknownObjectClass(String),

    #[error("cannot register object class '{class}': {reason}")]
    RegistrationRejected { class: String, reason: String },

    #[error("no transform from '{parent}' to '{child}' within the lookup timeout")]
    TransformUnavailable { parent: String, child: String },

    #[error("gravity direction unresolved: {0}")]
    GravityUnresolved(String),

    #[error("event channel error: {0}")]
    Channel(String),
}
