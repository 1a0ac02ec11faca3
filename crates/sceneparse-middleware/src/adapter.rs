//! Output adapters.
//!
//! The reconciliation passes never talk to a transport directly; they hand
//! their results to a [`SceneSink`].  [`BusSink`] is the in-process
//! implementation that fans results out over the [`EventBus`].

use sceneparse_types::{
    DetectedObjectList, Event, EventPayload, PassKind, PoseBroadcast, SceneGraphMsg,
};
use tracing::debug;

use crate::bus::{EventBus, Topic};

/// Sink for everything a reconciliation pass emits.
///
/// Implementations must not block: passes call these methods while holding
/// the scene lock.
pub trait SceneSink: Send + Sync {
    /// Re-publish every tracked object's pose.
    fn broadcast_poses(&self, poses: PoseBroadcast);

    /// Emit the level-decomposed support graph.
    fn publish_structure(&self, structure: SceneGraphMsg);

    /// Re-emit the detected object list under the namespaced frame names.
    fn publish_object_list(&self, list: DetectedObjectList);

    /// Signal that `pass` completed.
    fn publish_done(&self, pass: PassKind);
}

/// [`SceneSink`] that publishes [`Event`]s on an [`EventBus`].
///
/// Publishing to a topic nobody listens to is not an error.
#[derive(Clone, Debug)]
pub struct BusSink {
    bus: EventBus,
    source: String,
}

impl BusSink {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            source: "sceneparse-middleware::bus_sink".to_string(),
        }
    }

    /// Override the `source` tag stamped on every event.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    fn emit(&self, topic: Topic, payload: EventPayload) {
        let event = Event::new(self.source.clone(), payload);
        if let Err(e) = self.bus.publish_to(topic, event) {
            debug!(topic = ?topic, error = %e, "event dropped");
        }
    }
}

impl SceneSink for BusSink {
    fn broadcast_poses(&self, poses: PoseBroadcast) {
        self.emit(Topic::Poses, EventPayload::Poses(poses));
    }

    fn publish_structure(&self, structure: SceneGraphMsg) {
        self.emit(Topic::SceneStructure, EventPayload::SceneStructure(structure));
    }

    fn publish_object_list(&self, list: DetectedObjectList) {
        self.emit(Topic::ObjectList, EventPayload::ObjectList(list));
    }

    fn publish_done(&self, pass: PassKind) {
        self.emit(Topic::Completion, EventPayload::Done(pass));
    }
}
