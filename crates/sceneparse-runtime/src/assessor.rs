//! [`SceneAssessor`] – the input gate and both reconciliation passes.
//!
//! # Flow
//!
//! ```text
//!  scene cloud ─┐                      ┌─ detection pass ──┐
//!  object list ─┼─ store + set flag ───┤                   ├─► SceneSink
//!  hypotheses ──┘   (one lock)         └─ hypothesis pass ─┘
//! ```
//!
//! Every ingestion entry point stores its payload under the scene lock, sets
//! the matching readiness flag, releases the lock and then attempts the
//! detection pass followed by the hypothesis pass.  Each attempt claims its
//! inputs through [`SharedSceneState`] so concurrent deliveries never run a
//! pass twice on the same data; when the claim fails the attempt returns
//! [`PassOutcome::Deferred`] and nothing is emitted.
//!
//! Transform lookups are the only blocking operations and always run with the
//! lock released.  The physics collaborator, the registry and every sink
//! call run under the lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use sceneparse_middleware::SceneSink;
use sceneparse_perception::{SupportGraph, TransformSource};
use sceneparse_types::{
    DetectedObject, DetectedObjectList, Header, HypothesisList, HypothesisMap, HypothesisSet,
    NamedTransform, ObjectSymmetry, PassKind, PhysicalProperties, PointCloud, PoseBroadcast,
    SceneError, SceneGraphMsg, SymmetryTable, TrackedObject, Transform3D, Vec3,
};

use crate::physics::{PhysicsEngine, PoseCorrection};
use crate::registry::{ObjectRegistry, resolve_class};
use crate::state::{DeferReason, ReadinessFlags, SharedSceneState};

/// Behavioural switches for a [`SceneAssessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssessorConfig {
    /// Skip the hypothesis pass entirely and re-emit the object list after
    /// every detection pass.
    pub best_hypothesis_only: bool,
    /// Prefix applied to every published frame name as `<ns>/<frame>`.
    pub frame_namespace: Option<String>,
    /// Bound on each transform lookup.
    pub transform_timeout: Duration,
    /// Derive gravity from the background plane normal.
    pub background_normal_as_gravity: bool,
    /// Frame whose `+z` axis points against gravity.
    pub gravity_reference_frame: Option<String>,
}

impl Default for AssessorConfig {
    fn default() -> Self {
        Self {
            best_hypothesis_only: false,
            frame_namespace: None,
            transform_timeout: Duration::from_secs(1),
            background_normal_as_gravity: false,
            gravity_reference_frame: None,
        }
    }
}

/// Result of one pass attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran and published its output.
    Completed,
    /// The pass did not run; nothing was published.
    Deferred(DeferReason),
}

impl PassOutcome {
    /// `true` for [`PassOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed)
    }
}

/// Outcomes of the two pass attempts made after one ingestion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub detection: PassOutcome,
    pub hypothesis: PassOutcome,
}

/// Everything guarded by the scene lock.
struct SceneCore {
    state: SharedSceneState,
    tracked: BTreeMap<String, TrackedObject>,
    symmetry: SymmetryTable,
    hypotheses: HypothesisMap,
    /// Last detector record per frame, re-emitted in best-hypothesis-only mode.
    records: BTreeMap<String, DetectedObject>,
    physics: Box<dyn PhysicsEngine>,
    registry: Box<dyn ObjectRegistry>,
    gravity_set: bool,
    parent_frame: String,
    object_list_seq: u64,
    graph: SupportGraph,
}

/// Sequential scene parser core.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
pub struct SceneAssessor {
    config: AssessorConfig,
    core: Mutex<SceneCore>,
    transforms: Arc<dyn TransformSource>,
    sink: Arc<dyn SceneSink>,
}

impl SceneAssessor {
    /// Create an assessor with no tracked objects and gravity unset.
    pub fn new(
        config: AssessorConfig,
        physics: Box<dyn PhysicsEngine>,
        registry: Box<dyn ObjectRegistry>,
        transforms: Arc<dyn TransformSource>,
        sink: Arc<dyn SceneSink>,
    ) -> Self {
        Self {
            config,
            core: Mutex::new(SceneCore {
                state: SharedSceneState::new(),
                tracked: BTreeMap::new(),
                symmetry: SymmetryTable::new(),
                hypotheses: HypothesisMap::new(),
                records: BTreeMap::new(),
                physics,
                registry,
                gravity_set: false,
                parent_frame: String::new(),
                object_list_seq: 0,
                graph: SupportGraph::new(),
            }),
            transforms,
            sink,
        }
    }

    /// The configuration this assessor was built with.
    pub fn config(&self) -> &AssessorConfig {
        &self.config
    }

    // ── Ingestion ───────────────────────────────────────────────────────────

    /// Hand the static background to the physics collaborator.  Only the
    /// first non-empty background is kept; returns whether this one was.
    ///
    /// # Errors
    ///
    /// [`SceneError::EmptyPointCloud`] for an empty cloud.
    pub fn on_background_cloud(&self, cloud: &PointCloud) -> Result<bool, SceneError> {
        if cloud.is_empty() {
            warn!("rejecting empty background cloud");
            return Err(SceneError::EmptyPointCloud);
        }
        let mut core = self.core.lock();
        if !core.state.record_background() {
            debug!("background already loaded; ignoring");
            return Ok(false);
        }
        core.physics.set_background(cloud);
        info!(points = cloud.len(), frame = %cloud.frame_id, "background loaded");
        Ok(true)
    }

    /// Store a scene cloud and attempt both passes.
    ///
    /// # Errors
    ///
    /// [`SceneError::EmptyPointCloud`]; nothing is stored in that case.
    pub fn on_scene_cloud(&self, cloud: &PointCloud) -> Result<IngestReport, SceneError> {
        if cloud.is_empty() {
            warn!("rejecting empty scene cloud");
            return Err(SceneError::EmptyPointCloud);
        }
        {
            let mut core = self.core.lock();
            core.physics.set_scene_cloud(cloud);
            core.state.record_scene_cloud();
        }
        debug!(points = cloud.len(), "scene cloud stored");
        Ok(self.run_passes())
    }

    /// Store a detected-object list (latest wins) and attempt both passes.
    pub fn on_detected_objects(&self, list: DetectedObjectList) -> IngestReport {
        debug!(objects = list.objects.len(), parent_frame = %list.header.frame_id, "object list stored");
        self.core.lock().state.store_object_list(list);
        self.run_passes()
    }

    /// Store a hypothesis list (latest wins) and attempt both passes.
    pub fn on_hypotheses(&self, list: HypothesisList) -> IngestReport {
        debug!(hypotheses = list.hypotheses.len(), "hypothesis list stored");
        self.core.lock().state.store_hypotheses(list);
        self.run_passes()
    }

    fn run_passes(&self) -> IngestReport {
        let detection = self.process_detected_objects();
        let hypothesis = self.process_hypotheses();
        IngestReport {
            detection,
            hypothesis,
        }
    }

    // ── Detection pass ──────────────────────────────────────────────────────

    /// Detection reconciliation pass.
    ///
    /// Requires a new scene cloud and a new object list.  Objects whose
    /// transform cannot be resolved, or whose class cannot be registered,
    /// are skipped for this pass only.
    #[instrument(skip_all, name = "detection_pass")]
    pub fn process_detected_objects(&self) -> PassOutcome {
        let snapshot = match self.core.lock().state.try_acquire_detection() {
            Ok(list) => list,
            Err(reason) => return PassOutcome::Deferred(reason),
        };
        let parent = snapshot.header.frame_id.clone();
        info!(objects = snapshot.objects.len(), parent_frame = %parent, "detection pass started");

        {
            let mut core = self.core.lock();
            core.parent_frame = parent.clone();
            for object in &snapshot.objects {
                core.records.insert(object.frame_name.clone(), object.clone());
            }
        }

        if let Err(e) = self.ensure_gravity(&parent) {
            warn!(error = %e, "detection pass deferred");
            return PassOutcome::Deferred(DeferReason::GravityUnresolved);
        }

        // Lookups may block; the lock stays released.
        let mut resolved = Vec::with_capacity(snapshot.objects.len());
        for object in &snapshot.objects {
            match self.transforms.wait_for_transform(
                &parent,
                &object.frame_name,
                self.config.transform_timeout,
            ) {
                Some(pose) => resolved.push((object, pose)),
                None => {
                    let e = SceneError::TransformUnavailable {
                        parent: parent.clone(),
                        child: object.frame_name.clone(),
                    };
                    warn!(error = %e, "skipping object");
                }
            }
        }

        let mut guard = self.core.lock();
        let core = &mut *guard;
        for (object, pose) in resolved {
            let properties = match resolve_class(core.registry.as_mut(), &object.object_class) {
                Ok(p) => p,
                Err(e) => {
                    warn!(frame = %object.frame_name, error = %e, "skipping object");
                    continue;
                }
            };
            let symmetry = *core
                .symmetry
                .entry(object.object_class.clone())
                .or_insert(object.symmetry);
            track(&mut core.tracked, object, properties, pose, symmetry);
        }

        let objects: Vec<TrackedObject> = core.tracked.values().cloned().collect();
        let correction = core.physics.correct_poses(&objects, &core.symmetry);
        self.apply_correction(core, correction);

        self.sink.broadcast_poses(self.pose_broadcast(core));
        if self.config.best_hypothesis_only {
            self.sink.publish_object_list(self.object_list(core));
            self.sink.publish_structure(core.graph.structure());
            self.sink.publish_done(PassKind::Detection);
        }
        core.state.mark_structure_updated();

        info!(tracked = core.tracked.len(), "detection pass completed");
        PassOutcome::Completed
    }

    /// Set gravity once per session, from the background normal or the
    /// reference frame.
    fn ensure_gravity(&self, parent: &str) -> Result<(), SceneError> {
        {
            let mut core = self.core.lock();
            if core.gravity_set {
                return Ok(());
            }
            if self.config.background_normal_as_gravity {
                match core.physics.set_gravity_from_background_normal() {
                    Ok(()) => {
                        core.gravity_set = true;
                        return Ok(());
                    }
                    Err(e) => debug!(error = %e, "background normal unavailable"),
                }
            }
        }

        let Some(frame) = self.config.gravity_reference_frame.as_deref() else {
            return Err(SceneError::GravityUnresolved(
                "no gravity source available".to_string(),
            ));
        };
        let reference = self
            .transforms
            .wait_for_transform(parent, frame, self.config.transform_timeout)
            .ok_or_else(|| {
                SceneError::GravityUnresolved(format!("reference frame {frame} not resolvable"))
            })?;
        let gravity = reference.rotation.rotate(Vec3::unit_z()).scale(-1.0);

        let mut core = self.core.lock();
        if !core.gravity_set {
            core.physics.set_gravity_direction(gravity);
            core.gravity_set = true;
        }
        Ok(())
    }

    // ── Hypothesis pass ─────────────────────────────────────────────────────

    /// Hypothesis reconciliation pass.
    ///
    /// Requires a structure update since the last run and a new hypothesis
    /// list.  Permanently disabled in best-hypothesis-only mode.
    #[instrument(skip_all, name = "hypothesis_pass")]
    pub fn process_hypotheses(&self) -> PassOutcome {
        if self.config.best_hypothesis_only {
            return PassOutcome::Deferred(DeferReason::HypothesesDisabled);
        }
        let mut guard = self.core.lock();
        let core = &mut *guard;
        let snapshot = match core.state.try_acquire_hypotheses() {
            Ok(list) => list,
            Err(reason) => {
                if reason == DeferReason::SceneCloudMissing {
                    debug!("hypothesis pass deferred until a scene cloud arrives");
                }
                return PassOutcome::Deferred(reason);
            }
        };
        info!(hypotheses = snapshot.hypotheses.len(), "hypothesis pass started");

        core.hypotheses = snapshot
            .hypotheses
            .into_iter()
            .map(|h| {
                let candidates = h
                    .candidates
                    .into_iter()
                    .map(|c| Transform3D::new(c.translation, c.rotation.normalized()))
                    .collect();
                (
                    h.frame_name,
                    HypothesisSet {
                        model_name: h.model_name,
                        candidates,
                    },
                )
            })
            .collect();

        let objects: Vec<TrackedObject> = core.tracked.values().cloned().collect();
        let correction = core.physics.evaluate_hypotheses(&objects, &core.hypotheses);
        self.apply_correction(core, correction);

        self.sink.broadcast_poses(self.pose_broadcast(core));
        self.sink.publish_structure(core.graph.structure());
        self.sink.publish_done(PassKind::Hypothesis);

        info!(tracked = core.tracked.len(), "hypothesis pass completed");
        PassOutcome::Completed
    }

    // ── Output helpers ──────────────────────────────────────────────────────

    fn apply_correction(&self, core: &mut SceneCore, correction: PoseCorrection) {
        for (frame, pose) in correction.poses {
            match core.tracked.get_mut(&frame) {
                Some(object) => object.pose = pose,
                None => debug!(frame = %frame, "physics returned an untracked frame"),
            }
        }
        core.graph = correction.graph;
    }

    fn namespaced(&self, frame: &str) -> String {
        match self.config.frame_namespace.as_deref().map(|ns| ns.trim_end_matches('/')) {
            Some(ns) if !ns.is_empty() => format!("{ns}/{frame}"),
            _ => frame.to_string(),
        }
    }

    fn pose_broadcast(&self, core: &SceneCore) -> PoseBroadcast {
        PoseBroadcast {
            parent_frame: core.parent_frame.clone(),
            stamp: Utc::now(),
            transforms: core
                .tracked
                .values()
                .map(|o| NamedTransform {
                    child_frame: self.namespaced(&o.frame_name),
                    transform: o.pose,
                })
                .collect(),
        }
    }

    fn object_list(&self, core: &mut SceneCore) -> DetectedObjectList {
        let seq = core.object_list_seq;
        core.object_list_seq += 1;
        let objects = core
            .tracked
            .values()
            .map(|o| {
                let mut record = core.records.get(&o.frame_name).cloned().unwrap_or_else(|| {
                    DetectedObject {
                        frame_name: o.frame_name.clone(),
                        object_class: o.object_class.clone(),
                        symmetry: o.symmetry.unwrap_or_default(),
                        confidence: None,
                    }
                });
                record.frame_name = self.namespaced(&o.frame_name);
                record
            })
            .collect();
        DetectedObjectList {
            header: Header {
                seq,
                stamp: Utc::now(),
                frame_id: core.parent_frame.clone(),
            },
            objects,
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Snapshot of the readiness flags.
    pub fn flags(&self) -> ReadinessFlags {
        self.core.lock().state.flags()
    }

    /// Tracked object for `frame`, if any.
    pub fn tracked_object(&self, frame: &str) -> Option<TrackedObject> {
        self.core.lock().tracked.get(frame).cloned()
    }

    /// Tracked objects ordered by frame name.
    pub fn tracked_objects(&self) -> Vec<TrackedObject> {
        self.core.lock().tracked.values().cloned().collect()
    }

    /// Symmetry recorded for `class` this session.
    pub fn symmetry_of(&self, class: &str) -> Option<ObjectSymmetry> {
        self.core.lock().symmetry.get(class).copied()
    }

    /// Candidate poses last received for `frame`.
    pub fn hypothesis_set(&self, frame: &str) -> Option<HypothesisSet> {
        self.core.lock().hypotheses.get(frame).cloned()
    }

    /// Level decomposition of the latest support graph.
    pub fn scene_graph(&self) -> SceneGraphMsg {
        self.core.lock().graph.structure()
    }

    /// Whether gravity has been resolved.
    pub fn gravity_set(&self) -> bool {
        self.core.lock().gravity_set
    }
}

/// Insert or refresh a tracked object.
fn track(
    tracked: &mut BTreeMap<String, TrackedObject>,
    object: &DetectedObject,
    properties: PhysicalProperties,
    pose: Transform3D,
    symmetry: ObjectSymmetry,
) {
    let entry = tracked
        .entry(object.frame_name.clone())
        .or_insert_with(|| {
            TrackedObject::new(&object.frame_name, &object.object_class, properties, pose)
        });
    entry.object_class = object.object_class.clone();
    entry.properties = properties;
    entry.pose = pose;
    entry.symmetry = Some(symmetry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::GeometricPhysics;
    use crate::registry::PropertyDatabase;
    use sceneparse_middleware::{BusSink, EventBus, Topic, TopicReceiver};
    use sceneparse_perception::TfBuffer;
    use sceneparse_types::{EventPayload, ModelHypothesis};
    use std::thread;
    use std::time::Instant;

    struct Harness {
        tf: Arc<TfBuffer>,
        assessor: Arc<SceneAssessor>,
        poses: TopicReceiver,
        structure: TopicReceiver,
        objects: TopicReceiver,
        done: TopicReceiver,
    }

    impl Harness {
        fn new(config: AssessorConfig) -> Self {
            Self::with_registry(config, PropertyDatabase::new(PhysicalProperties::default()))
        }

        fn with_registry(config: AssessorConfig, registry: PropertyDatabase) -> Self {
            let tf = Arc::new(TfBuffer::new());
            let bus = EventBus::default();
            let poses = bus.subscribe_to(Topic::Poses);
            let structure = bus.subscribe_to(Topic::SceneStructure);
            let objects = bus.subscribe_to(Topic::ObjectList);
            let done = bus.subscribe_to(Topic::Completion);
            let assessor = Arc::new(SceneAssessor::new(
                config,
                Box::new(GeometricPhysics::default()),
                Box::new(registry),
                tf.clone(),
                Arc::new(BusSink::new(bus)),
            ));
            Self {
                tf,
                assessor,
                poses,
                structure,
                objects,
                done,
            }
        }

        fn place(&self, frame: &str, x: f64, y: f64, z: f64) {
            self.tf
                .set_transform("world", frame, Transform3D::from_translation(x, y, z));
        }

        fn poses(&mut self) -> Vec<PoseBroadcast> {
            drain(&mut self.poses)
                .into_iter()
                .filter_map(|p| match p {
                    EventPayload::Poses(b) => Some(b),
                    _ => None,
                })
                .collect()
        }

        fn structures(&mut self) -> Vec<SceneGraphMsg> {
            drain(&mut self.structure)
                .into_iter()
                .filter_map(|p| match p {
                    EventPayload::SceneStructure(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        fn object_lists(&mut self) -> Vec<DetectedObjectList> {
            drain(&mut self.objects)
                .into_iter()
                .filter_map(|p| match p {
                    EventPayload::ObjectList(l) => Some(l),
                    _ => None,
                })
                .collect()
        }

        fn done(&mut self) -> Vec<PassKind> {
            drain(&mut self.done)
                .into_iter()
                .filter_map(|p| match p {
                    EventPayload::Done(kind) => Some(kind),
                    _ => None,
                })
                .collect()
        }
    }

    fn drain(rx: &mut TopicReceiver) -> Vec<EventPayload> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.payload);
        }
        out
    }

    fn config() -> AssessorConfig {
        AssessorConfig {
            transform_timeout: Duration::from_millis(20),
            gravity_reference_frame: Some("world".to_string()),
            ..AssessorConfig::default()
        }
    }

    fn detected(frame: &str, class: &str) -> DetectedObject {
        DetectedObject {
            frame_name: frame.to_string(),
            object_class: class.to_string(),
            symmetry: ObjectSymmetry::default(),
            confidence: None,
        }
    }

    fn object_list(objects: Vec<DetectedObject>) -> DetectedObjectList {
        DetectedObjectList {
            header: Header {
                frame_id: "world".to_string(),
                ..Header::default()
            },
            objects,
        }
    }

    fn table_cloud() -> PointCloud {
        let points = (-3..=3)
            .flat_map(|i| (-3..=3).map(move |j| Vec3::new(i as f64 * 0.1, j as f64 * 0.1, 0.0)))
            .collect();
        PointCloud::new("world", points)
    }

    fn hypothesis(frame: &str, candidates: Vec<Transform3D>) -> HypothesisList {
        HypothesisList {
            hypotheses: vec![ModelHypothesis {
                frame_name: frame.to_string(),
                model_name: "block".to_string(),
                candidates,
            }],
        }
    }

    #[test]
    fn single_object_on_the_table_is_a_base_object() {
        let mut h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);

        h.assessor.on_background_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));
        let report = h.assessor.on_scene_cloud(&table_cloud()).unwrap();

        assert_eq!(report.detection, PassOutcome::Completed);
        let tracked = h.assessor.tracked_objects();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].frame_name, "obj_A");

        let graph = h.assessor.scene_graph();
        assert_eq!(graph.base_objects_id, vec!["obj_A"]);
        assert!(graph.structure[0].nodes_level.is_empty());

        let poses = h.poses();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].parent_frame, "world");
        assert_eq!(poses[0].transforms[0].child_frame, "obj_A");
    }

    #[test]
    fn stacked_object_appears_one_level_above_its_base() {
        let mut h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.place("obj_B", 0.0, 0.0, 0.15);

        h.assessor.on_background_cloud(&table_cloud()).unwrap();
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let report = h.assessor.on_detected_objects(object_list(vec![
            detected("obj_A", "block"),
            detected("obj_B", "block"),
        ]));
        assert!(report.detection.is_completed());

        let graph = h.assessor.scene_graph();
        assert_eq!(graph.base_objects_id, vec!["obj_A"]);
        assert_eq!(graph.structure[0].nodes_level[0].object_names, vec!["obj_B"]);
        assert_eq!(h.poses().len(), 1);
    }

    #[test]
    fn object_list_before_any_cloud_is_a_no_op() {
        let mut h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);

        let report = h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));

        assert_eq!(report.detection, PassOutcome::Deferred(DeferReason::NotReady));
        let flags = h.assessor.flags();
        assert!(flags.object_list_received);
        assert!(!flags.point_cloud_updated);
        assert!(h.poses().is_empty());
        assert!(h.assessor.tracked_objects().is_empty());
    }

    #[test]
    fn best_hypothesis_only_never_runs_the_hypothesis_pass() {
        let mut h = Harness::new(AssessorConfig {
            best_hypothesis_only: true,
            ..config()
        });
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.assessor.on_background_cloud(&table_cloud()).unwrap();
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));

        let report = h.assessor.on_hypotheses(hypothesis(
            "obj_A",
            vec![Transform3D::from_translation(0.2, 0.0, 0.05)],
        ));
        assert_eq!(report.hypothesis, PassOutcome::Deferred(DeferReason::HypothesesDisabled));
        // The flags are left untouched.
        assert!(h.assessor.flags().hypothesis_list_received);
        assert!(h.assessor.hypothesis_set("obj_A").is_none());
        assert_eq!(h.done(), vec![PassKind::Detection]);
        assert_eq!(
            h.assessor.tracked_object("obj_A").unwrap().pose,
            Transform3D::from_translation(0.0, 0.0, 0.05)
        );
    }

    #[test]
    fn best_hypothesis_only_reemits_namespaced_object_list() {
        let mut h = Harness::new(AssessorConfig {
            best_hypothesis_only: true,
            frame_namespace: Some("parsed/".to_string()),
            ..config()
        });
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));

        let lists = h.object_lists();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].header.seq, 0);
        assert_eq!(lists[1].header.seq, 1);
        assert_eq!(lists[1].header.frame_id, "world");
        assert_eq!(lists[1].objects[0].frame_name, "parsed/obj_A");
        assert_eq!(lists[1].objects[0].object_class, "cup");

        let poses = h.poses();
        assert_eq!(poses[0].transforms[0].child_frame, "parsed/obj_A");
        assert_eq!(h.structures().len(), 2);
        assert_eq!(h.done(), vec![PassKind::Detection, PassKind::Detection]);
    }

    #[test]
    fn detection_without_best_only_emits_poses_only() {
        let mut h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));

        assert_eq!(h.poses().len(), 1);
        assert!(h.structures().is_empty());
        assert!(h.object_lists().is_empty());
        assert!(h.done().is_empty());
        assert!(h.assessor.flags().object_structure_updated);
    }

    #[test]
    fn symmetry_is_first_wins_per_class() {
        let h = Harness::new(config());
        h.place("cup_1", 0.0, 0.0, 0.05);
        h.place("cup_2", 0.5, 0.0, 0.05);

        let mut first = detected("cup_1", "cup");
        first.symmetry = ObjectSymmetry::new(0.0, 0.0, std::f64::consts::PI);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![first]));

        let mut second = detected("cup_2", "cup");
        second.symmetry = ObjectSymmetry::new(1.0, 1.0, 1.0);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![second]));

        let sym = h.assessor.symmetry_of("cup").unwrap();
        assert_eq!(sym, ObjectSymmetry::new(0.0, 0.0, std::f64::consts::PI));
        assert_eq!(h.assessor.tracked_object("cup_2").unwrap().symmetry, Some(sym));
    }

    #[test]
    fn unresolvable_and_unregisterable_objects_are_skipped() {
        let registry = PropertyDatabase::from_table(
            PhysicalProperties::default(),
            [("cup", PhysicalProperties::default())],
        )
        .with_registration(false);
        let h = Harness::with_registry(config(), registry);
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.place("obj_C", 0.5, 0.0, 0.05);

        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let report = h.assessor.on_detected_objects(object_list(vec![
            detected("obj_A", "cup"),
            detected("obj_B", "cup"), // no transform
            detected("obj_C", "anvil"), // unknown class
        ]));

        assert!(report.detection.is_completed());
        let frames: Vec<String> = h
            .assessor
            .tracked_objects()
            .into_iter()
            .map(|o| o.frame_name)
            .collect();
        assert_eq!(frames, vec!["obj_A"]);
    }

    #[test]
    fn tracked_objects_persist_and_refresh_across_passes() {
        let h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.place("obj_B", 0.5, 0.0, 0.05);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));

        h.place("obj_A", 0.1, 0.0, 0.05);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![
            detected("obj_A", "cup"),
            detected("obj_B", "plate"),
        ]));

        assert_eq!(h.assessor.tracked_objects().len(), 2);
        assert_eq!(
            h.assessor.tracked_object("obj_A").unwrap().pose,
            Transform3D::from_translation(0.1, 0.0, 0.05)
        );
    }

    #[test]
    fn unresolved_gravity_defers_until_reference_frame_appears() {
        let mut h = Harness::new(AssessorConfig {
            gravity_reference_frame: Some("gravity_ref".to_string()),
            ..config()
        });
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let report = h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));

        assert_eq!(report.detection, PassOutcome::Deferred(DeferReason::GravityUnresolved));
        assert!(!h.assessor.gravity_set());
        assert!(h.poses().is_empty());
        // Inputs were consumed by the aborted attempt.
        assert_eq!(h.assessor.flags(), ReadinessFlags::default());

        h.tf.set_transform("world", "gravity_ref", Transform3D::identity());
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let report = h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));
        assert!(report.detection.is_completed());
        assert!(h.assessor.gravity_set());
        assert_eq!(h.poses().len(), 1);
    }

    #[test]
    fn gravity_deferral_still_remembers_detector_records() {
        let h = Harness::new(AssessorConfig {
            gravity_reference_frame: Some("gravity_ref".to_string()),
            ..config()
        });
        let mut record = detected("obj_A", "cup");
        record.confidence = Some(0.9);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let report = h.assessor.on_detected_objects(object_list(vec![record.clone()]));
        assert_eq!(report.detection, PassOutcome::Deferred(DeferReason::GravityUnresolved));

        let core = h.assessor.core.lock();
        assert_eq!(core.parent_frame, "world");
        assert_eq!(core.records.get("obj_A"), Some(&record));
    }

    #[test]
    fn pending_lookup_does_not_block_ingestion() {
        let h = Harness::new(AssessorConfig {
            transform_timeout: Duration::from_millis(800),
            ..config()
        });
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();

        let pass = {
            let assessor = h.assessor.clone();
            thread::spawn(move || {
                assessor.on_detected_objects(object_list(vec![detected("ghost", "cup")]))
            })
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        h.assessor.on_hypotheses(hypothesis("ghost", vec![Transform3D::identity()]));
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(300), "ingestion blocked for {elapsed:?}");

        assert!(pass.join().unwrap().detection.is_completed());
        assert!(h.assessor.tracked_objects().is_empty());
    }

    #[test]
    fn background_normal_provides_gravity() {
        let h = Harness::new(AssessorConfig {
            background_normal_as_gravity: true,
            gravity_reference_frame: None,
            ..config()
        });
        h.place("obj_A", 0.0, 0.0, 0.05);
        assert!(h.assessor.on_background_cloud(&table_cloud()).unwrap());
        assert!(!h.assessor.on_background_cloud(&table_cloud()).unwrap());

        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        let report = h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "cup")]));
        assert!(report.detection.is_completed());
        assert!(h.assessor.gravity_set());
    }

    #[test]
    fn empty_clouds_are_rejected() {
        let h = Harness::new(config());
        let empty = PointCloud::new("world", Vec::new());
        assert_eq!(h.assessor.on_scene_cloud(&empty), Err(SceneError::EmptyPointCloud));
        assert_eq!(h.assessor.on_background_cloud(&empty), Err(SceneError::EmptyPointCloud));
        assert!(!h.assessor.flags().point_cloud_updated);
    }

    #[test]
    fn hypothesis_pass_selects_candidate_and_signals_done() {
        let mut h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.place("obj_B", 0.4, 0.0, 0.05);
        h.assessor.on_background_cloud(&table_cloud()).unwrap();
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![
            detected("obj_A", "block"),
            detected("obj_B", "block"),
        ]));
        h.poses();

        // Candidate 1 puts obj_B on top of obj_A.
        let report = h.assessor.on_hypotheses(hypothesis(
            "obj_B",
            vec![
                Transform3D::from_translation(0.0, 0.0, 0.15),
                Transform3D::from_translation(3.0, 0.0, 3.0),
            ],
        ));
        assert_eq!(report.hypothesis, PassOutcome::Completed);

        assert_eq!(
            h.assessor.tracked_object("obj_B").unwrap().pose,
            Transform3D::from_translation(0.0, 0.0, 0.15)
        );
        let structures = h.structures();
        assert_eq!(structures.len(), 1);
        assert_eq!(structures[0].base_objects_id, vec!["obj_A"]);
        assert_eq!(structures[0].structure[0].nodes_level[0].object_names, vec!["obj_B"]);
        assert_eq!(h.done(), vec![PassKind::Hypothesis]);
        assert_eq!(h.poses().len(), 1);

        // Consumed: a repeat attempt does nothing.
        assert_eq!(
            h.assessor.process_hypotheses(),
            PassOutcome::Deferred(DeferReason::NotReady)
        );
    }

    #[test]
    fn hypothesis_pass_waits_for_a_detection_pass() {
        let h = Harness::new(config());
        let report = h.assessor.on_hypotheses(hypothesis("obj_A", vec![Transform3D::identity()]));
        assert_eq!(report.hypothesis, PassOutcome::Deferred(DeferReason::NotReady));
        assert!(h.assessor.flags().hypothesis_list_received);
    }

    #[test]
    fn hypothesis_sets_are_replaced_wholesale() {
        let h = Harness::new(config());
        h.place("obj_A", 0.0, 0.0, 0.05);
        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "block")]));
        h.assessor.on_hypotheses(hypothesis(
            "obj_A",
            vec![Transform3D::from_translation(0.0, 0.0, 0.05)],
        ));
        assert!(h.assessor.hypothesis_set("obj_A").is_some());

        h.assessor.on_scene_cloud(&table_cloud()).unwrap();
        h.assessor.on_detected_objects(object_list(vec![detected("obj_A", "block")]));
        h.assessor.on_hypotheses(hypothesis("ghost", vec![Transform3D::identity()]));

        assert!(h.assessor.hypothesis_set("obj_A").is_none());
        assert!(h.assessor.hypothesis_set("ghost").is_some());
    }

    #[test]
    fn concurrent_deliveries_never_duplicate_a_pass() {
        let mut h = Harness::new(AssessorConfig {
            best_hypothesis_only: true,
            ..config()
        });
        h.place("obj_A", 0.0, 0.0, 0.05);

        let clouds = {
            let assessor = h.assessor.clone();
            thread::spawn(move || {
                (0..50)
                    .filter(|_| {
                        assessor
                            .on_scene_cloud(&table_cloud())
                            .map(|r| r.detection.is_completed())
                            .unwrap_or(false)
                    })
                    .count()
            })
        };
        let lists = {
            let assessor = h.assessor.clone();
            thread::spawn(move || {
                (0..50)
                    .filter(|_| {
                        assessor
                            .on_detected_objects(object_list(vec![detected("obj_A", "cup")]))
                            .detection
                            .is_completed()
                    })
                    .count()
            })
        };
        let completed = clouds.join().unwrap() + lists.join().unwrap();

        assert!(completed >= 1);
        assert!(completed <= 50);
        let done = h.done();
        assert_eq!(done.len(), completed);
        assert_eq!(h.object_lists().len(), completed);
    }
}
