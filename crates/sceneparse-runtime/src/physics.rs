//! Physics collaborator contract and the geometric reference engine.
//!
//! The reconciliation passes hand tracked objects to a [`PhysicsEngine`] and
//! get back a [`PoseCorrection`]: corrected poses plus the support graph the
//! engine inferred.  The core never creates support edges on its own.
//!
//! [`GeometricPhysics`] infers support purely from geometry:
//!
//! | Quantity | Definition |
//! |---|---|
//! | up | negated gravity direction (defaults to `+z`) |
//! | height | `position · up` |
//! | background height | mean height of the background cloud |
//! | supporter | highest object below within `contact_radius` horizontally and `max_stack_gap` vertically, else the background |
//! | hypothesis score | `data_weight × inliers − support gap` |
//!
//! It performs no dynamics: [`GeometricPhysics::correct_poses`] returns the
//! poses it was given.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sceneparse_perception::{BACKGROUND, SupportGraph};
use sceneparse_types::{
    HypothesisMap, PointCloud, PoseMap, SceneError, SymmetryTable, TrackedObject, Transform3D,
    Vec3,
};

/// Minimum height difference for one object to count as resting on another.
const MIN_RISE: f64 = 1e-3;

/// Result of a physics evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseCorrection {
    /// Corrected pose per frame name.
    pub poses: PoseMap,
    /// Support graph over the corrected poses.
    pub graph: SupportGraph,
}

/// Capability interface over the physics simulation.
///
/// Always invoked with the scene lock held, so implementations must not
/// block on external input.
pub trait PhysicsEngine: Send {
    /// Derive gravity from the background's dominant plane.
    ///
    /// # Errors
    ///
    /// [`SceneError::GravityUnresolved`] when no usable background is known.
    fn set_gravity_from_background_normal(&mut self) -> Result<(), SceneError>;

    /// Set gravity explicitly, in the parent frame.
    fn set_gravity_direction(&mut self, direction: Vec3);

    fn set_background(&mut self, cloud: &PointCloud);

    fn set_scene_cloud(&mut self, cloud: &PointCloud);

    /// Correct the poses of `objects` and infer their support graph.
    fn correct_poses(&mut self, objects: &[TrackedObject], symmetry: &SymmetryTable)
    -> PoseCorrection;

    /// Pick one candidate per hypothesis set and infer the resulting support
    /// graph.  Objects without a hypothesis set keep their current pose.
    fn evaluate_hypotheses(
        &mut self,
        objects: &[TrackedObject],
        hypotheses: &HypothesisMap,
    ) -> PoseCorrection;
}

// ────────────────────────────────────────────────────────────────────────────
// ContactModel
// ────────────────────────────────────────────────────────────────────────────

/// Tunables for [`GeometricPhysics`], loaded from the `[physics]` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactModel {
    /// Max horizontal offset (m) between a supporter and what rests on it.
    pub contact_radius: f64,
    /// Max vertical gap (m) between an object and its supporter.
    pub max_stack_gap: f64,
    /// Radius (m) within which a scene point counts as an inlier.
    pub data_radius: f64,
    /// Weight of one inlier against one metre of support gap.
    pub data_weight: f64,
}

impl Default for ContactModel {
    fn default() -> Self {
        Self {
            contact_radius: 0.1,
            max_stack_gap: 0.25,
            data_radius: 0.05,
            data_weight: 0.5,
        }
    }
}

/// What an object rests on.
#[derive(Debug, Clone, PartialEq)]
enum Contact {
    Object { id: String, gap: f64 },
    Background { gap: f64 },
    Floating,
}

impl Contact {
    fn gap(&self) -> Option<f64> {
        match self {
            Contact::Object { gap, .. } | Contact::Background { gap } => Some(*gap),
            Contact::Floating => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GeometricPhysics
// ────────────────────────────────────────────────────────────────────────────

/// Geometry-only [`PhysicsEngine`].
#[derive(Debug, Clone)]
pub struct GeometricPhysics {
    model: ContactModel,
    up: Vec3,
    background: Vec<Vec3>,
    background_height: Option<f64>,
    scene: Vec<Vec3>,
}

impl Default for GeometricPhysics {
    fn default() -> Self {
        Self::new(ContactModel::default())
    }
}

impl GeometricPhysics {
    pub fn new(model: ContactModel) -> Self {
        Self {
            model,
            up: Vec3::unit_z(),
            background: Vec::new(),
            background_height: None,
            scene: Vec::new(),
        }
    }

    /// Current up direction (unit length).
    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn background_height(&self) -> Option<f64> {
        self.background_height
    }

    fn height(&self, p: Vec3) -> f64 {
        p.dot(self.up)
    }

    fn horizontal_distance(&self, a: Vec3, b: Vec3) -> f64 {
        let d = a.sub(b);
        d.sub(self.up.scale(d.dot(self.up))).norm()
    }

    fn refresh_background_height(&mut self) {
        self.background_height = if self.background.is_empty() {
            None
        } else {
            let sum: f64 = self.background.iter().map(|&p| self.height(p)).sum();
            Some(sum / self.background.len() as f64)
        };
    }

    /// Decide what an object at `position` rests on, among `others`.
    fn contact_of(&self, frame: &str, position: Vec3, others: &[(String, Vec3)]) -> Contact {
        let h = self.height(position);
        let mut best: Option<(&str, f64)> = None;
        for (id, p) in others {
            if id == frame {
                continue;
            }
            let gap = h - self.height(*p);
            if gap < MIN_RISE || gap > self.model.max_stack_gap {
                continue;
            }
            if self.horizontal_distance(position, *p) > self.model.contact_radius {
                continue;
            }
            // Highest candidate wins; first one on ties.
            if best.is_none_or(|(_, best_gap)| gap < best_gap) {
                best = Some((id.as_str(), gap));
            }
        }
        if let Some((id, gap)) = best {
            return Contact::Object {
                id: id.to_string(),
                gap,
            };
        }
        match self.background_height {
            None => Contact::Background { gap: 0.0 },
            Some(bh) => {
                let gap = (h - bh).abs();
                if gap <= self.model.max_stack_gap {
                    Contact::Background { gap }
                } else {
                    Contact::Floating
                }
            }
        }
    }

    fn build_graph(&self, positions: &[(String, Vec3)]) -> SupportGraph {
        let mut graph = SupportGraph::with_vertices(positions.iter().map(|(id, _)| id));
        for (id, p) in positions {
            match self.contact_of(id, *p, positions) {
                Contact::Object { id: supporter, .. } => graph.add_support(&supporter, id),
                Contact::Background { .. } => graph.add_support(BACKGROUND, id),
                Contact::Floating => debug!(frame = %id, "object has no supporter"),
            }
        }
        graph
    }

    fn inliers(&self, centre: Vec3) -> usize {
        let r = self.model.data_radius;
        self.scene
            .iter()
            .filter(|p| p.sub(centre).norm() <= r)
            .count()
    }

    fn score(&self, frame: &str, candidate: Vec3, others: &[(String, Vec3)]) -> f64 {
        match self.contact_of(frame, candidate, others).gap() {
            Some(gap) => self.model.data_weight * self.inliers(candidate) as f64 - gap,
            None => f64::NEG_INFINITY,
        }
    }
}

fn positions_of(poses: &[(String, Transform3D)]) -> Vec<(String, Vec3)> {
    poses
        .iter()
        .map(|(id, t)| (id.clone(), t.translation))
        .collect()
}

impl PhysicsEngine for GeometricPhysics {
    fn set_gravity_from_background_normal(&mut self) -> Result<(), SceneError> {
        let normal = plane_normal(&self.background).ok_or_else(|| {
            SceneError::GravityUnresolved("background cloud has no usable plane".to_string())
        })?;
        info!(x = normal.x, y = normal.y, z = normal.z, "gravity set from background normal");
        self.up = normal;
        self.refresh_background_height();
        Ok(())
    }

    fn set_gravity_direction(&mut self, direction: Vec3) {
        match direction.normalized() {
            Some(g) => {
                self.up = g.scale(-1.0);
                self.refresh_background_height();
                info!(x = g.x, y = g.y, z = g.z, "gravity direction set");
            }
            None => warn!("ignoring zero gravity direction"),
        }
    }

    fn set_background(&mut self, cloud: &PointCloud) {
        self.background = cloud.points.clone();
        self.refresh_background_height();
    }

    fn set_scene_cloud(&mut self, cloud: &PointCloud) {
        self.scene = cloud.points.clone();
    }

    fn correct_poses(
        &mut self,
        objects: &[TrackedObject],
        _symmetry: &SymmetryTable,
    ) -> PoseCorrection {
        let poses: Vec<(String, Transform3D)> = objects
            .iter()
            .map(|o| (o.frame_name.clone(), o.pose))
            .collect();
        let graph = self.build_graph(&positions_of(&poses));
        PoseCorrection {
            poses: poses.into_iter().collect(),
            graph,
        }
    }

    fn evaluate_hypotheses(
        &mut self,
        objects: &[TrackedObject],
        hypotheses: &HypothesisMap,
    ) -> PoseCorrection {
        let mut poses: Vec<(String, Transform3D)> = objects
            .iter()
            .map(|o| (o.frame_name.clone(), o.pose))
            .collect();

        for (frame, set) in hypotheses {
            let Some(idx) = poses.iter().position(|(id, _)| id == frame) else {
                warn!(frame = %frame, model = %set.model_name, "hypotheses for untracked frame");
                continue;
            };
            let others: Vec<(String, Vec3)> = poses
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, (id, t))| (id.clone(), t.translation))
                .collect();

            let mut best: Option<(usize, f64)> = None;
            for (i, candidate) in set.candidates.iter().enumerate() {
                let score = self.score(frame, candidate.translation, &others);
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
            if let Some((i, score)) = best {
                debug!(frame = %frame, candidate = i, score, "hypothesis selected");
                poses[idx].1 = set.candidates[i];
            }
        }

        let graph = self.build_graph(&positions_of(&poses));
        PoseCorrection {
            poses: poses.into_iter().collect(),
            graph,
        }
    }
}

/// Unit normal of the least-squares plane through `points`, oriented so its
/// `z` component is non-negative.  `None` for fewer than three points or a
/// degenerate (collinear or vertical) fit.
pub fn plane_normal(points: &[Vec3]) -> Option<Vec3> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vec3::zero(), |acc, &p| acc.add(p))
        .scale(1.0 / n);

    // Solve z = a·x + b·y in centred coordinates.
    let (mut sxx, mut sxy, mut syy, mut sxz, mut syz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        let d = p.sub(centroid);
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
        sxz += d.x * d.z;
        syz += d.y * d.z;
    }
    let det = sxx * syy - sxy * sxy;
    if det.abs() < 1e-12 {
        return None;
    }
    let a = (sxz * syy - syz * sxy) / det;
    let b = (syz * sxx - sxz * sxy) / det;
    Vec3::new(-a, -b, 1.0).normalized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sceneparse_types::{HypothesisSet, PhysicalProperties};

    fn object(frame: &str, x: f64, y: f64, z: f64) -> TrackedObject {
        TrackedObject::new(
            frame,
            "block",
            PhysicalProperties::default(),
            Transform3D::from_translation(x, y, z),
        )
    }

    fn table_cloud(height: f64) -> PointCloud {
        let mut points = Vec::new();
        for i in -5..=5 {
            for j in -5..=5 {
                points.push(Vec3::new(i as f64 * 0.1, j as f64 * 0.1, height));
            }
        }
        PointCloud::new("world", points)
    }

    #[test]
    fn object_on_background_is_a_base_object() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        let result = physics.correct_poses(&[object("obj_A", 0.0, 0.0, 0.05)], &SymmetryTable::new());
        let msg = result.graph.structure();
        assert_eq!(msg.base_objects_id, vec!["obj_A"]);
        assert!(msg.structure[0].nodes_level.is_empty());
        assert_eq!(result.poses["obj_A"], Transform3D::from_translation(0.0, 0.0, 0.05));
    }

    #[test]
    fn stacked_object_rests_on_the_one_below() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        let objects = [object("obj_A", 0.0, 0.0, 0.05), object("obj_B", 0.01, 0.0, 0.15)];
        let graph = physics.correct_poses(&objects, &SymmetryTable::new()).graph;
        assert_eq!(graph.children_of(BACKGROUND), vec!["obj_A"]);
        assert_eq!(graph.children_of("obj_A"), vec!["obj_B"]);
    }

    #[test]
    fn side_by_side_objects_do_not_support_each_other() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        let objects = [object("obj_A", 0.0, 0.0, 0.05), object("obj_B", 0.3, 0.0, 0.05)];
        let graph = physics.correct_poses(&objects, &SymmetryTable::new()).graph;
        assert_eq!(graph.children_of(BACKGROUND), vec!["obj_A", "obj_B"]);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn highest_object_below_is_the_supporter() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        let objects = [
            object("a", 0.0, 0.0, 0.05),
            object("b", 0.0, 0.0, 0.15),
            object("c", 0.0, 0.0, 0.25),
        ];
        let graph = physics.correct_poses(&objects, &SymmetryTable::new()).graph;
        assert_eq!(graph.children_of("a"), vec!["b"]);
        assert_eq!(graph.children_of("b"), vec!["c"]);
        let msg = graph.structure();
        assert_eq!(msg.structure[0].nodes_level.len(), 2);
    }

    #[test]
    fn floating_object_is_left_disconnected() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        let graph = physics
            .correct_poses(&[object("drone", 0.0, 0.0, 2.0)], &SymmetryTable::new())
            .graph;
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.structure().base_objects_id.is_empty());
    }

    #[test]
    fn unknown_background_accepts_any_lowest_object() {
        let mut physics = GeometricPhysics::default();
        let graph = physics
            .correct_poses(&[object("obj_A", 0.0, 0.0, 3.0)], &SymmetryTable::new())
            .graph;
        assert_eq!(graph.children_of(BACKGROUND), vec!["obj_A"]);
    }

    #[test]
    fn gravity_direction_changes_what_is_up() {
        let mut physics = GeometricPhysics::default();
        // Gravity along -x: "up" is +x.
        physics.set_gravity_direction(Vec3::new(-1.0, 0.0, 0.0));
        let objects = [object("wall", 0.05, 0.0, 0.0), object("picture", 0.15, 0.0, 0.0)];
        let graph = physics.correct_poses(&objects, &SymmetryTable::new()).graph;
        assert_eq!(graph.children_of("wall"), vec!["picture"]);
    }

    #[test]
    fn zero_gravity_direction_is_ignored() {
        let mut physics = GeometricPhysics::default();
        physics.set_gravity_direction(Vec3::zero());
        assert_eq!(physics.up(), Vec3::unit_z());
    }

    #[test]
    fn background_normal_of_flat_table_is_up() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.7));
        physics.set_gravity_from_background_normal().unwrap();
        let up = physics.up();
        assert!((up.z - 1.0).abs() < 1e-9);
        assert!((physics.background_height().unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn background_normal_of_tilted_plane() {
        // z = 0.5·x  →  normal ∝ (-0.5, 0, 1)
        let points: Vec<Vec3> = (0..5)
            .flat_map(|i| (0..5).map(move |j| Vec3::new(i as f64, j as f64, 0.5 * i as f64)))
            .collect();
        let normal = plane_normal(&points).unwrap();
        let expected = Vec3::new(-0.5, 0.0, 1.0).normalized().unwrap();
        assert!(normal.sub(expected).norm() < 1e-9);
    }

    #[test]
    fn background_normal_requires_a_background() {
        let mut physics = GeometricPhysics::default();
        assert!(matches!(
            physics.set_gravity_from_background_normal(),
            Err(SceneError::GravityUnresolved(_))
        ));
        let collinear: Vec<Vec3> = (0..4).map(|i| Vec3::new(i as f64, 0.0, 0.0)).collect();
        assert!(plane_normal(&collinear).is_none());
    }

    #[test]
    fn hypothesis_with_more_scene_support_wins() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        // Scene points cluster around (0.3, 0, 0.05).
        let scene: Vec<Vec3> = (0..10)
            .map(|i| Vec3::new(0.3 + i as f64 * 0.002, 0.0, 0.05))
            .collect();
        physics.set_scene_cloud(&PointCloud::new("world", scene));

        let mut hypotheses = HypothesisMap::new();
        hypotheses.insert(
            "obj_A".to_string(),
            HypothesisSet {
                model_name: "block".to_string(),
                candidates: vec![
                    Transform3D::from_translation(0.0, 0.0, 0.05),
                    Transform3D::from_translation(0.3, 0.0, 0.05),
                ],
            },
        );
        let result = physics.evaluate_hypotheses(&[object("obj_A", 0.0, 0.0, 0.05)], &hypotheses);
        assert_eq!(result.poses["obj_A"], Transform3D::from_translation(0.3, 0.0, 0.05));
        assert_eq!(result.graph.children_of(BACKGROUND), vec!["obj_A"]);
    }

    #[test]
    fn first_candidate_wins_ties_and_untracked_frames_are_skipped() {
        let mut physics = GeometricPhysics::default();
        physics.set_background(&table_cloud(0.0));
        let mut hypotheses = HypothesisMap::new();
        hypotheses.insert(
            "obj_A".to_string(),
            HypothesisSet {
                model_name: "block".to_string(),
                candidates: vec![
                    Transform3D::from_translation(0.1, 0.0, 0.05),
                    Transform3D::from_translation(0.2, 0.0, 0.05),
                ],
            },
        );
        hypotheses.insert(
            "ghost".to_string(),
            HypothesisSet {
                model_name: "block".to_string(),
                candidates: vec![Transform3D::identity()],
            },
        );
        let result = physics.evaluate_hypotheses(&[object("obj_A", 0.0, 0.0, 0.05)], &hypotheses);
        assert_eq!(result.poses.len(), 1);
        assert_eq!(result.poses["obj_A"], Transform3D::from_translation(0.1, 0.0, 0.05));
    }

    #[test]
    fn contact_model_deserializes_with_defaults() {
        let model: ContactModel = serde_json::from_str(r#"{"contact_radius": 0.2}"#).unwrap();
        assert!((model.contact_radius - 0.2).abs() < 1e-12);
        assert!((model.max_stack_gap - 0.25).abs() < 1e-12);
    }
}
