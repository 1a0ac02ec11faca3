//! Support graph and its level decomposition.
//!
//! Vertices are the static background plus every tracked object; an edge
//! `u → v` means *v rests on u*.  The background is always vertex `0` and is
//! the unique root.  Edges are supplied by the physics collaborator; this
//! module only stores them and traverses them.
//!
//! [`SupportGraph::structure`] turns the graph into a [`SceneGraphMsg`]:
//!
//! 1. the *base objects* are the children of the background, in edge
//!    insertion order;
//! 2. from each base object a BFS labels every transitively supported vertex
//!    with its distance;
//! 3. vertices are grouped by distance and one level is emitted per distance
//!    `≥ 1`, in increasing order.  Distance 0 is the base object itself and is
//!    never emitted.
//!
//! Objects with no support edge at all are unreachable from the background and
//! therefore never appear in the output.
//!
//! # Example
//!
//! ```rust
//! use sceneparse_perception::support_graph::{SupportGraph, BACKGROUND};
//!
//! let mut graph = SupportGraph::new();
//! graph.add_support(BACKGROUND, "obj_A");
//! graph.add_support("obj_A", "obj_B");
//!
//! let msg = graph.structure();
//! assert_eq!(msg.base_objects_id, vec!["obj_A"]);
//! assert_eq!(msg.structure[0].nodes_level[0].object_names, vec!["obj_B"]);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};

use sceneparse_types::{SceneGraphMsg, SceneNodes, StructureGraph};
use tracing::warn;

/// Object id of the root vertex.
pub const BACKGROUND: &str = "background";

/// Dense vertex handle; only meaningful for the graph that issued it.
pub type VertexId = usize;

/// Directed "is supported by" graph rooted at the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportGraph {
    ids: Vec<String>,
    index: HashMap<String, VertexId>,
    /// `supports[u]` = vertices resting directly on `u`, in insertion order.
    supports: Vec<Vec<VertexId>>,
}

impl Default for SupportGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SupportGraph {
    /// A graph holding only the background vertex.
    pub fn new() -> Self {
        let mut graph = Self {
            ids: Vec::new(),
            index: HashMap::new(),
            supports: Vec::new(),
        };
        graph.add_vertex(BACKGROUND);
        graph
    }

    /// Build a graph whose vertex set is the background plus `objects`.
    pub fn with_vertices<I, S>(objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut graph = Self::new();
        for id in objects {
            graph.add_vertex(id.as_ref());
        }
        graph
    }

    pub fn background(&self) -> VertexId {
        0
    }

    /// Insert `id` if absent and return its handle.
    pub fn add_vertex(&mut self, id: &str) -> VertexId {
        if let Some(&v) = self.index.get(id) {
            return v;
        }
        let v = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), v);
        self.supports.push(Vec::new());
        v
    }

    pub fn vertex(&self, id: &str) -> Option<VertexId> {
        self.index.get(id).copied()
    }

    /// Object id of `v`.
    ///
    /// # Panics
    ///
    /// If `v` was not issued by this graph.
    pub fn object_id(&self, v: VertexId) -> &str {
        &self.ids[v]
    }

    pub fn vertex_count(&self) -> usize {
        self.ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.supports.iter().map(Vec::len).sum()
    }

    /// Record that `supported` rests on `supporter`, creating either vertex
    /// as needed.  Self-loops, duplicates and edges into the background are
    /// ignored.
    pub fn add_support(&mut self, supporter: &str, supported: &str) {
        if supported == BACKGROUND {
            warn!(supporter, "ignoring support edge into the background");
            return;
        }
        if supporter == supported {
            return;
        }
        let u = self.add_vertex(supporter);
        let v = self.add_vertex(supported);
        if !self.supports[u].contains(&v) {
            self.supports[u].push(v);
        }
    }

    /// Object ids resting directly on `id` (empty for unknown ids).
    pub fn children_of(&self, id: &str) -> Vec<&str> {
        self.vertex(id)
            .map(|v| self.supports[v].iter().map(|&c| self.object_id(c)).collect())
            .unwrap_or_default()
    }

    /// Vertices at distance 1 from the background.
    pub fn base_objects(&self) -> Vec<VertexId> {
        self.supports[self.background()].clone()
    }

    /// BFS distance labeling from `start`, grouped by distance.  Distance 0
    /// holds `start` alone; each reachable vertex appears exactly once, at
    /// its shortest distance.
    pub fn distances_from(&self, start: VertexId) -> BTreeMap<usize, Vec<VertexId>> {
        let mut by_distance: BTreeMap<usize, Vec<VertexId>> = BTreeMap::new();
        let mut visited = vec![false; self.ids.len()];
        let mut queue = VecDeque::new();

        visited[start] = true;
        queue.push_back((start, 0usize));
        while let Some((v, d)) = queue.pop_front() {
            by_distance.entry(d).or_default().push(v);
            for &next in &self.supports[v] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back((next, d + 1));
                }
            }
        }
        by_distance
    }

    /// Levels above `base`, nearest first, excluding `base` itself.
    pub fn levels(&self, base: VertexId) -> Vec<Vec<&str>> {
        self.distances_from(base)
            .into_iter()
            .filter(|(d, _)| *d > 0)
            .map(|(_, vs)| vs.into_iter().map(|v| self.object_id(v)).collect())
            .collect()
    }

    /// Level decomposition of the whole scene.
    pub fn structure(&self) -> SceneGraphMsg {
        let bases = self.base_objects();
        let mut msg = SceneGraphMsg {
            structure: Vec::with_capacity(bases.len()),
            base_objects_id: Vec::with_capacity(bases.len()),
        };
        for base in bases {
            let nodes_level = self
                .levels(base)
                .into_iter()
                .map(|level| SceneNodes {
                    object_names: level.into_iter().map(str::to_string).collect(),
                })
                .collect();
            msg.structure.push(StructureGraph { nodes_level });
            msg.base_objects_id.push(self.object_id(base).to_string());
        }
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn level_sets(msg: &SceneGraphMsg, i: usize) -> Vec<BTreeSet<String>> {
        msg.structure[i]
            .nodes_level
            .iter()
            .map(|n| n.object_names.iter().cloned().collect())
            .collect()
    }

    #[test]
    fn empty_graph_has_only_background() {
        let graph = SupportGraph::new();
        assert_eq!(graph.vertex_count(), 1);
        assert_eq!(graph.object_id(graph.background()), BACKGROUND);
        assert_eq!(graph.structure(), SceneGraphMsg::default());
    }

    #[test]
    fn single_object_on_background_has_no_levels() {
        let mut graph = SupportGraph::with_vertices(["obj_A"]);
        graph.add_support(BACKGROUND, "obj_A");
        let msg = graph.structure();
        assert_eq!(msg.base_objects_id, vec!["obj_A"]);
        assert_eq!(msg.structure.len(), 1);
        assert!(msg.structure[0].nodes_level.is_empty());
    }

    #[test]
    fn stacked_object_lands_in_first_level() {
        let mut graph = SupportGraph::with_vertices(["obj_A", "obj_B"]);
        graph.add_support(BACKGROUND, "obj_A");
        graph.add_support("obj_A", "obj_B");
        let msg = graph.structure();
        assert_eq!(msg.base_objects_id, vec!["obj_A"]);
        assert_eq!(msg.structure[0].nodes_level.len(), 1);
        assert_eq!(msg.structure[0].nodes_level[0].object_names, vec!["obj_B"]);
    }

    #[test]
    fn levels_follow_distance() {
        // A ← B ← C, and D also on A.
        let mut graph = SupportGraph::new();
        graph.add_support(BACKGROUND, "A");
        graph.add_support("A", "B");
        graph.add_support("B", "C");
        graph.add_support("A", "D");
        let msg = graph.structure();
        let levels = level_sets(&msg, 0);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], BTreeSet::from(["B".to_string(), "D".to_string()]));
        assert_eq!(levels[1], BTreeSet::from(["C".to_string()]));
    }

    #[test]
    fn vertex_reachable_twice_is_emitted_once_at_shortest_distance() {
        // E rests on both B (distance 1) and C (distance 2).
        let mut graph = SupportGraph::new();
        graph.add_support(BACKGROUND, "A");
        graph.add_support("A", "B");
        graph.add_support("B", "C");
        graph.add_support("B", "E");
        graph.add_support("C", "E");
        let msg = graph.structure();
        let all: Vec<&String> = msg.structure[0]
            .nodes_level
            .iter()
            .flat_map(|n| &n.object_names)
            .collect();
        assert_eq!(all.iter().filter(|n| n.as_str() == "E").count(), 1);
        assert_eq!(level_sets(&msg, 0)[1], BTreeSet::from(["C".to_string(), "E".to_string()]));
    }

    #[test]
    fn disconnected_objects_are_excluded() {
        let mut graph = SupportGraph::with_vertices(["A", "floating", "orphan_top"]);
        graph.add_support(BACKGROUND, "A");
        graph.add_support("floating", "orphan_top");
        let msg = graph.structure();
        assert_eq!(msg.base_objects_id, vec!["A"]);
        assert!(msg.structure[0].nodes_level.is_empty());
        let mentioned = format!("{msg:?}");
        assert!(!mentioned.contains("floating"));
        assert!(!mentioned.contains("orphan_top"));
    }

    #[test]
    fn object_spanning_two_bases_appears_under_both() {
        let mut graph = SupportGraph::new();
        graph.add_support(BACKGROUND, "left");
        graph.add_support(BACKGROUND, "right");
        graph.add_support("left", "plank");
        graph.add_support("right", "plank");
        let msg = graph.structure();
        assert_eq!(msg.base_objects_id, vec!["left", "right"]);
        assert_eq!(msg.structure[0].nodes_level[0].object_names, vec!["plank"]);
        assert_eq!(msg.structure[1].nodes_level[0].object_names, vec!["plank"]);
    }

    #[test]
    fn cycles_between_objects_terminate() {
        let mut graph = SupportGraph::new();
        graph.add_support(BACKGROUND, "A");
        graph.add_support("A", "B");
        graph.add_support("B", "A");
        let msg = graph.structure();
        assert_eq!(level_sets(&msg, 0), vec![BTreeSet::from(["B".to_string()])]);
    }

    #[test]
    fn structure_is_idempotent() {
        let mut graph = SupportGraph::new();
        for (u, v) in [(BACKGROUND, "A"), ("A", "B"), ("A", "C"), ("C", "D"), (BACKGROUND, "E")] {
            graph.add_support(u, v);
        }
        let first = graph.structure();
        for _ in 0..5 {
            assert_eq!(graph.structure(), first);
        }
    }

    #[test]
    fn no_level_contains_its_base() {
        let mut graph = SupportGraph::new();
        graph.add_support(BACKGROUND, "A");
        graph.add_support("A", "B");
        graph.add_support("B", "A");
        let msg = graph.structure();
        for (i, base) in msg.base_objects_id.iter().enumerate() {
            for level in &msg.structure[i].nodes_level {
                assert!(!level.object_names.contains(base));
            }
        }
    }

    #[test]
    fn invalid_edges_are_ignored() {
        let mut graph = SupportGraph::new();
        graph.add_support("A", BACKGROUND);
        graph.add_support("A", "A");
        graph.add_support(BACKGROUND, "A");
        graph.add_support(BACKGROUND, "A");
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.children_of(BACKGROUND), vec!["A"]);
        assert!(graph.children_of("ghost").is_empty());
    }
}
