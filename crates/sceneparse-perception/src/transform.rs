//! Transform Frame (TF) tree and a thread-safe buffer with bounded-wait
//! lookups.
//!
//! [`TfEngine`] is a directed graph of named frames whose edges are the
//! parent → child [`Transform3D`]s; [`TfEngine::lookup`] composes the chain
//! found by BFS.  Edges are also walked backwards (inverted), so a child can
//! be resolved relative to any frame connected to it.
//!
//! [`TfBuffer`] wraps an engine behind a mutex and a condition variable and
//! implements [`TransformSource`], the capability the reconciliation passes
//! use to resolve object frames.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use sceneparse_perception::transform::{TfBuffer, TransformSource};
//! use sceneparse_types::Transform3D;
//!
//! let tf = TfBuffer::new();
//! tf.set_transform("world", "table", Transform3D::from_translation(1.0, 0.0, 0.0));
//! tf.set_transform("table", "obj_A", Transform3D::from_translation(0.0, 0.0, 0.8));
//!
//! let t = tf.wait_for_transform("world", "obj_A", Duration::from_millis(10)).unwrap();
//! assert!((t.translation.z - 0.8).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sceneparse_types::Transform3D;
use tracing::trace;

// ────────────────────────────────────────────────────────────────────────────
// TransformSource
// ────────────────────────────────────────────────────────────────────────────

/// Resolves the pose of `child` relative to `parent`, waiting up to
/// `timeout` for it to become available.
pub trait TransformSource: Send + Sync {
    fn wait_for_transform(&self, parent: &str, child: &str, timeout: Duration)
    -> Option<Transform3D>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the transforms relating them.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[parent][child] = T_parent_child`
    edges: HashMap<String, HashMap<String, Transform3D>>,
    /// `reverse[child]` = parents that publish `child`
    reverse: HashMap<String, HashSet<String>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` in `parent_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        self.reverse
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string());
    }

    /// `true` once any edge touches `frame`.
    pub fn knows(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.reverse.contains_key(frame)
    }

    /// Pose of `target_frame` expressed in `source_frame`, or `None` when the
    /// frames are not connected.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<Transform3D> {
        if source_frame == target_frame {
            return Some(Transform3D::identity());
        }

        // Each queue item carries T_source_current.
        let mut queue: VecDeque<(String, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        queue.push_back((source_frame.to_string(), Transform3D::identity()));
        visited.insert(source_frame.to_string());

        while let Some((current, accumulated)) = queue.pop_front() {
            for (next, step) in self.neighbours(&current) {
                if !visited.insert(next.clone()) {
                    continue;
                }
                let composed = accumulated.compose(step);
                if next == target_frame {
                    return Some(composed);
                }
                queue.push_back((next, composed));
            }
        }
        None
    }

    /// Forward edges as published, backward edges inverted.
    fn neighbours(&self, frame: &str) -> Vec<(String, Transform3D)> {
        let mut out = Vec::new();
        if let Some(children) = self.edges.get(frame) {
            out.extend(children.iter().map(|(c, t)| (c.clone(), *t)));
        }
        if let Some(parents) = self.reverse.get(frame) {
            for p in parents {
                if let Some(t) = self.edges.get(p).and_then(|m| m.get(frame)) {
                    out.push((p.clone(), t.inverse()));
                }
            }
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe [`TfEngine`] whose writers wake blocked lookups.
#[derive(Debug, Default)]
pub struct TfBuffer {
    engine: Mutex<TfEngine>,
    updated: Condvar,
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a transform and wake every waiting lookup.
    pub fn set_transform(&self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.engine
            .lock()
            .set_transform(parent_frame, child_frame, transform);
        self.updated.notify_all();
    }

    /// Non-blocking lookup.
    pub fn lookup(&self, parent: &str, child: &str) -> Option<Transform3D> {
        self.engine.lock().lookup(parent, child)
    }
}

impl TransformSource for TfBuffer {
    fn wait_for_transform(
        &self,
        parent: &str,
        child: &str,
        timeout: Duration,
    ) -> Option<Transform3D> {
        let deadline = Instant::now() + timeout;
        let mut engine = self.engine.lock();
        loop {
            if let Some(t) = engine.lookup(parent, child) {
                return Some(t);
            }
            let now = Instant::now();
            if now >= deadline {
                trace!(parent, child, "transform lookup timed out");
                return None;
            }
            // Spurious wakeups just re-run the lookup.
            self.updated.wait_for(&mut engine, deadline - now);
        }
    }
}
