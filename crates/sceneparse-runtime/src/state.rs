//! Readiness flags and the latest input snapshots.
//!
//! [`SharedSceneState`] is always accessed under the assessor's scene lock.
//! Its `try_acquire_*` methods perform check, clear and copy in one call so
//! two concurrent triggers can never both run the same pass on the same
//! inputs.

use std::fmt;

use sceneparse_types::{DetectedObjectList, HypothesisList};

/// The four "new input since last pass" flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessFlags {
    pub point_cloud_updated: bool,
    pub object_list_received: bool,
    pub object_structure_updated: bool,
    pub hypothesis_list_received: bool,
}

/// Why a pass did not run.  Deferred passes emit nothing and are retried on
/// the next ingestion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The pass's readiness flags are not all set.
    NotReady,
    /// Neither the background normal nor the reference frame yielded gravity.
    GravityUnresolved,
    /// No scene cloud has been received this session.
    SceneCloudMissing,
    /// Best-hypothesis-only mode disables the hypothesis pass.
    HypothesesDisabled,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeferReason::NotReady => "inputs not ready",
            DeferReason::GravityUnresolved => "gravity unresolved",
            DeferReason::SceneCloudMissing => "no scene cloud yet",
            DeferReason::HypothesesDisabled => "hypothesis pass disabled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedSceneState {
    flags: ReadinessFlags,
    object_list: Option<DetectedObjectList>,
    hypotheses: Option<HypothesisList>,
    has_scene_cloud: bool,
    has_background: bool,
}

impl SharedSceneState {
    /// Empty state with every flag cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current flags.
    pub fn flags(&self) -> ReadinessFlags {
        self.flags
    }

    /// Whether a background has been accepted.
    pub fn has_background(&self) -> bool {
        self.has_background
    }

    /// Note a new scene cloud and raise its flag.
    pub fn record_scene_cloud(&mut self) {
        self.has_scene_cloud = true;
        self.flags.point_cloud_updated = true;
    }

    /// Mark the background as loaded.  Returns `false` if it already was.
    pub fn record_background(&mut self) -> bool {
        !std::mem::replace(&mut self.has_background, true)
    }

    /// Store `list`, replacing any unconsumed one.
    pub fn store_object_list(&mut self, list: DetectedObjectList) {
        self.object_list = Some(list);
        self.flags.object_list_received = true;
    }

    /// Store `list`, replacing any unconsumed one.
    pub fn store_hypotheses(&mut self, list: HypothesisList) {
        self.hypotheses = Some(list);
        self.flags.hypothesis_list_received = true;
    }

    /// Raise the flag the hypothesis pass waits on.
    pub fn mark_structure_updated(&mut self) {
        self.flags.object_structure_updated = true;
    }

    /// Claim the detection pass: requires a new scene cloud and a new object
    /// list; clears both flags and copies the list.
    pub fn try_acquire_detection(&mut self) -> Result<DetectedObjectList, DeferReason> {
        if !(self.flags.point_cloud_updated && self.flags.object_list_received) {
            return Err(DeferReason::NotReady);
        }
        let list = self.object_list.clone().ok_or(DeferReason::NotReady)?;
        self.flags.point_cloud_updated = false;
        self.flags.object_list_received = false;
        Ok(list)
    }

    /// Claim the hypothesis pass: requires a structure update since the last
    /// hypothesis pass and a new hypothesis list.
    ///
    /// Without any scene cloud the claim fails with
    /// [`DeferReason::SceneCloudMissing`] and the flags stay set, so the pass
    /// runs on a later event instead of waiting here.
    pub fn try_acquire_hypotheses(&mut self) -> Result<HypothesisList, DeferReason> {
        if !(self.flags.object_structure_updated && self.flags.hypothesis_list_received) {
            return Err(DeferReason::NotReady);
        }
        if !self.has_scene_cloud {
            return Err(DeferReason::SceneCloudMissing);
        }
        let list = self.hypotheses.clone().ok_or(DeferReason::NotReady)?;
        self.flags.object_structure_updated = false;
        self.flags.hypothesis_list_received = false;
        Ok(list)
    }
}
