//! `sceneparse-runtime` – the sequential scene parser core.
//!
//! # Modules
//!
//! - [`assessor`] – [`SceneAssessor`][assessor::SceneAssessor]: ingestion
//!   entry points, the readiness gate, and the detection and hypothesis
//!   reconciliation passes.
//! - [`state`] – [`SharedSceneState`][state::SharedSceneState]: readiness
//!   flags and input snapshots with atomic check-clear-copy claims.
//! - [`physics`] – the [`PhysicsEngine`][physics::PhysicsEngine] contract and
//!   the geometry-only [`GeometricPhysics`][physics::GeometricPhysics].
//! - [`registry`] – the [`ObjectRegistry`][registry::ObjectRegistry] contract
//!   and the table-backed [`PropertyDatabase`][registry::PropertyDatabase].
//! - [`liveness`] – [`CompletionWatchdog`][liveness::CompletionWatchdog]:
//!   pass liveness inferred from completion signals.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod assessor;
pub mod liveness;
pub mod physics;
pub mod registry;
pub mod state;
pub mod telemetry;

pub use assessor::{AssessorConfig, IngestReport, PassOutcome, SceneAssessor};
pub use liveness::{CompletionWatchdog, PassHealth};
pub use physics::{ContactModel, GeometricPhysics, PhysicsEngine, PoseCorrection};
pub use registry::{ObjectRegistry, PropertyDatabase, resolve_class};
pub use state::{DeferReason, ReadinessFlags, SharedSceneState};
pub use telemetry::{TracerProviderGuard, init_tracing};
