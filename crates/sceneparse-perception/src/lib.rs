//! `sceneparse-perception` – spatial bookkeeping for the scene parser.
//!
//! # Modules
//!
//! - [`transform`] – [`TfEngine`][transform::TfEngine] frame tree and the
//!   thread-safe [`TfBuffer`][transform::TfBuffer], which implements the
//!   bounded-wait [`TransformSource`][transform::TransformSource] used to
//!   resolve detected object frames.
//! - [`support_graph`] – [`SupportGraph`][support_graph::SupportGraph]:
//!   the background-rooted "rests on" graph and its level decomposition into
//!   a [`SceneGraphMsg`][sceneparse_types::SceneGraphMsg].

pub mod support_graph;
pub mod transform;

pub use support_graph::{BACKGROUND, SupportGraph, VertexId};
pub use transform::{TfBuffer, TfEngine, TransformSource};
