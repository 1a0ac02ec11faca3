//! `sceneparse-middleware` – output plumbing.
//!
//! Routes the scene parser's results to whoever listens without caring about
//! their meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`adapter`] – the [`SceneSink`] trait the reconciliation passes emit
//!   through, and [`BusSink`], its event-bus implementation.

pub mod adapter;
pub mod bus;

pub use adapter::{BusSink, SceneSink};
pub use bus::{EventBus, Topic, TopicReceiver};
