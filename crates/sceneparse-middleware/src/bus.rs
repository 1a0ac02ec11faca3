//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber receives
//! every message without any single subscriber blocking the others.  Sends
//! never block, which lets the synchronous reconciliation passes publish
//! while holding the scene lock.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Poses`] | Corrected object poses after every successful pass |
//! | [`Topic::SceneStructure`] | Level-decomposed support graph |
//! | [`Topic::ObjectList`] | Re-emitted detected-object list (best-hypothesis-only mode) |
//! | [`Topic::Completion`] | Zero-payload "pass done" markers |

use sceneparse_types::{Event, SceneError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Poses,
    SceneStructure,
    ObjectList,
    Completion,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Topic; 4] = [
        Topic::Poses,
        Topic::SceneStructure,
        Topic::ObjectList,
        Topic::Completion,
    ];
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    poses: broadcast::Sender<Event>,
    scene_structure: broadcast::Sender<Event>,
    object_list: broadcast::Sender<Event>,
    completion: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (poses, _) = broadcast::channel(capacity);
        let (scene_structure, _) = broadcast::channel(capacity);
        let (object_list, _) = broadcast::channel(capacity);
        let (completion, _) = broadcast::channel(capacity);
        Self {
            poses,
            scene_structure,
            object_list,
            completion,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers that were handed the event, or
    /// [`SceneError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, SceneError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| SceneError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Poses => &self.poses,
            Topic::SceneStructure => &self.scene_structure,
            Topic::ObjectList => &self.object_list,
            Topic::Completion => &self.completion,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Err(Lagged(n))` means `n` events were dropped for this subscriber;
    /// `Err(Closed)` means every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for synchronous consumers.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
