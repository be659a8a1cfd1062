//! In-process publish/subscribe bus connecting pipeline stages.
//!
//! Four named topics (clips, observations, decisions, actions), each an
//! unbounded FIFO queue with exactly one consumer. `publish` never blocks the
//! caller; `consume` waits up to a bounded timeout so stage loops can observe
//! shutdown promptly. No persistence; a process restart loses all in-flight
//! contents, which is acceptable because upstream events are not re-derivable
//! without source replay anyway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::types::{ActionEvent, ClipEvent, DecisionEvent, ObservationEvent};

/// Named bus topic. Within one topic delivery is strict FIFO; there is no
/// ordering guarantee across topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Clips,
    Observations,
    Decisions,
    Actions,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Clips,
        Topic::Observations,
        Topic::Decisions,
        Topic::Actions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Clips => "clips",
            Topic::Observations => "observations",
            Topic::Decisions => "decisions",
            Topic::Actions => "actions",
        }
    }

    fn index(self) -> usize {
        match self {
            Topic::Clips => 0,
            Topic::Observations => 1,
            Topic::Decisions => 2,
            Topic::Actions => 3,
        }
    }
}

/// A message on the bus. Each topic carries exactly one variant.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Clip(ClipEvent),
    Observation(ObservationEvent),
    Decision(DecisionEvent),
    Action(ActionEvent),
}

struct TopicQueue {
    tx: mpsc::UnboundedSender<BusMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<BusMessage>>,
    depth: AtomicUsize,
}

impl TopicQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }
}

/// The stage-decoupling bus. Construct once, share via `Arc`.
pub struct Bus {
    queues: [TopicQueue; 4],
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            queues: [
                TopicQueue::new(),
                TopicQueue::new(),
                TopicQueue::new(),
                TopicQueue::new(),
            ],
        }
    }

    /// Enqueue a message. Never blocks the publisher.
    pub fn publish(&self, topic: Topic, msg: BusMessage) {
        let q = &self.queues[topic.index()];
        // Increment before the send so the counter is an upper bound: a
        // consumer can only decrement for a message whose increment already
        // landed, so the gauge can never wrap below zero.
        q.depth.fetch_add(1, Ordering::Relaxed);
        if q.tx.send(msg).is_err() {
            q.depth.fetch_sub(1, Ordering::Relaxed);
            // Receiver half lives inside the Bus, so this only happens if the
            // runtime is tearing down mid-publish.
            warn!(topic = topic.as_str(), "bus publish on closed topic");
        }
    }

    /// Wait up to `timeout` for the next message on `topic`.
    ///
    /// Returns `None` on timeout; never an error. Intended for a single
    /// consumer task per topic; concurrent consumers serialize on the
    /// receiver lock.
    pub async fn consume(&self, topic: Topic, timeout: Duration) -> Option<BusMessage> {
        let q = &self.queues[topic.index()];
        let mut rx = q.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => {
                q.depth.fetch_sub(1, Ordering::Relaxed);
                Some(msg)
            }
            // Channel closed (Bus dropped mid-consume) or timeout
            Ok(None) | Err(_) => None,
        }
    }

    /// Current backlog size for monitoring.
    pub fn queue_depth(&self, topic: Topic) -> usize {
        self.queues[topic.index()].depth.load(Ordering::Relaxed)
    }
}
