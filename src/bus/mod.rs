//! Thread-safe event bus decoupling session loops from observers.
//!
//! Every cross-component interaction goes through here: loops publish
//! lifecycle notifications, the anomaly detector and intervention
//! orchestrator consume them, and control signals flow back to loops.
//!
//! Delivery rules:
//! - publishes on one topic are serialized, so a handler never sees
//!   interleaved deliveries from that topic;
//! - control topics are delivered inline, on the publisher's task, and are
//!   never dropped. Control handlers must not publish on the topic they
//!   handle;
//! - all other topics go through a bounded per-subscriber mailbox that drops
//!   its oldest event (with a warning) when full, so slow observers never
//!   block publishers.

pub mod events;
pub mod queue;
pub mod topic;

pub use events::*;
pub use queue::EventReceiver;
pub use topic::Topic;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bon::Builder;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::channel::Channel;
use crate::config::BusConfig;
use crate::session::SessionId;
use queue::EventQueue;

/// Callback invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Identifies a subscription for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionToken(u64);

/// Per-observer delivery preferences.
#[derive(Debug, Clone, Default, Builder)]
pub struct SubscribeOptions {
    /// Only events for this session.
    pub session: Option<SessionId>,
    /// Channels visible to this observer; `None` means all.
    pub channels: Option<Vec<Channel>>,
    /// Mailbox capacity override.
    pub capacity: Option<usize>,
    /// Never drop: the mailbox grows instead of discarding its oldest event.
    #[builder(default)]
    pub lossless: bool,
}

impl SubscribeOptions {
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session: Some(session_id),
            ..Default::default()
        }
    }

    fn accepts(&self, event: &BusEvent) -> bool {
        if let Some(session) = self.session {
            if session != event.session_id {
                return false;
            }
        }
        match (&self.channels, &event.payload) {
            (Some(visible), EventPayload::ChannelMessage(message)) => {
                visible.contains(&message.channel)
            }
            _ => true,
        }
    }
}

enum Sink {
    Inline(EventHandler),
    Queue(Arc<EventQueue>),
}

struct Subscriber {
    token: SubscriptionToken,
    options: SubscribeOptions,
    sink: Sink,
}

impl Subscriber {
    fn deliver(&self, event: &BusEvent) {
        if !self.options.accepts(event) {
            return;
        }
        match &self.sink {
            Sink::Inline(handler) => handler(event),
            Sink::Queue(queue) => queue.push(event.clone()),
        }
    }

    fn close(&self) {
        if let Sink::Queue(queue) = &self.sink {
            queue.close();
        }
    }
}

pub(crate) struct BusInner {
    registry: RwLock<HashMap<Topic, Vec<Arc<Subscriber>>>>,
    delivery: HashMap<Topic, Mutex<()>>,
    next_token: AtomicU64,
    next_seq: AtomicU64,
    capacity: usize,
}

impl BusInner {
    fn register(&self, topics: &[Topic], subscriber: Arc<Subscriber>) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for topic in topics {
            let entry = registry.entry(*topic).or_default();
            if !entry.iter().any(|s| s.token == subscriber.token) {
                entry.push(subscriber.clone());
            }
        }
    }

    pub(crate) fn remove(&self, token: SubscriptionToken) -> bool {
        let mut removed: Option<Arc<Subscriber>> = None;
        {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            for subscribers in registry.values_mut() {
                if let Some(pos) = subscribers.iter().position(|s| s.token == token) {
                    removed = Some(subscribers.remove(pos));
                }
            }
        }
        match removed {
            Some(subscriber) => {
                subscriber.close();
                true
            }
            None => false,
        }
    }
}

/// Topic-keyed publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("published", &self.inner.next_seq.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(HashMap::new()),
                delivery: Topic::iter().map(|t| (t, Mutex::new(()))).collect(),
                next_token: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                capacity: config.subscriber_capacity,
            }),
        }
    }

    /// Subscribe a handler to one topic.
    ///
    /// Control topics invoke the handler inline; other topics spawn a
    /// delivery task, so this must be called within a Tokio runtime.
    pub fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionToken {
        self.subscribe_with(&[topic], SubscribeOptions::default(), handler)
    }

    /// Subscribe one handler to several topics with delivery preferences.
    ///
    /// The handler sees events from all listed topics in a single ordered
    /// stream. Mixing control and lifecycle topics is allowed; control
    /// events are then queued without a capacity bound.
    pub fn subscribe_with(
        &self,
        topics: &[Topic],
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> SubscriptionToken {
        let token = self.next_token();
        let all_control = !topics.is_empty() && topics.iter().all(|t| t.is_control());

        let sink = if all_control {
            Sink::Inline(handler)
        } else {
            let queue = Arc::new(self.new_queue(topics, &options));
            let drain = queue.clone();
            tokio::spawn(async move {
                while let Some(event) = drain.pop().await {
                    handler(&event);
                }
            });
            Sink::Queue(queue)
        };

        self.inner.register(
            topics,
            Arc::new(Subscriber {
                token,
                options,
                sink,
            }),
        );
        token
    }

    /// Subscribe with a pull-style mailbox.
    pub fn subscribe_receiver(&self, topics: &[Topic], options: SubscribeOptions) -> EventReceiver {
        let token = self.next_token();
        let queue = Arc::new(self.new_queue(topics, &options));
        self.inner.register(
            topics,
            Arc::new(Subscriber {
                token,
                options,
                sink: Sink::Queue(queue.clone()),
            }),
        );
        EventReceiver {
            token,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription. Returns `false` if the token was unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.remove(token)
    }

    /// Publish a notification or control payload for a session.
    ///
    /// Returns the event's sequence number.
    pub fn publish(&self, session_id: SessionId, payload: EventPayload) -> u64 {
        let topic = payload.topic();
        let subscribers: Vec<Arc<Subscriber>> = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        let _serial = self
            .inner
            .delivery
            .get(&topic)
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));

        let event = BusEvent {
            seq: self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
            session_id,
            timestamp: Utc::now(),
            payload,
        };
        let seq = event.seq;

        if subscribers.is_empty() && topic.is_control() {
            tracing::warn!(
                session_id = %session_id,
                topic = %topic,
                "control signal has no receiver"
            );
        }
        for subscriber in &subscribers {
            subscriber.deliver(&event);
        }
        seq
    }

    /// Send a control signal to a session loop. Delivered synchronously.
    pub fn send(&self, session_id: SessionId, signal: ControlSignal) -> u64 {
        self.publish(session_id, EventPayload::Control(signal))
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }

    fn next_token(&self) -> SubscriptionToken {
        SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn new_queue(&self, topics: &[Topic], options: &SubscribeOptions) -> EventQueue {
        if options.lossless || topics.iter().any(|t| t.is_control()) {
            EventQueue::new(None)
        } else {
            EventQueue::new(Some(options.capacity.unwrap_or(self.inner.capacity)))
        }
    }
}
