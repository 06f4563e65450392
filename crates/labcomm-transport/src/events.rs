//! Topic-keyed publish/subscribe bus that channels publish inbound data to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

/// Topic that receives every published event.
pub const ANY_TOPIC: &str = "*";

/// Destination for data received by channels.
///
/// Network channels publish under their channel name, serial channels under
/// the frame topic (`"{channel}/0x{tag:02X}"`).
pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]);
}

/// Subscriber callback. Receives the topic and the payload.
pub type Handler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process [`EventSink`] delivering synchronously on the publishing task.
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Use [`ANY_TOPIC`] to receive everything.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        topics.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(sid, _)| *sid != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, Vec::len)
    }

    fn handlers_for(&self, topic: &str) -> Vec<Handler> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let exact = topics.get(topic).into_iter().flatten();
        let any = if topic == ANY_TOPIC {
            None
        } else {
            topics.get(ANY_TOPIC)
        };
        exact
            .chain(any.into_iter().flatten())
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}

impl EventSink for EventBus {
    fn publish(&self, topic: &str, payload: &[u8]) {
        // Handlers run without the lock held so they may (un)subscribe.
        let handlers = self.handlers_for(topic);
        trace!(topic, bytes = payload.len(), subscribers = handlers.len(), "publish");
        for handler in handlers {
            handler(topic, payload);
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn publish(&self, topic: &str, payload: &[u8]) {
        (**self).publish(topic, payload)
    }
}
