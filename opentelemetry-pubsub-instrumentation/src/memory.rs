//! In-memory pub/sub client for demos and tests.
//!
//! Stands in for the real messaging service the instrumentation wraps:
//! topics and subscriptions are bound with [`MemoryPubSub::attach`], and a
//! publish delivers inline to every handler registered for the `"message"`
//! event, so tests stay deterministic. Published messages and ack/nack
//! counts are recorded for inspection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::{
    Acker, Attributes, ClientResult, EventHandler, OutgoingMessage, PubSubClient, ReceivedMessage,
    Subscription, SubscriptionEvent, Topic, MESSAGE_EVENT,
};

/// Record of one accepted publish, as the wire would have seen it.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub data: Vec<u8>,
    pub attributes: Option<Attributes>,
}

#[derive(Default)]
struct MemoryState {
    subscriptions: Mutex<HashMap<String, Arc<MemorySubscription>>>,
    published: Mutex<Vec<PublishedMessage>>,
    next_id: AtomicU64,
    acks: AtomicU64,
    nacks: AtomicU64,
    fail_publish: AtomicBool,
    stall_publish: AtomicBool,
}

/// In-memory [`PubSubClient`]. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryPubSub {
    state: Arc<MemoryState>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `subscription` bound to `topic`. Messages published to the
    /// topic are delivered to every handler the subscription registers for
    /// the `"message"` event.
    pub fn attach(&self, topic: &str, subscription: &str) {
        let sub = Arc::new(MemorySubscription {
            topic: Some(topic.to_string()),
            handlers: Mutex::new(Vec::new()),
        });
        self.state
            .subscriptions
            .lock()
            .expect("lock poisoned")
            .insert(subscription.to_string(), sub);
    }

    /// Make subsequent publishes fail, for error-path tests.
    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent publishes hang without resolving, for cancellation
    /// tests.
    pub fn stall_publishes(&self, stall: bool) {
        self.state.stall_publish.store(stall, Ordering::SeqCst);
    }

    /// Every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().expect("lock poisoned").clone()
    }

    pub fn acks(&self) -> u64 {
        self.state.acks.load(Ordering::SeqCst)
    }

    pub fn nacks(&self) -> u64 {
        self.state.nacks.load(Ordering::SeqCst)
    }

    /// Dispatch a non-delivery event to `subscription`'s matching handlers.
    pub async fn emit(&self, subscription: &str, event: SubscriptionEvent) {
        let handlers = {
            let subs = self.state.subscriptions.lock().expect("lock poisoned");
            match subs.get(subscription) {
                Some(sub) => sub.handlers_for(event.name()),
                None => Vec::new(),
            }
        };
        for handler in handlers {
            let _ = handler(event.clone()).await;
        }
    }
}

impl PubSubClient for MemoryPubSub {
    fn topic(&self, name: &str) -> Arc<dyn Topic> {
        Arc::new(MemoryTopic {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }

    fn subscription(&self, name: &str) -> Arc<dyn Subscription> {
        let mut subs = self.state.subscriptions.lock().expect("lock poisoned");
        let sub: Arc<MemorySubscription> =
            Arc::clone(subs.entry(name.to_string()).or_insert_with(|| {
                // Unknown name: an unbound subscription with no topic metadata.
                Arc::new(MemorySubscription {
                    topic: None,
                    handlers: Mutex::new(Vec::new()),
                })
            }));
        sub
    }
}

struct MemoryTopic {
    name: String,
    state: Arc<MemoryState>,
}

impl MemoryTopic {
    async fn deliver(&self, data: Vec<u8>, attributes: Option<Attributes>) -> ClientResult<String> {
        if self.state.stall_publish.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(format!("publish to {} rejected", self.name).into());
        }
        let id = format!("m{}", self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.state
            .published
            .lock()
            .expect("lock poisoned")
            .push(PublishedMessage {
                topic: self.name.clone(),
                data: data.clone(),
                attributes: attributes.clone(),
            });

        let handlers: Vec<EventHandler> = {
            let subs = self.state.subscriptions.lock().expect("lock poisoned");
            subs.values()
                .filter(|sub| sub.topic.as_deref() == Some(self.name.as_str()))
                .flat_map(|sub| sub.handlers_for(MESSAGE_EVENT))
                .collect()
        };
        for handler in handlers {
            let msg = ReceivedMessage::new(
                id.clone(),
                attributes.clone(),
                data.clone(),
                Arc::new(MemoryAcker {
                    state: Arc::clone(&self.state),
                }),
            );
            // The handler's outcome is the subscriber's concern.
            let _ = handler(SubscriptionEvent::Message(msg)).await;
        }
        Ok(id)
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Vec<u8>, attributes: Option<Attributes>) -> ClientResult<String> {
        self.deliver(data, attributes).await
    }

    async fn publish_json(
        &self,
        value: serde_json::Value,
        attributes: Option<Attributes>,
    ) -> ClientResult<String> {
        let data = serde_json::to_vec(&value)?;
        self.deliver(data, attributes).await
    }

    async fn publish_message(&self, message: OutgoingMessage) -> ClientResult<String> {
        self.deliver(message.data, message.attributes).await
    }
}

struct MemorySubscription {
    topic: Option<String>,
    handlers: Mutex<Vec<(String, EventHandler)>>,
}

impl MemorySubscription {
    fn handlers_for(&self, event: &str) -> Vec<EventHandler> {
        self.handlers
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}

impl Subscription for MemorySubscription {
    fn topic_name(&self) -> Option<String> {
        self.topic.clone()
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .expect("lock poisoned")
            .push((event.to_string(), handler));
    }
}

struct MemoryAcker {
    state: Arc<MemoryState>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) {
        self.state.acks.fetch_add(1, Ordering::SeqCst);
    }

    async fn nack(&self) {
        self.state.nacks.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_lookup_preserves_topic_binding() {
        let pubsub = MemoryPubSub::new();
        pubsub.attach("orders", "orders-sub");

        assert_eq!(
            pubsub.subscription("orders-sub").topic_name(),
            Some("orders".to_string())
        );
        // Unknown names resolve to an unbound subscription.
        assert_eq!(pubsub.subscription("mystery-sub").topic_name(), None);
    }

    #[tokio::test]
    async fn test_publish_records_message_and_assigns_ids() {
        let pubsub = MemoryPubSub::new();
        let topic = pubsub.topic("orders");

        let first = topic.publish(b"a".to_vec(), None).await.unwrap();
        let second = topic.publish(b"b".to_vec(), None).await.unwrap();

        assert_eq!(first, "m1");
        assert_eq!(second, "m2");
        assert_eq!(pubsub.published().len(), 2);
        assert_eq!(pubsub.published()[0].topic, "orders");
    }

    #[tokio::test]
    async fn test_attached_subscription_receives_and_acks() {
        let pubsub = MemoryPubSub::new();
        pubsub.attach("orders", "orders-sub");

        let sub = pubsub.subscription("orders-sub");
        let handler: EventHandler = Arc::new(|event| {
            Box::pin(async move {
                if let SubscriptionEvent::Message(msg) = event {
                    msg.ack().await;
                }
                Ok(())
            })
        });
        sub.on(MESSAGE_EVENT, handler);

        pubsub
            .topic("orders")
            .publish(b"hello".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(pubsub.acks(), 1);
        assert_eq!(pubsub.nacks(), 0);
    }

    #[tokio::test]
    async fn test_failed_publish_reaches_no_subscriber() {
        let pubsub = MemoryPubSub::new();
        pubsub.attach("orders", "orders-sub");
        pubsub.fail_publishes(true);

        let result = pubsub.topic("orders").publish(b"x".to_vec(), None).await;

        assert!(result.is_err());
        assert!(pubsub.published().is_empty());
    }
}
