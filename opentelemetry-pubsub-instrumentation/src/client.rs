//! Surface of the instrumented pub/sub client.
//!
//! The messaging client itself is an external collaborator; this module only
//! pins down the call shapes the instrumentation wraps: a topic with three
//! publish operations, a subscription with event-handler registration, and
//! delivered messages carrying `{id, attributes?, data, ack(), nack()}`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use semver::Version;

use crate::instrumentation::PatchState;

/// Flat string metadata attached to a message. Trace context is injected into
/// and extracted from this map.
pub type Attributes = HashMap<String, String>;

/// Errors surfaced by the wrapped client. The instrumentation never inspects
/// them beyond recording; they pass through to the caller untouched.
pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Event name under which delivered messages are dispatched.
pub const MESSAGE_EVENT: &str = "message";

/// A message about to be published via [`Topic::publish_message`].
///
/// When instrumented, propagation metadata is injected into this message's
/// own `attributes` field, so the map that leaves the process is the caller's.
#[derive(Debug, Default, Clone)]
pub struct OutgoingMessage {
    pub data: Vec<u8>,
    pub attributes: Option<Attributes>,
}

/// Publish side of the client. All three operations resolve to the
/// server-assigned message id.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Fully qualified topic name.
    fn name(&self) -> &str;

    /// Publish raw bytes. `attributes: None` is the bare-payload call shape.
    async fn publish(&self, data: Vec<u8>, attributes: Option<Attributes>) -> ClientResult<String>;

    /// Publish a JSON value, serialized by the client.
    async fn publish_json(
        &self,
        value: serde_json::Value,
        attributes: Option<Attributes>,
    ) -> ClientResult<String>;

    /// Publish a structured message object.
    async fn publish_message(&self, message: OutgoingMessage) -> ClientResult<String>;
}

/// Acknowledgement operations of one delivered message.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self);
    async fn nack(&self);
}

/// A message delivered to a subscription handler.
#[derive(Clone)]
pub struct ReceivedMessage {
    pub id: String,
    pub attributes: Option<Attributes>,
    pub data: Vec<u8>,
    acker: Arc<dyn Acker>,
}

impl ReceivedMessage {
    pub fn new(
        id: impl Into<String>,
        attributes: Option<Attributes>,
        data: Vec<u8>,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            id: id.into(),
            attributes,
            data,
            acker,
        }
    }

    /// Acknowledge successful processing.
    pub async fn ack(&self) {
        self.acker.ack().await;
    }

    /// Signal that this message was not processed.
    pub async fn nack(&self) {
        self.acker.nack().await;
    }

    pub(crate) fn acker(&self) -> Arc<dyn Acker> {
        Arc::clone(&self.acker)
    }

    /// Replace the acker on this one message instance. Used by the delivery
    /// interceptor to observe `nack` without touching shared state.
    pub(crate) fn with_acker(mut self, acker: Arc<dyn Acker>) -> Self {
        self.acker = acker;
        self
    }
}

impl std::fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Events a subscription can emit to registered handlers.
#[derive(Clone)]
pub enum SubscriptionEvent {
    Message(ReceivedMessage),
    Error(Arc<ClientError>),
    Close,
}

impl SubscriptionEvent {
    /// Event name this variant is dispatched under.
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionEvent::Message(_) => MESSAGE_EVENT,
            SubscriptionEvent::Error(_) => "error",
            SubscriptionEvent::Close => "close",
        }
    }
}

/// Handler registered for subscription events.
pub type EventHandler =
    Arc<dyn Fn(SubscriptionEvent) -> BoxFuture<'static, ClientResult<()>> + Send + Sync>;

/// Consumer side of the client.
pub trait Subscription: Send + Sync {
    /// Name of the topic this subscription is attached to, when known.
    fn topic_name(&self) -> Option<String>;

    /// Register `handler` for `event`. Handlers registered for the same event
    /// are invoked independently per occurrence.
    fn on(&self, event: &str, handler: EventHandler);
}

/// Factories the client module exposes.
pub trait PubSubClient: Send + Sync {
    fn topic(&self, name: &str) -> Arc<dyn Topic>;
    fn subscription(&self, name: &str) -> Arc<dyn Subscription>;
}

/// Handle to a resolved client module: its version plus the factories the
/// instrumentation patches. [`apply`] swaps the client for an instrumented
/// one in place; [`remove`] restores the original.
///
/// The wrapper bookkeeping travels with the module, so any registry instance
/// can detect and strip an active wrapper regardless of who installed it.
///
/// [`apply`]: crate::PubSubInstrumentation::apply
/// [`remove`]: crate::PubSubInstrumentation::remove
pub struct PubSubModule {
    version: Version,
    client: Arc<dyn PubSubClient>,
    patch: Option<PatchState>,
}

impl PubSubModule {
    pub fn new(version: Version, client: Arc<dyn PubSubClient>) -> Self {
        Self {
            version,
            client,
            patch: None,
        }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn topic(&self, name: &str) -> Arc<dyn Topic> {
        self.client.topic(name)
    }

    pub fn subscription(&self, name: &str) -> Arc<dyn Subscription> {
        self.client.subscription(name)
    }

    pub(crate) fn client(&self) -> Arc<dyn PubSubClient> {
        Arc::clone(&self.client)
    }

    pub(crate) fn install_patch(&mut self, client: Arc<dyn PubSubClient>, state: PatchState) {
        self.client = client;
        self.patch = Some(state);
    }

    /// Strip the active wrapper, if any: restore the original client and hand
    /// the wrapper's bookkeeping to the caller for silencing.
    pub(crate) fn take_patch(&mut self) -> Option<PatchState> {
        let state = self.patch.take();
        if let Some(state) = &state {
            self.client = Arc::clone(&state.original);
        }
        state
    }
}
