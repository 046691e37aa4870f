//! OpenTelemetry instrumentation for a Google Pub/Sub style messaging client.
//!
//! This crate wraps a pub/sub client's publish and delivery entry points with
//! tracing interceptors: every publish-style call produces a `PRODUCER` span
//! and injects trace context into the outgoing message attributes, and every
//! delivered message is handled under a `CONSUMER` span parented to the trace
//! extracted from its attributes. The wrapped client's behavior, return
//! values, and failures pass through untouched; tracing is a best-effort
//! overlay.
//!
//! Interceptors are composed at construction time:
//! [`PubSubInstrumentation::apply`] swaps a module's topic/subscription
//! factories for decorating ones, with exactly one wrapper layer per entry
//! point no matter how often it is called, and
//! [`PubSubInstrumentation::remove`] restores the original client.
//!
//! # Example
//!
//! ```ignore
//! use opentelemetry_pubsub_instrumentation::{
//!     PubSubInstrumentation, PubSubModule, MESSAGE_EVENT,
//! };
//! use semver::Version;
//!
//! let mut module = PubSubModule::new(Version::new(2, 15, 1), client);
//! let instrumentation = PubSubInstrumentation::new();
//! instrumentation.apply(&mut module)?;
//!
//! // Publishes carry trace context out with the message...
//! let topic = module.topic("orders");
//! topic.publish(payload, None).await?;
//!
//! // ...and deliveries are handled under a consumer span.
//! module.subscription("orders-sub").on(MESSAGE_EVENT, handler);
//! ```

pub mod client;
pub mod error;
pub mod instrumentation;
pub mod memory;
pub mod propagation;
mod publish;
mod span;
mod subscribe;

pub use client::{
    Acker, Attributes, ClientError, ClientResult, EventHandler, OutgoingMessage, PubSubClient,
    PubSubModule, ReceivedMessage, Subscription, SubscriptionEvent, Topic, MESSAGE_EVENT,
};
pub use error::InstrumentError;
pub use instrumentation::{
    EntryPoint, PubSubInstrumentation, INSTRUMENTATION_NAME, SUPPORTED_VERSIONS,
};
pub use propagation::{AttributesExtractor, AttributesInjector};
pub use publish::TracedTopic;
pub use subscribe::TracedSubscription;
