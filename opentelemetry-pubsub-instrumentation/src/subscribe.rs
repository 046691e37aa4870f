//! Delivery interceptor: handlers registered for the `"message"` event are
//! wrapped so each delivered message is processed under its own `CONSUMER`
//! span, parented to the trace extracted from the message attributes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{FutureExt, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::client::{
    Acker, ClientResult, EventHandler, Subscription, SubscriptionEvent, MESSAGE_EVENT,
};
use crate::instrumentation::{EntryPoint, PatchFlags};
use crate::propagation;
use crate::span::SpanGuard;

/// Exception message recorded when a handler nacks a delivery.
const NACK_EXCEPTION: &str = "message was not acked";

/// Decorator over a subscription that traces message deliveries.
///
/// Registrations for events other than [`MESSAGE_EVENT`] pass through
/// unmodified. Each `"message"` registration gets its own independent
/// wrapping, and each delivery its own span, matching how the underlying
/// event mechanism invokes multiple handlers per event.
pub struct TracedSubscription {
    inner: Arc<dyn Subscription>,
    tracer: Arc<BoxedTracer>,
    flags: Arc<PatchFlags>,
}

impl TracedSubscription {
    pub(crate) fn new(
        inner: Arc<dyn Subscription>,
        tracer: Arc<BoxedTracer>,
        flags: Arc<PatchFlags>,
    ) -> Self {
        Self {
            inner,
            tracer,
            flags,
        }
    }
}

impl Subscription for TracedSubscription {
    fn topic_name(&self) -> Option<String> {
        self.inner.topic_name()
    }

    fn on(&self, event: &str, handler: EventHandler) {
        if event != MESSAGE_EVENT || !self.flags.is_patched(EntryPoint::On) {
            return self.inner.on(event, handler);
        }

        let tracer = Arc::clone(&self.tracer);
        let subscription = Arc::clone(&self.inner);
        let wrapped: EventHandler = Arc::new(move |event: SubscriptionEvent| {
            let msg = match event {
                SubscriptionEvent::Message(msg) => msg,
                other => return handler(other),
            };

            let parent = propagation::extract_context(msg.attributes.as_ref());
            let topic_name = subscription
                .topic_name()
                .unwrap_or_else(|| "unknown".to_string());
            let span = tracer
                .span_builder(EntryPoint::On.span_name())
                .with_kind(SpanKind::Consumer)
                .with_attributes([
                    KeyValue::new("topic.name", topic_name),
                    KeyValue::new("message.id", msg.id.clone()),
                ])
                .start_with_context(tracer.as_ref(), &parent);
            let cx = parent.with_span(span);

            // Observe nack on this one message instance while the span is
            // still open.
            let acker = msg.acker();
            let msg = msg.with_acker(Arc::new(RecordingAcker {
                inner: acker,
                cx: cx.clone(),
            }));

            let handler = Arc::clone(&handler);
            let guard = SpanGuard::new(cx.clone());
            let fut: BoxFuture<'static, ClientResult<()>> = Box::pin(
                async move {
                    let result = handler(SubscriptionEvent::Message(msg)).await;
                    guard.finish(result.as_ref().err());
                    result
                }
                .with_context(cx),
            );
            fut
        });
        self.inner.on(event, wrapped);
    }
}

/// Acker decorator that records the nack as an exception on the open consumer
/// span before performing the original negative acknowledge.
struct RecordingAcker {
    inner: Arc<dyn Acker>,
    cx: Context,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(&self) {
        self.inner.ack().await;
    }

    async fn nack(&self) {
        self.cx.span().add_event(
            "exception",
            vec![KeyValue::new("exception.message", NACK_EXCEPTION)],
        );
        self.inner.nack().await;
    }
}
