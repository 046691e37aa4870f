//! Publish interceptors: every publish-style call produces a `PRODUCER` span
//! and carries the active trace context out with the message.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{FutureExt, Span, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::client::{Attributes, ClientResult, OutgoingMessage, Topic};
use crate::instrumentation::{EntryPoint, PatchFlags};
use crate::propagation;
use crate::span::SpanGuard;

/// Decorator over a topic that traces its three publish operations.
///
/// Each call starts a span parented to the caller's current context, injects
/// propagation metadata into the outgoing attributes before the inner call
/// runs, and forwards the inner call's outcome unchanged.
pub struct TracedTopic {
    inner: Arc<dyn Topic>,
    tracer: Arc<BoxedTracer>,
    flags: Arc<PatchFlags>,
}

impl TracedTopic {
    pub(crate) fn new(
        inner: Arc<dyn Topic>,
        tracer: Arc<BoxedTracer>,
        flags: Arc<PatchFlags>,
    ) -> Self {
        Self {
            inner,
            tracer,
            flags,
        }
    }

    /// Start the producer span for `entry` and inject the resulting context
    /// into `attributes` in place. Injection happens before the original call
    /// executes, so the metadata is present when the message leaves the
    /// process.
    fn start_publish_span(&self, entry: EntryPoint, attributes: &mut Attributes) -> Context {
        let parent = Context::current();
        let mut span = self
            .tracer
            .span_builder(entry.span_name())
            .with_kind(SpanKind::Producer)
            .start_with_context(self.tracer.as_ref(), &parent);
        for (key, value) in attributes.iter() {
            span.set_attribute(KeyValue::new(key.clone(), value.clone()));
        }
        span.set_attribute(KeyValue::new("topic.name", self.inner.name().to_string()));

        let cx = parent.with_span(span);
        propagation::inject_context(&cx, attributes);
        cx
    }
}

#[async_trait]
impl Topic for TracedTopic {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn publish(&self, data: Vec<u8>, attributes: Option<Attributes>) -> ClientResult<String> {
        if !self.flags.is_patched(EntryPoint::Publish) {
            return self.inner.publish(data, attributes).await;
        }
        let mut attributes = attributes.unwrap_or_default();
        let cx = self.start_publish_span(EntryPoint::Publish, &mut attributes);
        let guard = SpanGuard::new(cx.clone());
        let result = self
            .inner
            .publish(data, Some(attributes))
            .with_context(cx)
            .await;
        guard.finish(result.as_ref().err());
        result
    }

    async fn publish_json(
        &self,
        value: serde_json::Value,
        attributes: Option<Attributes>,
    ) -> ClientResult<String> {
        if !self.flags.is_patched(EntryPoint::PublishJson) {
            return self.inner.publish_json(value, attributes).await;
        }
        let mut attributes = attributes.unwrap_or_default();
        let cx = self.start_publish_span(EntryPoint::PublishJson, &mut attributes);
        let guard = SpanGuard::new(cx.clone());
        let result = self
            .inner
            .publish_json(value, Some(attributes))
            .with_context(cx)
            .await;
        guard.finish(result.as_ref().err());
        result
    }

    async fn publish_message(&self, mut message: OutgoingMessage) -> ClientResult<String> {
        if !self.flags.is_patched(EntryPoint::PublishMessage) {
            return self.inner.publish_message(message).await;
        }
        // Inject into the message's own attributes field, not a copy.
        let attributes = message.attributes.get_or_insert_with(Attributes::new);
        let cx = self.start_publish_span(EntryPoint::PublishMessage, attributes);
        let guard = SpanGuard::new(cx.clone());
        let result = self
            .inner
            .publish_message(message)
            .with_context(cx)
            .await;
        guard.finish(result.as_ref().err());
        result
    }
}
