//! Demo: instrument an in-memory pub/sub client, publish through every call
//! shape under one root trace, and consume the deliveries. Spans are printed
//! to stdout.

mod telemetry;

use std::sync::Arc;

use anyhow::Result;
use opentelemetry::global;
use opentelemetry::trace::{FutureExt, TraceContextExt, Tracer};
use opentelemetry::Context;
use opentelemetry_pubsub_instrumentation::memory::MemoryPubSub;
use opentelemetry_pubsub_instrumentation::{
    Attributes, EventHandler, OutgoingMessage, PubSubInstrumentation, PubSubModule,
    SubscriptionEvent, MESSAGE_EVENT,
};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Serialize, Deserialize, Debug)]
struct Message {
    id: u32,
    content: String,
    timestamp: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let provider = telemetry::init();

    let pubsub = MemoryPubSub::new();
    pubsub.attach("topic_stub", "sub_stub");

    let mut module = PubSubModule::new(Version::new(2, 15, 1), Arc::new(pubsub.clone()));
    let instrumentation = PubSubInstrumentation::new();
    instrumentation.apply(&mut module)?;

    info!("listening for messages...");
    let subscription = module.subscription("sub_stub");
    let handler: EventHandler = Arc::new(|event| {
        Box::pin(async move {
            if let SubscriptionEvent::Message(msg) = event {
                info!(
                    id = %msg.id,
                    attributes = ?msg.attributes,
                    data = %String::from_utf8_lossy(&msg.data),
                    "received message"
                );
                msg.ack().await;
            }
            Ok(())
        })
    });
    subscription.on(MESSAGE_EVENT, handler);

    let topic = module.topic("topic_stub");
    let message = Message {
        id: 1,
        content: "test".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let data = serde_json::to_vec(&message)?;
    let mut attributes = Attributes::new();
    attributes.insert("Operation".to_string(), "test".to_string());

    // One trace for every publish shape.
    let tracer = global::tracer("example");
    let root = Context::current_with_span(tracer.start("test"));

    info!("sending messages...");
    async {
        topic
            .publish(data.clone(), None)
            .await
            .map_err(anyhow::Error::from_boxed)?;
        topic
            .publish(data.clone(), Some(attributes.clone()))
            .await
            .map_err(anyhow::Error::from_boxed)?;

        topic
            .publish_json(serde_json::json!({ "data": "test" }), None)
            .await
            .map_err(anyhow::Error::from_boxed)?;
        topic
            .publish_json(
                serde_json::json!({ "data": "test" }),
                Some(attributes.clone()),
            )
            .await
            .map_err(anyhow::Error::from_boxed)?;

        topic
            .publish_message(OutgoingMessage {
                data: data.clone(),
                attributes: None,
            })
            .await
            .map_err(anyhow::Error::from_boxed)?;
        topic
            .publish_message(OutgoingMessage {
                data: data.clone(),
                attributes: Some(attributes.clone()),
            })
            .await
            .map_err(anyhow::Error::from_boxed)?;
        anyhow::Ok(())
    }
    .with_context(root.clone())
    .await?;
    root.span().end();

    info!(acks = pubsub.acks(), "demo finished, flushing spans");
    provider
        .shutdown()
        .map_err(|err| anyhow::anyhow!("failed to shut down tracer provider: {err}"))?;
    Ok(())
}
