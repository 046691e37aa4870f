//! Patch registry: installs and removes the call interceptors on a client
//! module, exactly one wrapper layer per entry point no matter how often
//! installation is attempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opentelemetry::global::{self, BoxedTracer};
use semver::VersionReq;
use tracing::debug;

use crate::client::{PubSubClient, PubSubModule, Subscription, Topic};
use crate::error::InstrumentError;
use crate::publish::TracedTopic;
use crate::subscribe::TracedSubscription;

/// Instrumentation scope reported to the tracing backend.
pub const INSTRUMENTATION_NAME: &str = "opentelemetry-instrumentation-pubsub";

/// Client module versions this instrumentation knows how to wrap.
pub const SUPPORTED_VERSIONS: &str = "^2.15.1";

/// The fixed set of entry points the registry patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Publish,
    PublishJson,
    PublishMessage,
    On,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 4] = [
        EntryPoint::Publish,
        EntryPoint::PublishJson,
        EntryPoint::PublishMessage,
        EntryPoint::On,
    ];

    /// Method name on the client type.
    pub fn method(&self) -> &'static str {
        match self {
            EntryPoint::Publish => "publish",
            EntryPoint::PublishJson => "publishJSON",
            EntryPoint::PublishMessage => "publishMessage",
            EntryPoint::On => "on",
        }
    }

    /// Name of the span the interceptor for this entry point starts.
    pub fn span_name(&self) -> &'static str {
        match self {
            EntryPoint::Publish => "topic.publish",
            EntryPoint::PublishJson => "topic.publishJSON",
            EntryPoint::PublishMessage => "topic.publishMessage",
            EntryPoint::On => "subscription.message",
        }
    }
}

/// Per-entry-point installed/not-installed state, shared with the decorators.
///
/// Flags are written only by [`PubSubInstrumentation::apply`] and
/// [`PubSubInstrumentation::remove`]; instrumented calls only read them, so
/// an unpatched entry point calls straight through even on handles created
/// while the patch was active.
#[derive(Debug, Default)]
pub(crate) struct PatchFlags {
    publish: AtomicBool,
    publish_json: AtomicBool,
    publish_message: AtomicBool,
    on: AtomicBool,
}

impl PatchFlags {
    fn slot(&self, entry: EntryPoint) -> &AtomicBool {
        match entry {
            EntryPoint::Publish => &self.publish,
            EntryPoint::PublishJson => &self.publish_json,
            EntryPoint::PublishMessage => &self.publish_message,
            EntryPoint::On => &self.on,
        }
    }

    pub(crate) fn is_patched(&self, entry: EntryPoint) -> bool {
        self.slot(entry).load(Ordering::Acquire)
    }

    fn set(&self, entry: EntryPoint, patched: bool) {
        self.slot(entry).store(patched, Ordering::Release);
    }
}

/// Wrapper bookkeeping carried by a patched [`PubSubModule`]: the client to
/// restore and the flags silencing outstanding decorator handles. Living with
/// the module rather than the registry, it lets any registry instance detect
/// and strip an active wrapper.
pub(crate) struct PatchState {
    pub(crate) original: Arc<dyn PubSubClient>,
    pub(crate) flags: Arc<PatchFlags>,
}

/// Idempotent installer for the pub/sub call interceptors.
///
/// `apply` wraps the module's topic and subscription factories so that every
/// topic/subscription constructed afterwards carries the traced decorators;
/// `remove` restores the original factories. Applying on an already patched
/// module first removes the existing wrapper, even one installed by another
/// registry instance, so there is never more than one wrapper layer per
/// entry point.
pub struct PubSubInstrumentation {
    supported: VersionReq,
}

impl PubSubInstrumentation {
    pub fn new() -> Self {
        let supported =
            VersionReq::parse(SUPPORTED_VERSIONS).expect("supported version range is valid");
        Self { supported }
    }

    /// Install the interceptors on `module` in place.
    ///
    /// Fails with [`InstrumentError::IncompatibleVersion`] before touching
    /// anything when the module version is outside [`SUPPORTED_VERSIONS`].
    pub fn apply(&self, module: &mut PubSubModule) -> Result<(), InstrumentError> {
        let version = module.version().clone();
        if !self.supported.matches(&version) {
            return Err(InstrumentError::IncompatibleVersion {
                found: version,
                supported: self.supported.clone(),
            });
        }
        debug!(%version, "applying patch for pub/sub client");

        // Unwrap-then-wrap: strip any active wrapper, whoever installed it,
        // and silence its outstanding handles.
        if let Some(state) = module.take_patch() {
            for entry in EntryPoint::ALL {
                debug!(method = entry.method(), "removing existing wrapper");
                state.flags.set(entry, false);
            }
        }

        let tracer = global::tracer(INSTRUMENTATION_NAME);
        let flags = Arc::new(PatchFlags::default());
        let original = module.client();
        module.install_patch(
            Arc::new(InstrumentedClient {
                inner: Arc::clone(&original),
                tracer: Arc::new(tracer),
                flags: Arc::clone(&flags),
            }),
            PatchState {
                original,
                flags: Arc::clone(&flags),
            },
        );
        for entry in EntryPoint::ALL {
            debug!(method = entry.method(), "installing wrapper");
            flags.set(entry, true);
        }
        Ok(())
    }

    /// Restore the original client behavior. Safe to call when nothing is
    /// patched; without an active wrapper this is a no-op.
    pub fn remove(&self, module: &mut PubSubModule) {
        debug!("removing patch for pub/sub client");
        if let Some(state) = module.take_patch() {
            for entry in EntryPoint::ALL {
                debug!(method = entry.method(), "removing wrapper");
                state.flags.set(entry, false);
            }
        }
    }
}

impl Default for PubSubInstrumentation {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory decorator installed by [`PubSubInstrumentation::apply`]: every
/// constructed topic/subscription is wrapped with the call interceptors.
struct InstrumentedClient {
    inner: Arc<dyn PubSubClient>,
    tracer: Arc<BoxedTracer>,
    flags: Arc<PatchFlags>,
}

impl PubSubClient for InstrumentedClient {
    fn topic(&self, name: &str) -> Arc<dyn Topic> {
        Arc::new(TracedTopic::new(
            self.inner.topic(name),
            Arc::clone(&self.tracer),
            Arc::clone(&self.flags),
        ))
    }

    fn subscription(&self, name: &str) -> Arc<dyn Subscription> {
        Arc::new(TracedSubscription::new(
            self.inner.subscription(name),
            Arc::clone(&self.tracer),
            Arc::clone(&self.flags),
        ))
    }
}
