use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};

use crate::client::ClientError;

/// Exception message recorded when an intercepted call's future is dropped
/// before it settles.
const CANCELLED_EXCEPTION: &str = "call was cancelled";

/// Finalizer for the span carried by an interceptor's context.
///
/// On normal completion [`finish`](SpanGuard::finish) records the failure, if
/// any, and ends the span; the call's outcome itself is returned to the
/// caller untouched. If the intercepted future is dropped before it settles,
/// the drop path records a cancellation exception instead, so a cancelled
/// call is a failure outcome on the span, not a silent end.
pub(crate) struct SpanGuard {
    cx: Option<Context>,
}

impl SpanGuard {
    pub(crate) fn new(cx: Context) -> Self {
        Self { cx: Some(cx) }
    }

    pub(crate) fn finish(mut self, err: Option<&ClientError>) {
        if let Some(cx) = self.cx.take() {
            let span = cx.span();
            if let Some(err) = err {
                span.record_error(err.as_ref());
            }
            span.end();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.take() {
            let span = cx.span();
            span.add_event(
                "exception",
                vec![KeyValue::new("exception.message", CANCELLED_EXCEPTION)],
            );
            span.end();
        }
    }
}
