//! Message attribute carriers for OpenTelemetry context propagation.
//!
//! Pub/sub message attributes are a flat `String -> String` map, so one pair
//! of [`Injector`]/[`Extractor`] wrappers covers both directions. The
//! propagation keys themselves (`traceparent` and friends) are owned by the
//! configured global text-map propagator.

use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{global, Context};

use crate::client::Attributes;

/// An [`Injector`] over a message's attribute map.
///
/// Wraps a mutable reference so that trace context lands in the very map the
/// published message carries, not a copy.
pub struct AttributesInjector<'a>(pub &'a mut Attributes);

impl Injector for AttributesInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// An [`Extractor`] over a delivered message's attribute map.
pub struct AttributesExtractor<'a>(pub &'a Attributes);

impl Extractor for AttributesExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Inject `cx` into `attributes` in place using the global propagator.
pub fn inject_context(cx: &Context, attributes: &mut Attributes) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut AttributesInjector(attributes));
    });
}

/// Extract the inbound context from a delivered message's attributes.
///
/// A message with no attribute map extracts from an empty carrier, and
/// malformed propagation entries are ignored by the propagator, so both
/// degrade to a root consumer span rather than an error.
pub fn extract_context(attributes: Option<&Attributes>) -> Context {
    let empty = Attributes::new();
    let carrier = attributes.unwrap_or(&empty);
    global::get_text_map_propagator(|propagator| {
        propagator.extract(&AttributesExtractor(carrier))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injector_sets_string_attribute() {
        let mut attrs = Attributes::new();
        let mut injector = AttributesInjector(&mut attrs);

        injector.set("traceparent", "00-abc123-def456-01".to_string());

        assert_eq!(
            attrs.get("traceparent").map(String::as_str),
            Some("00-abc123-def456-01")
        );
    }

    #[test]
    fn test_injector_overwrites_existing_key() {
        let mut attrs = Attributes::new();
        let mut injector = AttributesInjector(&mut attrs);

        injector.set("key", "value1".to_string());
        injector.set("key", "value2".to_string());

        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.get("key").map(String::as_str), Some("value2"));
    }

    #[test]
    fn test_extractor_gets_existing_key() {
        let mut attrs = Attributes::new();
        attrs.insert("traceparent".to_string(), "00-abc123-def456-01".to_string());

        let extractor = AttributesExtractor(&attrs);

        assert_eq!(extractor.get("traceparent"), Some("00-abc123-def456-01"));
    }

    #[test]
    fn test_extractor_returns_none_for_missing_key() {
        let attrs = Attributes::new();
        let extractor = AttributesExtractor(&attrs);

        assert_eq!(extractor.get("nonexistent"), None);
    }

    #[test]
    fn test_extractor_keys_returns_all_keys() {
        let mut attrs = Attributes::new();
        attrs.insert("key1".to_string(), "value1".to_string());
        attrs.insert("key2".to_string(), "value2".to_string());

        let extractor = AttributesExtractor(&attrs);
        let mut keys = extractor.keys();
        keys.sort();

        assert_eq!(keys, vec!["key1", "key2"]);
    }

    #[test]
    fn test_extract_without_attributes_yields_context() {
        // No attribute map at all must not fail; the result is simply a
        // context with no remote parent.
        let _cx = extract_context(None);
    }
}
