//! Event input and the event encoder.
//!
//! An event is a bag of possibly-nested attributes. Encoding flattens the
//! nesting with `.`-joined canonical keys, drops attributes whose field the
//! model has never seen (lookup only, never insert), and dictionary-encodes
//! string values through the bounded normalization cache. The original
//! (pre-normalization) string is kept alongside for `CONTAINS`/`REGEX`.
//!
//! The destination buffers live in the per-thread `EvaluationContext`, so a
//! steady-state encode allocates nothing beyond cache misses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::interning::NormalizationCache;
use crate::predicate::{FieldId, ValueId};

/// Canonical field name carrying the event's type, encoded only when some
/// rule references it.
pub const EVENT_TYPE_FIELD: &str = "EVENT_TYPE";

/// A single event to match against the compiled rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
}

impl Event {
    /// Create an event with no attributes.
    pub fn new(event_id: impl Into<String>) -> Self {
        Event {
            event_id: event_id.into(),
            event_type: None,
            attributes: Map::new(),
        }
    }

    /// Set the event type.
    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Add one attribute (builder style, for tests and embedders).
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Parse an event from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// One encoded attribute value.
#[derive(Debug, Clone)]
pub enum EncodedValue {
    /// String attribute: the normalized form's value-dictionary id (if the
    /// model knows the value), plus both string forms
    Text {
        value_id: Option<ValueId>,
        raw: Arc<str>,
        normalized: Arc<str>,
    },
    /// Integer or float attribute
    Number(f64),
    /// Boolean attribute
    Flag(bool),
}

/// The flattened, dictionary-encoded view of one event. Reused across
/// evaluations; `clear()` retains buffer capacity.
#[derive(Debug, Default)]
pub struct EncodedEvent {
    /// `(field_id, value)` pairs, sorted by field id, one per known field
    fields: Vec<(FieldId, EncodedValue)>,
    /// Scratch buffer for canonical path construction
    path: String,
}

impl EncodedEvent {
    /// Create an empty encoded view.
    pub fn new() -> Self {
        EncodedEvent::default()
    }

    /// Drop all encoded fields, keeping capacity.
    pub fn clear(&mut self) {
        self.fields.clear();
        self.path.clear();
    }

    /// Value for `field_id`, if the event carries it.
    #[inline]
    pub fn get(&self, field_id: FieldId) -> Option<&EncodedValue> {
        self.fields
            .binary_search_by_key(&field_id, |(id, _)| *id)
            .ok()
            .map(|i| &self.fields[i].1)
    }

    /// Iterate over `(field_id, value)` pairs in field-id order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &EncodedValue)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    /// Number of encoded fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no known field was present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Flatten and encode `event` into `out` using the model's dictionaries.
/// Unknown keys are dropped; null, array-valued, and empty-object attributes
/// are skipped.
pub(crate) fn encode_into(
    event: &Event,
    field_dictionary: &Dictionary,
    value_dictionary: &Dictionary,
    cache: &NormalizationCache,
    out: &mut EncodedEvent,
) {
    out.clear();
    let mut path = std::mem::take(&mut out.path);
    for (key, value) in &event.attributes {
        path.clear();
        push_canonical(&mut path, key);
        encode_value(value, field_dictionary, value_dictionary, cache, &mut path, out);
    }
    if let Some(event_type) = &event.event_type {
        if let Some(field_id) = field_dictionary.get_id(EVENT_TYPE_FIELD) {
            let cached = cache.normalize(event_type);
            let value_id = value_dictionary.get_id(&cached.normalized);
            out.fields.push((
                field_id,
                EncodedValue::Text {
                    value_id,
                    raw: cached.raw,
                    normalized: cached.normalized,
                },
            ));
        }
    }
    out.path = path;
    // Stable sort so that an attribute named literally "A.B" wins over a
    // nested {A:{B:..}} duplicate, and EVENT_TYPE from attributes wins over
    // the envelope field
    out.fields.sort_by_key(|(id, _)| *id);
    out.fields.dedup_by_key(|(id, _)| *id);
}

fn encode_value(
    value: &JsonValue,
    field_dictionary: &Dictionary,
    value_dictionary: &Dictionary,
    cache: &NormalizationCache,
    path: &mut String,
    out: &mut EncodedEvent,
) {
    match value {
        JsonValue::Object(map) => {
            let parent_len = path.len();
            for (key, child) in map {
                path.push('.');
                push_canonical(path, key);
                encode_value(child, field_dictionary, value_dictionary, cache, path, out);
                path.truncate(parent_len);
            }
        }
        JsonValue::String(s) => {
            if let Some(field_id) = field_dictionary.get_id(path) {
                let cached = cache.normalize(s);
                let value_id = value_dictionary.get_id(&cached.normalized);
                out.fields.push((
                    field_id,
                    EncodedValue::Text {
                        value_id,
                        raw: cached.raw,
                        normalized: cached.normalized,
                    },
                ));
            }
        }
        JsonValue::Number(n) => {
            if let Some(field_id) = field_dictionary.get_id(path) {
                if let Some(v) = n.as_f64() {
                    out.fields.push((field_id, EncodedValue::Number(v)));
                }
            }
        }
        JsonValue::Bool(b) => {
            if let Some(field_id) = field_dictionary.get_id(path) {
                out.fields.push((field_id, EncodedValue::Flag(*b)));
            }
        }
        // Null attributes behave as absent; arrays are not addressable
        JsonValue::Null | JsonValue::Array(_) => {}
    }
}

/// Append the canonical form of one key segment: upper-cased ASCII, `-`
/// folded to `_`.
fn push_canonical(path: &mut String, segment: &str) {
    for c in segment.chars() {
        match c {
            '-' => path.push('_'),
            c => path.push(c.to_ascii_uppercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizationConfig;
    use serde_json::json;

    fn setup() -> (Dictionary, Dictionary, NormalizationCache) {
        let mut fields = Dictionary::new();
        fields.encode("STATUS");
        fields.encode("AMOUNT");
        fields.encode("USER.COUNTRY");
        fields.encode("EVENT_TYPE");
        let mut values = Dictionary::new();
        values.encode("ACTIVE");
        values.encode("US");
        let cache = NormalizationCache::new(&NormalizationConfig::default());
        (fields, values, cache)
    }

    fn encode(event: &Event) -> (EncodedEvent, Dictionary) {
        let (fields, values, cache) = setup();
        let mut out = EncodedEvent::new();
        encode_into(event, &fields, &values, &cache, &mut out);
        (out, fields)
    }

    #[test]
    fn test_flattens_nested_attributes() {
        let event = Event::new("e1").with_attribute("user", json!({"country": "us"}));
        let (encoded, fields) = encode(&event);
        let id = fields.get_id("USER.COUNTRY").unwrap();
        match encoded.get(id) {
            Some(EncodedValue::Text {
                value_id,
                normalized,
                ..
            }) => {
                assert_eq!(&**normalized, "US");
                assert!(value_id.is_some());
            }
            other => panic!("expected text value, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let event = Event::new("e1")
            .with_attribute("status", "active")
            .with_attribute("never_seen", "x");
        let (encoded, _) = encode(&event);
        assert_eq!(encoded.len(), 1);
    }

    #[test]
    fn test_value_outside_dictionary_has_no_id() {
        let event = Event::new("e1").with_attribute("status", "dormant");
        let (encoded, fields) = encode(&event);
        let id = fields.get_id("STATUS").unwrap();
        match encoded.get(id) {
            Some(EncodedValue::Text { value_id, raw, .. }) => {
                assert_eq!(*value_id, None);
                assert_eq!(&**raw, "dormant");
            }
            other => panic!("expected text value, got {other:?}"),
        }
    }

    #[test]
    fn test_numbers_and_bools_pass_through() {
        let event = Event::new("e1").with_attribute("amount", 42);
        let (encoded, fields) = encode(&event);
        let id = fields.get_id("AMOUNT").unwrap();
        assert!(matches!(encoded.get(id), Some(EncodedValue::Number(v)) if *v == 42.0));
    }

    #[test]
    fn test_null_and_arrays_are_skipped() {
        let event = Event::new("e1")
            .with_attribute("status", JsonValue::Null)
            .with_attribute("amount", json!([1, 2]));
        let (encoded, _) = encode(&event);
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_event_type_is_encoded_when_referenced() {
        let event = Event::new("e1").with_type("payment");
        let (encoded, fields) = encode(&event);
        let id = fields.get_id("EVENT_TYPE").unwrap();
        match encoded.get(id) {
            Some(EncodedValue::Text { normalized, .. }) => assert_eq!(&**normalized, "PAYMENT"),
            other => panic!("expected text value, got {other:?}"),
        }
    }

    #[test]
    fn test_key_canonicalization() {
        let event = Event::new("e1").with_attribute("Status", "active");
        let (encoded, _) = encode(&event);
        assert_eq!(encoded.len(), 1);
    }

    #[test]
    fn test_clear_retains_nothing_visible() {
        let event = Event::new("e1").with_attribute("status", "active");
        let (mut encoded, _) = encode(&event);
        encoded.clear();
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_event_json_round_trip() {
        let json = r#"{"event_id":"e9","event_type":"txn","attributes":{"amount":5}}"#;
        let event = Event::from_json(json).unwrap();
        assert_eq!(event.event_id, "e9");
        assert_eq!(event.event_type.as_deref(), Some("txn"));
        let back = serde_json::to_string(&event).unwrap();
        let again = Event::from_json(&back).unwrap();
        assert_eq!(again.attributes, event.attributes);
    }
}
