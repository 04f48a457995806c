//! Voice-agent webhook payload types.
//!
//! The platform delivers a signed envelope `{type, event_timestamp, data}`.
//! For post-call events `data` describes one conversation. Parsing is lenient
//! per field: a field with an unexpected shape reads as empty while its
//! siblings are kept, so one odd value never costs the conversation id.
//!
//! Data collection results arrive as a JSON object whose key order matters
//! to the extractor (first match wins), so they are held in [`KeyedResults`],
//! an insertion-ordered list of `(key, value)` pairs.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::CallOutcome;

/// Signed webhook envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub event_timestamp: Option<i64>,
    #[serde(default)]
    pub data: JsonValue,
}

impl WebhookEvent {
    /// Event timestamp as a UTC datetime, if present and in range.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.event_timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }
}

/// Ordered `key -> value` map that preserves the order keys were received in.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedResults<T>(Vec<(String, T)>);

impl<T> Default for KeyedResults<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> KeyedResults<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Duplicate keys keep their first position.
    pub fn push(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        if !self.0.iter().any(|(k, _)| *k == key) {
            self.0.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for KeyedResults<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (k, v) in iter {
            out.push(k, v);
        }
        out
    }
}

impl<T: Serialize> Serialize for KeyedResults<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct KeyedResultsVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for KeyedResultsVisitor<T> {
    type Value = KeyedResults<T>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of keyed results")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut out = KeyedResults::new();
        while let Some((key, value)) = access.next_entry::<String, T>()? {
            out.push(key, value);
        }
        Ok(out)
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(KeyedResults::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for KeyedResults<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(KeyedResultsVisitor(PhantomData))
    }
}

/// One data collection result: the agent's answer for a configured field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCollectionEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rationale: Option<String>,
}

impl DataCollectionEntry {
    pub fn new(value: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            rationale: Some(rationale.into()),
        }
    }

    /// Trimmed, non-empty value.
    pub fn text(&self) -> Option<&str> {
        self.value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Data collection results in delivery order.
pub type DataCollection = KeyedResults<DataCollectionEntry>;

/// One evaluation criterion outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub result: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rationale: Option<String>,
}

/// Platform's post-call analysis block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    #[serde(default)]
    pub call_successful: Option<JsonValue>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transcript_summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub data_collection_results: DataCollection,
    #[serde(default, deserialize_with = "lenient")]
    pub evaluation_criteria_results: KeyedResults<EvaluationResult>,
}

impl ConversationAnalysis {
    /// Tri-state call outcome. Accepts booleans and the platform's
    /// `"success" | "failure" | "unknown"` strings.
    pub fn outcome(&self) -> CallOutcome {
        match &self.call_successful {
            Some(JsonValue::Bool(true)) => CallOutcome::Succeeded,
            Some(JsonValue::Bool(false)) => CallOutcome::Failed,
            Some(JsonValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "success" | "successful" | "succeeded" | "true" => CallOutcome::Succeeded,
                "failure" | "failed" | "false" => CallOutcome::Failed,
                _ => CallOutcome::Unknown,
            },
            _ => CallOutcome::Unknown,
        }
    }
}

/// Call metadata supplied by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub start_time_unix_secs: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub call_duration_secs: Option<f64>,
}

/// One transcript turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptTurn {
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
}

/// Typed view of a post-call `data` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub agent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub transcript: Vec<TranscriptTurn>,
    #[serde(default, deserialize_with = "lenient")]
    pub metadata: ConversationMetadata,
    #[serde(default, deserialize_with = "lenient")]
    pub analysis: ConversationAnalysis,
}

impl ConversationData {
    /// Parse the `data` object of an envelope. Fields with an unexpected
    /// shape read as empty; a `data` that is not an object yields an empty
    /// view.
    pub fn from_value(data: &JsonValue) -> Self {
        match serde_json::from_value::<ConversationData>(data.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "Conversation data did not match expected shape");
                Self::default()
            }
        }
    }

    /// Parse from the raw webhook body, keeping data collection key order.
    pub fn from_raw_body(raw_body: &str) -> crate::Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default, deserialize_with = "lenient")]
            data: Option<ConversationData>,
        }
        let envelope: Envelope = serde_json::from_str(raw_body)?;
        Ok(envelope.data.unwrap_or_default())
    }

    pub fn data_collection(&self) -> &DataCollection {
        &self.analysis.data_collection_results
    }

    /// Call start time, if the platform reported one.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .start_time_unix_secs
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// Whole-second call duration.
    pub fn duration_secs(&self) -> Option<i32> {
        self.metadata
            .call_duration_secs
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as i32)
    }

    pub fn summary(&self) -> Option<&str> {
        self.analysis
            .transcript_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Decode `T` when the value has the expected shape, otherwise `T::default()`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Payload field did not match expected shape");
        T::default()
    }))
}

/// Accept strings, numbers, and booleans as text; null becomes `None`.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        Some(JsonValue::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyed_results_preserve_delivery_order() {
        let raw = r#"{"zeta": {"value": "1"}, "alpha": {"value": "2"}, "mid": {"value": "3"}}"#;
        let parsed: DataCollection = serde_json::from_str(raw).unwrap();
        let keys: Vec<&str> = parsed.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_keyed_results_null_is_empty() {
        let parsed: DataCollection = serde_json::from_str("null").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_entry_accepts_numeric_value() {
        let entry: DataCollectionEntry =
            serde_json::from_value(json!({"value": 8, "rationale": "said eight"})).unwrap();
        assert_eq!(entry.text(), Some("8"));
    }

    #[test]
    fn test_entry_blank_value_has_no_text() {
        let entry = DataCollectionEntry::new("   ", "");
        assert_eq!(entry.text(), None);
    }

    #[test]
    fn test_outcome_from_bool_and_strings() {
        let mut analysis = ConversationAnalysis::default();
        assert_eq!(analysis.outcome(), CallOutcome::Unknown);

        analysis.call_successful = Some(json!(true));
        assert_eq!(analysis.outcome(), CallOutcome::Succeeded);

        analysis.call_successful = Some(json!("failure"));
        assert_eq!(analysis.outcome(), CallOutcome::Failed);

        analysis.call_successful = Some(json!("unknown"));
        assert_eq!(analysis.outcome(), CallOutcome::Unknown);
    }

    #[test]
    fn test_conversation_from_raw_body() {
        let body = r#"{
            "type": "post_call_transcription",
            "event_timestamp": 1739537297,
            "data": {
                "conversation_id": "conv_1",
                "metadata": {"start_time_unix_secs": 1739537000, "call_duration_secs": 181.6},
                "analysis": {
                    "call_successful": "success",
                    "transcript_summary": "  Patient discussed options. ",
                    "data_collection_results": {
                        "vision_impact_scale": {"value": "8", "rationale": "rated eight"}
                    }
                }
            }
        }"#;
        let data = ConversationData::from_raw_body(body).unwrap();
        assert_eq!(data.conversation_id.as_deref(), Some("conv_1"));
        assert_eq!(data.duration_secs(), Some(182));
        assert_eq!(data.summary(), Some("Patient discussed options."));
        assert_eq!(data.analysis.outcome(), CallOutcome::Succeeded);
        assert_eq!(
            data.data_collection()
                .get("vision_impact_scale")
                .and_then(|e| e.text()),
            Some("8")
        );
    }

    #[test]
    fn test_from_value_tolerates_wrong_shape() {
        let data = ConversationData::from_value(&json!({"transcript": "not a list"}));
        assert!(data.conversation_id.is_none());
        assert!(data.data_collection().is_empty());
    }

    #[test]
    fn test_mis_shaped_field_keeps_siblings() {
        let data = ConversationData::from_value(&json!({
            "conversation_id": "conv_odd",
            "transcript": "not a list",
            "metadata": {"start_time_unix_secs": "yesterday", "call_duration_secs": 90},
            "analysis": {
                "transcript_summary": "Asked about recovery.",
                "evaluation_criteria_results": ["unexpected"],
                "data_collection_results": {
                    "zeta": {"value": "1"},
                    "alpha": {"value": "2"}
                }
            }
        }));
        assert_eq!(data.conversation_id.as_deref(), Some("conv_odd"));
        assert!(data.transcript.is_empty());
        assert_eq!(data.started_at(), None);
        assert_eq!(data.duration_secs(), Some(90));
        assert_eq!(data.summary(), Some("Asked about recovery."));
        assert!(data.analysis.evaluation_criteria_results.is_empty());
        let keys: Vec<&str> = data.data_collection().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_numeric_conversation_id_is_text() {
        let data = ConversationData::from_value(&json!({"conversation_id": 4711, "analysis": 3}));
        assert_eq!(data.conversation_id.as_deref(), Some("4711"));
        assert!(data.data_collection().is_empty());
    }

    #[test]
    fn test_raw_body_with_odd_analysis_keeps_id() {
        let body = r#"{"type": "post_call_transcription",
            "data": {"conversation_id": "conv_raw", "analysis": "oops"}}"#;
        let data = ConversationData::from_raw_body(body).unwrap();
        assert_eq!(data.conversation_id.as_deref(), Some("conv_raw"));
    }

    #[test]
    fn test_envelope_occurred_at() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "type": "post_call_transcription",
            "event_timestamp": 0,
            "data": {}
        }))
        .unwrap();
        assert_eq!(event.occurred_at().map(|t| t.timestamp()), Some(0));
    }
}
