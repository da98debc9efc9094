use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single log entry flowing through the engine.
///
/// This is the canonical representation of an entry throughout the pipeline,
/// from producer input through batching, transport, and persistence. Entries
/// are immutable once created; the writer injects `timestamp`/`service` into
/// a copy at persistence time, never into the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogEntry {
    /// Free-form message, persisted as a timestamp-prefixed plain line
    Text(String),
    /// Key/value record, persisted as a single JSON object line
    Structured(Map<String, Value>),
}

impl LogEntry {
    pub fn text(message: impl Into<String>) -> Self {
        LogEntry::Text(message.into())
    }

    pub fn structured(fields: Map<String, Value>) -> Self {
        LogEntry::Structured(fields)
    }

    /// Build a structured entry from key/value pairs.
    pub fn structured_from<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        LogEntry::Structured(fields)
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, LogEntry::Structured(_))
    }
}

impl From<&str> for LogEntry {
    fn from(message: &str) -> Self {
        LogEntry::Text(message.to_string())
    }
}

impl From<String> for LogEntry {
    fn from(message: String) -> Self {
        LogEntry::Text(message)
    }
}
