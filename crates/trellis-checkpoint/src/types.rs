use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};

/// Exact-match filter over metadata documents: every key/value pair must
/// match the stored document.
pub type MetadataFilter = Map<String, Value>;

/// A snapshot of graph execution state at one point in a thread's lineage.
///
/// The `id` is the version key: globally unique per thread and lexically
/// sortable, so "latest" and "before" queries are plain string comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Version key, typically derived from the creation timestamp.
    pub id: String,
    /// When the checkpoint was taken.
    pub ts: DateTime<Utc>,
    /// Snapshot of all channel values (key → serialized channel state).
    #[serde(default)]
    pub channel_values: HashMap<String, Value>,
}

impl Checkpoint {
    /// Create an empty checkpoint with a timestamp-derived id.
    pub fn new() -> Self {
        let ts = Utc::now();
        Self {
            id: ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            ts,
            channel_values: HashMap::new(),
        }
    }

    pub fn with_values(mut self, channel_values: HashMap<String, Value>) -> Self {
        self.channel_values = channel_values;
        self
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Semi-structured metadata attached to a checkpoint.
///
/// The well-known fields describe how the checkpoint was produced; arbitrary
/// additional keys live in `extra` and serialize flat alongside them, so any
/// key is reachable by a metadata filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Where the checkpoint came from: "input", "loop", "update", ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The execution step counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    /// Log of the writes that produced this checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writes: Option<Value>,
    /// Any further key/value pairs.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CheckpointMetadata {
    pub fn new(source: impl Into<String>, step: i64) -> Self {
        Self {
            source: Some(source.into()),
            step: Some(step),
            ..Self::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The metadata as a flat JSON document, the form filters match against.
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(CheckpointError::Decode(
                "metadata did not serialize to an object".into(),
            )),
            Err(e) => Err(CheckpointError::Decode(format!("encode metadata: {e}"))),
        }
    }
}

/// The logical read result: a checkpoint with its locator, metadata, and
/// lineage pointer.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Locator of this checkpoint.
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    /// Empty document when the row stored no metadata.
    pub metadata: CheckpointMetadata,
    /// Locator of the parent checkpoint, absent for lineage roots.
    pub parent_config: Option<CheckpointConfig>,
}
