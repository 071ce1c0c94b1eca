use serde_json::Value;

use crate::error::{CheckpointError, Result};

/// Pluggable codec for the stored checkpoint and metadata blobs.
///
/// Savers hold the serializer behind a trait object, so implementations work
/// on `serde_json::Value` rather than generic types.
pub trait Serializer: Send + Sync {
    /// Serialize a value to bytes.
    fn dumps(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserialize bytes back into a value.
    fn loads(&self, data: &[u8]) -> Result<Value>;
}

/// The primary JSON codec.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn dumps(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CheckpointError::Decode(format!("encode json: {e}")))
    }

    fn loads(&self, data: &[u8]) -> Result<Value> {
        serde_json::from_slice(data)
            .map_err(|e| CheckpointError::Decode(format!("decode json: {e}")))
    }
}

/// JSON codec with a fallback for legacy binary-pickle payloads.
///
/// Stores written before the JSON codec became the default contain pickled
/// blobs. Those are recognizable by their byte signature (leading `0x80`,
/// trailing `0x2E`) and are routed through a pickle decoder; everything else
/// takes the primary JSON path. Writes always use the primary codec.
#[derive(Debug, Clone, Default)]
pub struct CompatSerializer {
    inner: JsonSerializer,
}

impl CompatSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_legacy(data: &[u8]) -> bool {
        data.first() == Some(&0x80) && data.last() == Some(&0x2e)
    }
}

impl Serializer for CompatSerializer {
    fn dumps(&self, value: &Value) -> Result<Vec<u8>> {
        self.inner.dumps(value)
    }

    fn loads(&self, data: &[u8]) -> Result<Value> {
        if Self::is_legacy(data) {
            return serde_pickle::from_slice(data, serde_pickle::DeOptions::new())
                .map_err(|e| CheckpointError::Decode(format!("decode legacy payload: {e}")));
        }
        self.inner.loads(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_roundtrip() {
        let serde = JsonSerializer::new();
        let value = json!({"key": "value", "n": 42, "nested": {"a": [1, 2]}});
        let bytes = serde.dumps(&value).unwrap();
        assert_eq!(serde.loads(&bytes).unwrap(), value);
    }

    #[test]
    fn json_decode_failure_is_decode_error() {
        let serde = JsonSerializer::new();
        assert!(matches!(
            serde.loads(b"not json"),
            Err(CheckpointError::Decode(_))
        ));
    }

    #[test]
    fn compat_decodes_legacy_payload() {
        let value = json!({"key": "value", "step": 3});
        let pickled = serde_pickle::to_vec(&value, serde_pickle::SerOptions::new()).unwrap();
        assert_eq!(pickled.first(), Some(&0x80));
        assert_eq!(pickled.last(), Some(&0x2e));

        let serde = CompatSerializer::new();
        assert_eq!(serde.loads(&pickled).unwrap(), value);
    }

    #[test]
    fn compat_primary_payload_skips_legacy_path() {
        let serde = CompatSerializer::new();
        let value = json!({"key": "value"});
        let bytes = serde.dumps(&value).unwrap();
        assert!(!CompatSerializer::is_legacy(&bytes));
        assert_eq!(serde.loads(&bytes).unwrap(), value);
    }

    #[test]
    fn compat_writes_primary_format() {
        let serde = CompatSerializer::new();
        let bytes = serde.dumps(&json!([1, 2, 3])).unwrap();
        assert_eq!(bytes, b"[1,2,3]");
    }

    #[test]
    fn compat_corrupt_legacy_payload_is_decode_error() {
        let serde = CompatSerializer::new();
        // Correct signature, garbage in between.
        let bytes = [0x80, 0xff, 0xff, 0x2e];
        assert!(matches!(
            serde.loads(&bytes),
            Err(CheckpointError::Decode(_))
        ));
    }
}
