use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A JSON payload carried by workflows and steps
///
/// Wraps a JSON value with helpers for the merge semantics the engine
/// needs when inheriting request params and folding in ancestor step
/// response data.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct StepPayload {
    /// The inner JSON value
    pub value: serde_json::Value,
}

impl StepPayload {
    /// Create a new payload from a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Create an empty object payload
    #[inline]
    pub fn empty() -> Self {
        Self {
            value: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a null payload
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Check if the payload is null or an empty object
    #[inline]
    pub fn is_empty(&self) -> bool {
        match &self.value {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Look up a top-level field
    #[inline]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.value.get(key)
    }

    /// Look up a top-level field as a string
    #[inline]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Set a top-level field, converting a non-object payload into an object first
    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        if !self.value.is_object() {
            self.value = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.value.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    /// Shallow-merge another payload into this one
    ///
    /// Keys from `other` win over existing keys. Non-object values in
    /// either payload are ignored: merge only has meaning for objects.
    pub fn merge(&mut self, other: &StepPayload) {
        let Some(incoming) = other.value.as_object() else {
            return;
        };
        if !self.value.is_object() {
            self.value = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.value.as_object_mut() {
            for (k, v) in incoming {
                map.insert(k.clone(), v.clone());
            }
        }
    }

    /// Return a copy of this payload with `other` merged on top
    pub fn merged_with(&self, other: &StepPayload) -> StepPayload {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Try to convert the payload to a specific type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create a payload from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }
}

impl From<serde_json::Value> for StepPayload {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_creation() {
        let payload = StepPayload::new(json!({"tokenId": 7}));
        assert_eq!(payload.as_value()["tokenId"], 7);
        assert!(!payload.is_empty());
        assert!(StepPayload::empty().is_empty());
        assert!(StepPayload::null().is_empty());
    }

    #[test]
    fn test_get_and_set() {
        let mut payload = StepPayload::empty();
        payload.set("address", json!("0xabc"));
        assert_eq!(payload.get_str("address"), Some("0xabc"));
        assert!(payload.get("missing").is_none());
    }

    #[test]
    fn test_set_on_non_object_replaces_value() {
        let mut payload = StepPayload::new(json!("scalar"));
        payload.set("a", json!(1));
        assert_eq!(payload.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_merge_incoming_wins() {
        let mut base = StepPayload::new(json!({"a": 1, "b": 2}));
        let incoming = StepPayload::new(json!({"b": 3, "c": 4}));
        base.merge(&incoming);
        assert_eq!(base.as_value(), &json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_ignores_non_objects() {
        let mut base = StepPayload::new(json!({"a": 1}));
        base.merge(&StepPayload::new(json!("not an object")));
        assert_eq!(base.as_value(), &json!({"a": 1}));
    }

    #[test]
    fn test_merged_with_leaves_original_untouched() {
        let base = StepPayload::new(json!({"a": 1}));
        let merged = base.merged_with(&StepPayload::new(json!({"b": 2})));
        assert_eq!(base.as_value(), &json!({"a": 1}));
        assert_eq!(merged.as_value(), &json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Params {
            chain_id: u64,
        }

        let payload = StepPayload::from(&Params { chain_id: 200 }).unwrap();
        let parsed: Params = payload.to().unwrap();
        assert_eq!(parsed, Params { chain_id: 200 });
    }
}
