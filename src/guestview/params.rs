//! Key/value parameter bags handed over by an embedder at guest creation and attachment.
//!
//! Text values are kept as raw bytes: the embedder is untrusted, and the partition
//! identifier in particular must be validated before it is used.

use std::collections::BTreeMap;
use std::str::Utf8Error;

/// Storage partition identifier (`persist:`-prefixed or bare)
pub const PARAM_PARTITION_ID: &str = "partitionId";
/// Display (frame) name of the guest
pub const PARAM_NAME: &str = "name";
/// User agent override string
pub const PARAM_USER_AGENT_OVERRIDE: &str = "userAgentOverride";
/// Whether the guest background may be transparent
pub const PARAM_ALLOW_TRANSPARENCY: &str = "allowTransparency";
/// Initial navigation target
pub const PARAM_SRC: &str = "src";
/// Instance id of the view element inside the embedder
pub const PARAM_INSTANCE_ID: &str = "instanceId";

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(Vec<u8>),
    Bool(bool),
    Integer(i64),
    Double(f64),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.as_bytes().to_vec())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s.into_bytes())
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Integer(i)
    }
}

impl From<f64> for ParamValue {
    fn from(d: f64) -> Self {
        ParamValue::Double(d)
    }
}

/// Parameter bag used for both the creation and the attach contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBag {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts raw text bytes without validating them
    pub fn with_bytes(mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.values.insert(key.into(), ParamValue::Text(bytes.into()));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Returns a bag with the values of `self`, overridden by those of `other`.
    pub fn merged(&self, other: &ParamBag) -> ParamBag {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        ParamBag { values }
    }

    /// Returns the text value for `key`. Non-text values are treated as absent,
    /// text that is not valid UTF-8 is reported as an error.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>, Utf8Error> {
        match self.values.get(key) {
            Some(ParamValue::Text(bytes)) => std::str::from_utf8(bytes).map(Some),
            _ => Ok(None),
        }
    }

    /// Like [`get_str`](Self::get_str), but invalid text is treated as absent.
    pub fn get_valid_str(&self, key: &str) -> Option<&str> {
        match self.get_str(key) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Ignoring parameter '{}': {}", key, e);
                None
            }
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ParamValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ParamValue::Integer(i)) => Some(*i),
            Some(ParamValue::Double(d)) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    /// Builds a bag from a JSON object. Nested values (arrays, objects) and nulls are
    /// skipped.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;

        let mut bag = ParamBag::new();
        for (k, v) in obj {
            match v {
                serde_json::Value::String(s) => bag.insert(k.clone(), s.as_str()),
                serde_json::Value::Bool(b) => bag.insert(k.clone(), *b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        bag.insert(k.clone(), i);
                    } else if let Some(d) = n.as_f64() {
                        bag.insert(k.clone(), d);
                    }
                }
                _ => {}
            }
        }

        Some(bag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_getters() {
        let bag = ParamBag::new()
            .with(PARAM_NAME, "frame")
            .with(PARAM_ALLOW_TRANSPARENCY, true)
            .with(PARAM_INSTANCE_ID, 7i64);

        assert_eq!(bag.get_str(PARAM_NAME).unwrap(), Some("frame"));
        assert_eq!(bag.get_bool(PARAM_ALLOW_TRANSPARENCY), Some(true));
        assert_eq!(bag.get_int(PARAM_INSTANCE_ID), Some(7));

        // wrong types read as absent
        assert_eq!(bag.get_bool(PARAM_NAME), None);
        assert_eq!(bag.get_str(PARAM_ALLOW_TRANSPARENCY).unwrap(), None);
        assert_eq!(bag.get_str(PARAM_SRC).unwrap(), None);
    }

    #[test]
    fn merged_prefers_other() {
        let creation = ParamBag::new().with(PARAM_NAME, "first").with(PARAM_SRC, "https://example.test/");
        let attach = ParamBag::new().with(PARAM_NAME, "second");

        let merged = creation.merged(&attach);
        assert_eq!(merged.get_str(PARAM_NAME).unwrap(), Some("second"));
        assert_eq!(merged.get_str(PARAM_SRC).unwrap(), Some("https://example.test/"));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let bag = ParamBag::new().with_bytes(PARAM_PARTITION_ID, vec![0x66, 0xff, 0xfe]);
        assert!(bag.get_str(PARAM_PARTITION_ID).is_err());
        assert_eq!(bag.get_valid_str(PARAM_PARTITION_ID), None);
    }

    #[test]
    fn from_json_object() {
        let bag = ParamBag::from_json(&json!({
            "partitionId": "persist:work",
            "allowTransparency": false,
            "instanceId": 3,
            "nested": { "skip": true },
        }))
        .unwrap();

        assert_eq!(bag.get_str(PARAM_PARTITION_ID).unwrap(), Some("persist:work"));
        assert_eq!(bag.get_bool(PARAM_ALLOW_TRANSPARENCY), Some(false));
        assert_eq!(bag.get_int(PARAM_INSTANCE_ID), Some(3));
        assert!(!bag.contains("nested"));

        assert!(ParamBag::from_json(&json!("not an object")).is_none());
    }
}
