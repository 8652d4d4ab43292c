//! Capability descriptors for desired browser sessions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An immutable key/value descriptor of a desired session.
///
/// Keys are strings, values arbitrary JSON (browser name, version, platform,
/// vendor-prefixed extensions). Equality is structural; whether one
/// descriptor *satisfies* another is never decided here - that is delegated
/// to the matching predicate of the driver advertising the slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    /// Creates an empty descriptor.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builds a descriptor from any JSON value; non-objects yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned().map(Self)
    }

    /// Extracts the first capability set from a new-session payload.
    ///
    /// W3C payloads (`capabilities.alwaysMatch` merged with the first
    /// `firstMatch` entry) are preferred; legacy `desiredCapabilities`
    /// payloads are accepted as a fallback. Returns `None` when neither
    /// shape is present.
    pub fn from_new_session_payload(payload: &Value) -> Option<Self> {
        if let Some(caps) = payload.get("capabilities") {
            let mut merged = caps
                .get("alwaysMatch")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if let Some(first) = caps
                .get("firstMatch")
                .and_then(Value::as_array)
                .and_then(|entries| entries.first())
                .and_then(Value::as_object)
            {
                for (key, value) in first {
                    merged.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            if !merged.is_empty() {
                return Some(Self(merged));
            }
        }

        payload
            .get("desiredCapabilities")
            .and_then(Value::as_object)
            .cloned()
            .map(Self)
    }

    /// Looks up a single capability value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `browserName` capability, when present and a string.
    pub fn browser_name(&self) -> Option<&str> {
        self.get("browserName").and_then(Value::as_str)
    }

    /// The `platformName` capability, when present and a string.
    pub fn platform_name(&self) -> Option<&str> {
        self.get("platformName").and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn w3c_payload_merges_always_match_with_first_match() {
        let payload = json!({
            "capabilities": {
                "alwaysMatch": {"browserName": "firefox"},
                "firstMatch": [{"platformName": "linux", "browserName": "chrome"}]
            }
        });

        let caps = Capabilities::from_new_session_payload(&payload).unwrap();
        // alwaysMatch wins over firstMatch on conflicting keys.
        assert_eq!(caps.browser_name(), Some("firefox"));
        assert_eq!(caps.platform_name(), Some("linux"));
    }

    #[test]
    fn legacy_payload_falls_back_to_desired_capabilities() {
        let payload = json!({"desiredCapabilities": {"browserName": "chrome"}});
        let caps = Capabilities::from_new_session_payload(&payload).unwrap();
        assert_eq!(caps.browser_name(), Some("chrome"));
    }

    #[test]
    fn undecodable_payload_yields_none() {
        assert!(Capabilities::from_new_session_payload(&json!({"foo": 1})).is_none());
        assert!(Capabilities::from_new_session_payload(&json!("nonsense")).is_none());
    }
}
