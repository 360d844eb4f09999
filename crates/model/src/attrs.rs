use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An ordered map of UTF-8 string keys to string values.
///
/// Attribute sets carry object user metadata, per-extent codec attributes
/// and layout modifiers. They serialize as a flat JSON object.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct AttrSet(BTreeMap<String, String>);

impl AttrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` into `self`. Entries of `other` win on conflict.
    pub fn merge(&mut self, other: &AttrSet) {
        for (k, v) in other.iter() {
            self.0.insert(k.to_string(), v.to_string());
        }
    }

    /// Render as a canonical JSON object string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).expect("string map always serializes")
    }

    /// Parse from a JSON object string.
    pub fn from_json(s: &str) -> crate::Result<Self> {
        serde_json::from_str(s)
            .map_err(|err| crate::Error::InvalidInput(format!("malformed attribute set: {err}")))
    }
}

impl FromIterator<(String, String)> for AttrSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::AttrSet;

    #[test]
    fn test_merge_and_order() {
        let mut base: AttrSet = [("b", "2"), ("a", "1")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let over: AttrSet = [("b", "9"), ("c", "3")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        base.merge(&over);

        let entries: Vec<_> = base.iter().collect();
        assert_eq!(entries, vec![("a", "1"), ("b", "9"), ("c", "3")]);
    }

    #[test]
    fn test_json_round_trip() {
        let attrs: AttrSet = [("user.tier", "cold"), ("user.owner", "alice")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let json = attrs.to_json();
        assert_eq!(json, r#"{"user.owner":"alice","user.tier":"cold"}"#);
        assert_eq!(AttrSet::from_json(&json).unwrap(), attrs);
    }

    #[test]
    fn test_malformed_json() {
        assert!(AttrSet::from_json("not json").is_err());
    }
}
