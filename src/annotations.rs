//! The three-bucket annotations structure accepted by the high-level
//! push/attach API (§3): annotations destined for the manifest itself, for
//! its config, and per-file annotations keyed by file name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The JSON key under which manifest-level annotations are nested when
/// serializing/deserializing the flat wire form.
const MANIFEST_KEY: &str = "$manifest";

/// The JSON key under which config-level annotations are nested.
const CONFIG_KEY: &str = "$config";

/// Annotations destined for a manifest, its config, and its per-file
/// layers, bundled the way a caller hands them to `PushArtifact`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    /// Annotations attached to the manifest.
    pub manifest: HashMap<String, String>,
    /// Annotations attached to the config descriptor.
    pub config: HashMap<String, String>,
    /// Annotations attached to each named file's layer descriptor, keyed by
    /// file name.
    pub files: HashMap<String, HashMap<String, String>>,
}

impl Annotations {
    /// An empty annotation set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the flat wire JSON form: a single object whose `$manifest`
    /// and `$config` keys (when present) hold their respective maps, and
    /// every other top-level key names a per-file annotation set.
    pub fn from_json(value: &serde_json::Value) -> crate::error::Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| crate::error::Error::parse("annotations JSON must be an object"))?;

        let mut annotations = Annotations::new();
        for (key, value) in object {
            let map: HashMap<String, String> = serde_json::from_value(value.clone())?;
            match key.as_str() {
                MANIFEST_KEY => annotations.manifest = map,
                CONFIG_KEY => annotations.config = map,
                file => {
                    annotations.files.insert(file.to_string(), map);
                }
            }
        }
        Ok(annotations)
    }

    /// Serializes to the flat wire JSON form described in [`from_json`](Self::from_json).
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if !self.manifest.is_empty() {
            object.insert(MANIFEST_KEY.to_string(), serde_json::json!(self.manifest));
        }
        if !self.config.is_empty() {
            object.insert(CONFIG_KEY.to_string(), serde_json::json!(self.config));
        }
        for (file, map) in &self.files {
            object.insert(file.clone(), serde_json::json!(map));
        }
        serde_json::Value::Object(object)
    }
}

impl Serialize for Annotations {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Annotations {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Annotations::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut annotations = Annotations::new();
        annotations
            .manifest
            .insert("org.opencontainers.image.version".into(), "1.0".into());
        annotations
            .config
            .insert("org.opencontainers.image.created".into(), "2024-01-01T00:00:00Z".into());
        let mut file_annotations = HashMap::new();
        file_annotations.insert("org.opencontainers.image.title".into(), "rootfs.tar".into());
        annotations.files.insert("rootfs.tar".into(), file_annotations);

        let json = annotations.to_json();
        let reparsed = Annotations::from_json(&json).unwrap();
        assert_eq!(annotations, reparsed);
    }

    #[test]
    fn empty_annotations_round_trip_to_empty_object() {
        let annotations = Annotations::new();
        let json = annotations.to_json();
        assert_eq!(json, serde_json::json!({}));
        assert_eq!(Annotations::from_json(&json).unwrap(), annotations);
    }

    #[test]
    fn reserved_keys_are_not_treated_as_file_names() {
        let json = serde_json::json!({
            "$manifest": {"a": "b"},
            "$config": {"c": "d"},
            "file.tar": {"e": "f"},
        });
        let annotations = Annotations::from_json(&json).unwrap();
        assert_eq!(annotations.manifest.get("a"), Some(&"b".to_string()));
        assert_eq!(annotations.config.get("c"), Some(&"d".to_string()));
        assert!(annotations.files.contains_key("file.tar"));
        assert!(!annotations.files.contains_key("$manifest"));
    }
}
