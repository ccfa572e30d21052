//! The referrers entity: the set of manifests whose `subject` points at a
//! given digest, as returned by the registry referrers API or computed by
//! scanning a layout.

use oci_spec::image::{Descriptor, MediaType};
use serde::{Deserialize, Serialize};

/// A referrers response (`mediaType` is always the OCI index type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referrers {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    media_type: MediaType,
    manifests: Vec<Descriptor>,
}

impl Referrers {
    /// Wraps a set of referrer descriptors in the standard index shape.
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MediaType::ImageIndex,
            manifests,
        }
    }

    /// The referrer descriptors.
    pub fn manifests(&self) -> &[Descriptor] {
        &self.manifests
    }

    /// Filters this response down to referrers whose `artifactType` equals
    /// `artifact_type`, as the registry API does server-side when the query
    /// parameter is given (§4.3.1).
    pub fn filter_by_artifact_type(&self, artifact_type: &str) -> Self {
        let manifests = self
            .manifests
            .iter()
            .filter(|d| {
                d.artifact_type()
                    .as_ref()
                    .map(|t| t.to_string() == artifact_type)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Self::new(manifests)
    }
}
