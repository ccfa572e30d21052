//! The index entity, wrapping [`oci_spec::image::ImageIndex`] with the same
//! original-JSON preservation as [`super::manifest::Manifest`].

use crate::digest::{Algorithm, Digest};
use crate::error::Result;
use bytes::Bytes;
use oci_spec::image::{Descriptor, ImageIndex, MediaType};

/// An OCI image index: a manifest-of-manifests for multi-platform or
/// fan-out artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    inner: ImageIndex,
    raw: Bytes,
}

impl Index {
    /// Builds an index from an in-memory [`ImageIndex`], serializing it to
    /// become its own `raw` bytes.
    pub fn new(inner: ImageIndex) -> Result<Self> {
        let raw = Bytes::from(serde_json::to_vec(&inner)?);
        Ok(Self { inner, raw })
    }

    /// Builds an index wrapping a single manifest descriptor — the shape
    /// produced when copying a single manifest into a layout (§4.4.3).
    pub fn from_manifests(manifests: Vec<Descriptor>) -> Result<Self> {
        use oci_spec::image::ImageIndexBuilder;
        let inner = ImageIndexBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageIndex)
            .manifests(manifests)
            .build()?;
        Self::new(inner)
    }

    /// Parses `bytes` as an index, retaining them verbatim as `raw`.
    pub fn from_json(bytes: impl Into<Bytes>) -> Result<Self> {
        let raw = bytes.into();
        let inner: ImageIndex = serde_json::from_slice(&raw)?;
        Ok(Self { inner, raw })
    }

    /// The exact JSON bytes this index was parsed from or last serialized to.
    pub fn to_json(&self) -> &[u8] {
        &self.raw
    }

    /// The typed index body.
    pub fn inner(&self) -> &ImageIndex {
        &self.inner
    }

    /// The referenced manifest/index descriptors.
    pub fn manifests(&self) -> &[Descriptor] {
        self.inner.manifests()
    }

    /// The index's declared media type, defaulting to the OCI index type
    /// when unset on the wire.
    pub fn media_type(&self) -> MediaType {
        self.inner
            .media_type()
            .clone()
            .unwrap_or(MediaType::ImageIndex)
    }

    /// Removes every descriptor for which `predicate` returns `true`,
    /// re-serializing `raw`. Used to filter nested indices out of a
    /// non-recursive index copy (§4.5).
    pub fn retain(&mut self, mut predicate: impl FnMut(&Descriptor) -> bool) -> Result<()> {
        let filtered: Vec<Descriptor> = self.inner.manifests().iter().filter(|d| predicate(d)).cloned().collect();
        self.inner.set_manifests(filtered);
        self.raw = Bytes::from(serde_json::to_vec(&self.inner)?);
        Ok(())
    }

    /// Computes this index's digest by hashing `raw` with `algorithm`.
    pub fn digest(&self, algorithm: Algorithm) -> Digest {
        algorithm.digest(&self.raw)
    }
}

/// Returns `true` iff `media_type` names one of the two registered index
/// media types (§4.3.5).
pub fn is_index_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        "application/vnd.oci.image.index.v1+json"
            | "application/vnd.docker.distribution.manifest.list.v2+json"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::image::Descriptor;

    fn desc(digest: &str) -> Descriptor {
        Descriptor::new(MediaType::ImageManifest, 100, digest.parse::<oci_spec::image::Digest>().unwrap())
    }

    #[test]
    fn from_json_preserves_raw_bytes() {
        let idx = Index::from_manifests(vec![desc(
            "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        )])
        .unwrap();
        let raw = idx.to_json().to_vec();
        let reparsed = Index::from_json(raw.clone()).unwrap();
        assert_eq!(reparsed.to_json(), raw.as_slice());
    }

    #[test]
    fn retain_filters_out_nested_indices_and_reserializes() {
        let manifest_desc = Descriptor::new(
            MediaType::ImageManifest,
            100,
            "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
                .parse::<oci_spec::image::Digest>()
                .unwrap(),
        );
        let index_desc = Descriptor::new(
            MediaType::ImageIndex,
            200,
            "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
                .parse::<oci_spec::image::Digest>()
                .unwrap(),
        );
        let mut idx = Index::from_manifests(vec![manifest_desc.clone(), index_desc]).unwrap();
        let before = idx.to_json().to_vec();

        idx.retain(|d| *d.media_type() != MediaType::ImageIndex).unwrap();

        assert_eq!(idx.manifests(), &[manifest_desc]);
        assert_ne!(idx.to_json(), before.as_slice());
    }

    #[test]
    fn recognizes_both_registered_index_media_types() {
        assert!(is_index_media_type("application/vnd.oci.image.index.v1+json"));
        assert!(is_index_media_type(
            "application/vnd.docker.distribution.manifest.list.v2+json"
        ));
        assert!(!is_index_media_type("application/vnd.oci.image.manifest.v1+json"));
    }
}
