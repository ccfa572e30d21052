//! The manifest entity, wrapping [`oci_spec::image::ImageManifest`] with the
//! original-JSON-bytes preservation §9 requires.

use crate::digest::{Algorithm, Digest};
use crate::error::{Error, Result};
use bytes::Bytes;
use oci_spec::image::{Descriptor, ImageManifest, MediaType};

/// The default artifact type assigned when a manifest's `artifactType` is
/// unset and its config carries no media type of its own.
pub const DEFAULT_ARTIFACT_TYPE: &str = "application/vnd.unknown.artifact.v1";

/// An OCI image (or artifact) manifest.
///
/// Manifests fetched over the wire keep the exact bytes they were parsed
/// from (`raw`) so that re-serializing for a copy reproduces the same
/// digest (§9, invariant 5). Any mutator that changes the manifest's
/// content re-serializes `raw` from the typed value and drops the
/// server-assigned [`descriptor`](Manifest::descriptor), since a changed
/// manifest is no longer the one the server described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    inner: ImageManifest,
    raw: Bytes,
    descriptor: Option<Descriptor>,
}

impl Manifest {
    /// Builds a manifest from an in-memory [`ImageManifest`], serializing it
    /// to become its own `raw` bytes.
    pub fn new(inner: ImageManifest) -> Result<Self> {
        let raw = Bytes::from(serde_json::to_vec(&inner)?);
        Ok(Self {
            inner,
            raw,
            descriptor: None,
        })
    }

    /// Parses `bytes` as a manifest, retaining them verbatim as `raw`.
    pub fn from_json(bytes: impl Into<Bytes>) -> Result<Self> {
        let raw = bytes.into();
        let inner: ImageManifest = serde_json::from_slice(&raw)?;
        Ok(Self {
            inner,
            raw,
            descriptor: None,
        })
    }

    /// The exact JSON bytes this manifest was parsed from (or last
    /// serialized to, if constructed or mutated in memory).
    pub fn to_json(&self) -> &[u8] {
        &self.raw
    }

    /// The typed manifest body.
    pub fn inner(&self) -> &ImageManifest {
        &self.inner
    }

    /// The manifest's declared media type, defaulting to the OCI image
    /// manifest type when unset on the wire.
    pub fn media_type(&self) -> MediaType {
        self.inner
            .media_type()
            .clone()
            .unwrap_or(MediaType::ImageManifest)
    }

    /// The config descriptor.
    pub fn config(&self) -> &Descriptor {
        self.inner.config()
    }

    /// The layer descriptors, base layer first.
    pub fn layers(&self) -> &[Descriptor] {
        self.inner.layers()
    }

    /// The subject descriptor, when this manifest annotates another one via
    /// the referrers API.
    pub fn subject(&self) -> Option<&Descriptor> {
        self.inner.subject().as_ref()
    }

    /// The resolved artifact type: explicit field → config media type →
    /// [`DEFAULT_ARTIFACT_TYPE`].
    pub fn artifact_type(&self) -> MediaType {
        self.inner
            .artifact_type()
            .clone()
            .unwrap_or_else(|| self.inner.config().media_type().clone())
    }

    /// The server-assigned descriptor (digest, size, media type) attached
    /// after a successful push or fetch, if any.
    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    /// Returns a copy of this manifest with its server-assigned descriptor
    /// set. Does not touch `raw` — the descriptor is metadata about the
    /// bytes, not a mutation of them.
    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Returns a copy of this manifest with `subject` set, re-serializing
    /// `raw` and clearing any server-assigned descriptor.
    pub fn with_subject(mut self, subject: Descriptor) -> Result<Self> {
        self.inner.set_subject(Some(subject));
        self.reserialize()?;
        Ok(self)
    }

    /// Stamps `org.opencontainers.image.created` with the current UTC time
    /// if the manifest's annotations don't already carry one (§6). A no-op,
    /// leaving `raw` untouched, when the annotation is already present.
    pub fn stamp_created_if_absent(mut self) -> Result<Self> {
        let mut annotations = self.inner.annotations().clone().unwrap_or_default();
        if !annotations.contains_key(oci_spec::image::ANNOTATION_CREATED) {
            annotations.insert(
                oci_spec::image::ANNOTATION_CREATED.to_string(),
                chrono::Utc::now().to_rfc3339(),
            );
            self.inner.set_annotations(Some(annotations));
            self.reserialize()?;
        }
        Ok(self)
    }

    /// Computes this manifest's digest by hashing `raw` with `algorithm`.
    pub fn digest(&self, algorithm: Algorithm) -> Digest {
        algorithm.digest(&self.raw)
    }

    fn reserialize(&mut self) -> Result<()> {
        self.raw = Bytes::from(serde_json::to_vec(&self.inner)?);
        self.descriptor = None;
        Ok(())
    }
}

/// Builds the canonical empty config descriptor+body (§3, §8 scenario 3):
/// media type `application/vnd.oci.empty.v1+json`, body `"{}"`.
pub fn empty_config() -> (Descriptor, Bytes) {
    let data = Bytes::from_static(b"{}");
    let digest = Algorithm::Sha256.digest(&data);
    let descriptor = Descriptor::new(MediaType::Other("application/vnd.oci.empty.v1+json".into()), data.len() as u64, digest);
    (descriptor, data)
}

/// Returns [`Error::ParseError`] if `media_type` does not name one of the
/// two registered manifest media types (§4.3.5).
pub fn is_manifest_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        "application/vnd.oci.image.manifest.v1+json"
            | "application/vnd.docker.distribution.manifest.v2+json"
    )
}

/// Parses a manifest out of `bytes`, rejecting index-typed content (§4.3.5:
/// "probably multi-platform image").
pub fn parse_manifest(bytes: impl Into<Bytes>, content_type: &str) -> Result<Manifest> {
    if !is_manifest_media_type(content_type) {
        return Err(Error::invalid_state(format!(
            "expected a manifest content type, got {content_type} (probably multi-platform image)"
        )));
    }
    Manifest::from_json(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::image::ImageManifestBuilder;

    fn sample_manifest() -> ImageManifest {
        let (config, _) = empty_config();
        ImageManifestBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageManifest)
            .config(config)
            .layers(vec![])
            .build()
            .unwrap()
    }

    #[test]
    fn from_json_preserves_raw_bytes_for_digest_stability() {
        let manifest = Manifest::new(sample_manifest()).unwrap();
        let raw = manifest.to_json().to_vec();
        let reparsed = Manifest::from_json(raw.clone()).unwrap();
        assert_eq!(reparsed.to_json(), raw.as_slice());
        assert_eq!(
            manifest.digest(Algorithm::Sha256),
            reparsed.digest(Algorithm::Sha256)
        );
    }

    #[test]
    fn with_subject_reserializes_and_drops_descriptor() {
        let manifest = Manifest::new(sample_manifest())
            .unwrap()
            .with_descriptor(Descriptor::new(MediaType::ImageManifest, 10, Algorithm::Sha256.digest(b"x")));
        assert!(manifest.descriptor().is_some());

        let (subject, _) = empty_config();
        let updated = manifest.with_subject(subject.clone()).unwrap();
        assert!(updated.descriptor().is_none());
        assert_eq!(updated.subject(), Some(&subject));
    }

    #[test]
    fn artifact_type_falls_back_to_config_media_type() {
        let manifest = Manifest::new(sample_manifest()).unwrap();
        assert_eq!(
            manifest.artifact_type(),
            MediaType::Other("application/vnd.oci.empty.v1+json".into())
        );
    }

    #[test]
    fn empty_config_matches_known_digest_and_size() {
        let (descriptor, data) = empty_config();
        assert_eq!(data.as_ref(), b"{}");
        assert_eq!(descriptor.size(), 2);
        assert_eq!(
            descriptor.digest().to_string(),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn index_media_type_is_rejected_as_manifest() {
        let err = parse_manifest(
            Bytes::from_static(b"{}"),
            "application/vnd.oci.image.index.v1+json",
        )
        .unwrap_err();
        assert!(err.to_string().contains("multi-platform"));
    }
}
